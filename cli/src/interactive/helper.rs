use std::borrow::Cow;
use std::collections::BTreeSet;
use std::marker::PhantomData;

use anstyle::Style;
use clap::{Command, CommandFactory};
use rustyline::{
    completion::Completer,
    highlight::Highlighter,
    hint::Hinter,
    validate::{ValidationContext, ValidationResult, Validator},
    Context,
};
use rustyline_derive::Helper;

/// Line editor helper: completion and hints come from the clap command tree
#[derive(Helper, Debug)]
pub(crate) struct RunHelper<T: CommandFactory> {
    app: PhantomData<T>,
}

impl<T: CommandFactory> RunHelper<T> {
    pub fn new() -> Self {
        RunHelper { app: PhantomData }
    }

    /// Candidates for the word under the cursor, with the length of what was already typed
    fn candidates(line: &str, pos: usize) -> Option<(usize, BTreeSet<String>)> {
        let line = &line[..pos];
        let mut words = shell_words::split(line).ok()?;

        // After a blank, the next word is the one being completed
        if line.ends_with([' ', '\t']) {
            words.push(String::new());
        }

        Some(suggest(&T::command(), &words))
    }
}

fn suggest(command: &Command, input: &[String]) -> (usize, BTreeSet<String>) {
    match input {
        [] => (0, subcommand_names(command)),

        [last] => (
            last.len(),
            subcommand_names(command)
                .into_iter()
                .filter(|name| name.starts_with(last.as_str()))
                .collect(),
        ),

        [head, tail @ ..] => command
            .find_subcommand(head)
            .map(|sub| suggest(sub, tail))
            .unwrap_or_default(),
    }
}

fn subcommand_names(command: &Command) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = command
        .get_subcommands()
        .flat_map(|sub| {
            std::iter::once(sub.get_name().to_owned())
                .chain(sub.get_visible_aliases().map(ToOwned::to_owned))
        })
        .collect();

    // clap adds a `help` subcommand whenever there are subcommands
    if command.has_subcommands() {
        names.insert("help".to_owned());
    }

    names
}

impl<T: CommandFactory> Completer for RunHelper<T> {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        Ok(Self::candidates(line, pos).map_or((0, Vec::new()), |(typed, candidates)| {
            (pos - typed, candidates.into_iter().collect())
        }))
    }
}

impl<T: CommandFactory> Highlighter for RunHelper<T> {
    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        let style = Style::new().dimmed();
        Cow::Owned(format!("{}{hint}{}", style.render(), style.render_reset()))
    }

    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        prompt: &'p str,
        _default: bool,
    ) -> Cow<'b, str> {
        let style = Style::new().bold();
        Cow::Owned(format!("{}{prompt}{}", style.render(), style.render_reset()))
    }
}

impl<T: CommandFactory> Hinter for RunHelper<T> {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let (typed, candidates) = Self::candidates(line, pos)?;

        // Only hint when there is a single way to go
        match candidates.len() {
            1 => candidates
                .into_iter()
                .next()
                .map(|candidate| candidate[typed..].to_owned()),
            _ => None,
        }
    }
}

impl<T: CommandFactory> Validator for RunHelper<T> {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        // Unbalanced quotes mean the command continues on the next line
        match shell_words::split(ctx.input()) {
            Ok(_) => Ok(ValidationResult::Valid(None)),
            Err(_) => Ok(ValidationResult::Incomplete),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    /// Test commands
    #[derive(Parser, Debug)]
    #[command(no_binary_name = true)]
    enum Commands {
        Step,
        Set,
        /// Show things
        Info {
            #[command(subcommand)]
            sub: InfoCommands,
        },
    }

    #[derive(Parser, Debug)]
    enum InfoCommands {
        Breakpoints,
        Cycles,
    }

    #[test]
    fn candidates_test() {
        let (typed, candidates) = RunHelper::<Commands>::candidates("s", 1).unwrap();
        assert_eq!(typed, 1);
        assert_eq!(
            candidates.into_iter().collect::<Vec<_>>(),
            vec!["set", "step"]
        );

        let (typed, candidates) = RunHelper::<Commands>::candidates("info c", 6).unwrap();
        assert_eq!(typed, 1);
        assert_eq!(candidates.into_iter().collect::<Vec<_>>(), vec!["cycles"]);

        let (typed, candidates) = RunHelper::<Commands>::candidates("info ", 5).unwrap();
        assert_eq!(typed, 0);
        assert_eq!(
            candidates.into_iter().collect::<Vec<_>>(),
            vec!["breakpoints", "cycles", "help"]
        );

        assert!(RunHelper::<Commands>::candidates("set \"1", 6).is_none());
    }
}
