//! Object image: the magic-tagged dump of the whole memory.
//!
//! The image is the magic number followed by exactly [`C::NWORDS`] words,
//! every value a 32-bit little-endian integer.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};

use camino::Utf8Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants as C;
use crate::memory::Memory;

#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("bad magic number {found:#010x}, expected {:#010x}", C::MAGIC)]
    BadMagic { found: u32 },

    #[error("truncated image: got {words} words, expected {}", C::NWORDS)]
    Truncated { words: usize },

    #[error("unexpected data after the last word")]
    TrailingData,

    #[error("could not access object image")]
    Io(#[from] std::io::Error),
}

/// Fill `buf` as much as possible, returning how many bytes were read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read and validate an object image
///
/// # Errors
///
/// Fails if the magic number is wrong, if there are less or more than
/// [`C::NWORDS`] words, or on I/O errors.
pub fn read_image<R: Read>(mut reader: R) -> Result<Memory, ObjectError> {
    let mut magic = [0; 4];
    let got = read_full(&mut reader, &mut magic)?;
    if got < magic.len() {
        return Err(ObjectError::BadMagic {
            found: u32::from_le_bytes(magic),
        });
    }

    let found = u32::from_le_bytes(magic);
    if found != C::MAGIC {
        return Err(ObjectError::BadMagic { found });
    }

    let mut memory = Memory::default();
    for (index, word) in memory.words_mut().iter_mut().enumerate() {
        let mut buf = [0; 4];
        if read_full(&mut reader, &mut buf)? < buf.len() {
            return Err(ObjectError::Truncated { words: index });
        }
        *word = C::Word::from_le_bytes(buf);
    }

    let mut extra = [0; 1];
    if read_full(&mut reader, &mut extra)? != 0 {
        return Err(ObjectError::TrailingData);
    }

    Ok(memory)
}

/// Write a memory as an object image
///
/// # Errors
///
/// Fails on I/O errors.
pub fn write_image<W: Write>(mut writer: W, memory: &Memory) -> Result<(), ObjectError> {
    writer.write_all(&C::MAGIC.to_le_bytes())?;
    for word in memory.words() {
        writer.write_all(&word.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Load an object image from a file
///
/// # Errors
///
/// See [`read_image`].
#[tracing::instrument]
pub fn load(path: &Utf8Path) -> Result<Memory, ObjectError> {
    info!("Loading object image");
    let file = File::open(path)?;
    let memory = read_image(BufReader::new(file))?;
    debug!("Object image is valid");
    Ok(memory)
}

/// Save a memory to a file as an object image
///
/// # Errors
///
/// Fails if the file can't be written.
#[tracing::instrument(skip(memory))]
pub fn save(path: &Utf8Path, memory: &Memory) -> Result<(), ObjectError> {
    info!("Saving object image");
    let file = File::create(path)?;
    write_image(BufWriter::new(file), memory)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample() -> Memory {
        let mut memory = Memory::default();
        for (address, value) in [(0, 1), (1, 5), (2, 10), (3, 50), (1999, -1)] {
            memory.set(address, value).unwrap();
        }
        memory
    }

    fn encoded(memory: &Memory) -> Vec<u8> {
        let mut buf = Vec::new();
        write_image(&mut buf, memory).unwrap();
        buf
    }

    #[test]
    fn round_trip_test() {
        let memory = sample();
        let buf = encoded(&memory);
        assert_eq!(buf.len(), 4 + 4 * C::NWORDS);
        assert_eq!(&buf[..8], &[0x6F, 0x6A, 0x65, 0x25, 1, 0, 0, 0]);

        let read = read_image(buf.as_slice()).unwrap();
        assert_eq!(read.words()[..], memory.words()[..]);
    }

    #[test]
    fn bad_magic_test() {
        let mut buf = encoded(&sample());
        buf[0] = 0;
        assert!(matches!(
            read_image(buf.as_slice()),
            Err(ObjectError::BadMagic { found: 0x2565_6A00 })
        ));

        assert!(matches!(
            read_image(&[0x6F, 0x6A][..]),
            Err(ObjectError::BadMagic { .. })
        ));
    }

    #[test]
    fn truncated_test() {
        let buf = encoded(&sample());

        // Drop the last word and a half
        let short = &buf[..buf.len() - 6];
        assert!(matches!(
            read_image(short),
            Err(ObjectError::Truncated { words: 1998 })
        ));

        assert!(matches!(
            read_image(&buf[..4]),
            Err(ObjectError::Truncated { words: 0 })
        ));
    }

    #[test]
    fn trailing_data_test() {
        let mut buf = encoded(&sample());
        buf.push(0);
        assert!(matches!(
            read_image(buf.as_slice()),
            Err(ObjectError::TrailingData)
        ));
    }

    #[test]
    fn file_round_trip_test() {
        let dir = std::env::temp_dir();
        let path = camino::Utf8PathBuf::from_path_buf(dir)
            .unwrap()
            .join(format!("simplecpu-object-{}.obj", std::process::id()));

        save(&path, &sample()).unwrap();
        let memory = load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(memory.get(1999), Ok(-1));
        assert_eq!(
            memory.dump().to_string(),
            indoc::indoc! {"
                [0000] 0001 0005 0010 0050 0000 0000 0000 0000 0000 0000
                [1990] 0000 0000 0000 0000 0000 0000 0000 0000 0000 -001
            "}
        );
    }
}
