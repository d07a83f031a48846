//! Error type shared by the decompressor, the record decoder and the readers.

use std::io;
use std::fmt::{self, Display, Debug, Formatter};

use super::index::VirtualOffset;

/// Error produced while reading a BAM file or its index.
///
/// # Variants
///
/// * `NoMoreRecords` - represents `StopIteration` for
/// [read_into](../trait.RecordReader.html#tymethod.read_into),
/// * `Corrupted(s)` - the input contains impossible values (bad magic, negative lengths,
/// invalid bgzip block, record shorter than its fields announce). `s` describes the problem.
/// * `Truncated(e)` - the input ended in the middle of a block, a header or a record.
/// * `InvalidPosition(v)` - a seek to `v` does not land inside the decoded block.
/// * `OutOfMemory` - stream buffers could not be allocated.
/// * `InvalidInput(s)` - an argument supplied by the caller cannot be used.
/// * `Io(e)` - any other I/O failure.
pub enum Error {
    NoMoreRecords,
    Corrupted(String),
    Truncated(io::Error),
    InvalidPosition(VirtualOffset),
    OutOfMemory,
    InvalidInput(String),
    Io(io::Error),
}

impl Error {
    pub(crate) fn corrupted<S: Into<String>>(msg: S) -> Self {
        Error::Corrupted(msg.into())
    }

    /// Returns `true` for `Corrupted` and `Truncated` errors, i.e. for problems with the data
    /// itself, not with the environment.
    pub fn is_corrupt_data(&self) -> bool {
        match self {
            Error::Corrupted(_) | Error::Truncated(_) => true,
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::Truncated(e),
            io::ErrorKind::InvalidData => Error::Corrupted(e.to_string()),
            _ => Error::Io(e),
        }
    }
}

impl Into<io::Error> for Error {
    fn into(self) -> io::Error {
        use Error::*;
        match self {
            NoMoreRecords => io::Error::new(io::ErrorKind::UnexpectedEof, "No more records"),
            Corrupted(s) => io::Error::new(io::ErrorKind::InvalidData, s),
            Truncated(e) | Io(e) => e,
            InvalidPosition(offset) => io::Error::new(io::ErrorKind::InvalidInput,
                format!("Position is invalid: {}", offset)),
            OutOfMemory => io::Error::new(io::ErrorKind::Other, "Failed to allocate buffers"),
            InvalidInput(s) => io::Error::new(io::ErrorKind::InvalidInput, s),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        use Error::*;
        match self {
            NoMoreRecords => write!(f, "No more records"),
            Corrupted(s) => write!(f, "Corrupted data: {}", s),
            Truncated(e) => write!(f, "File is truncated: {}", e),
            InvalidPosition(offset) => write!(f, "Position is invalid: {}", offset),
            OutOfMemory => write!(f, "Failed to allocate stream buffers"),
            InvalidInput(s) => write!(f, "Invalid input: {}", s),
            Io(e) => write!(f, "{}", e),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Truncated(e) | Error::Io(e) => Some(e),
            _ => None,
        }
    }
}
