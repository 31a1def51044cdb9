use std::error;
use std::fmt;
use std::io;

/// Errors reported by buffer-level operations.
///
/// Byte-level mutations are infallible on their contract domain (reads
/// short-return, deletes past the end are no-ops), so this type only shows
/// up on the file I/O surface and on undo.
#[derive(Debug)]
pub enum Error {
    /// An I/O error propagated from the data-type plug or the filesystem.
    Io(io::Error),
    /// The buffer has no filename associated, so it cannot be saved.
    NoFilename,
    /// The save log holds no further records to replay.
    NoUndoInfo,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "i/o error: {}", err),
            Error::NoFilename => write!(f, "buffer has no associated filename"),
            Error::NoUndoInfo => write!(f, "no further undo information"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
