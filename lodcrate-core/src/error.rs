//! Error types for lodcrate

use thiserror::Error;

/// Main error type for lodcrate operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Processing aborted by observer")]
    Aborted,

    #[error("Processing failed: {0}")]
    Processing(String),
}

/// Result type alias for lodcrate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a recorded error, as handed to error handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    InvalidData,
    InvalidSettings,
    Algorithm,
    NotFound,
    Unsupported,
    UnsupportedFormat,
    Aborted,
    Processing,
    /// Shared data (such as a modular seam) did not match across assets
    Inconsistency,
    /// Recoverable problem recorded as a warning
    Warning,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::InvalidData(_) => ErrorKind::InvalidData,
            Error::InvalidSettings(_) => ErrorKind::InvalidSettings,
            Error::Algorithm(_) => ErrorKind::Algorithm,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Error::Aborted => ErrorKind::Aborted,
            Error::Processing(_) => ErrorKind::Processing,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
