//! Error types for I/O operations

use thiserror::Error;

/// Errors that can occur while reading or writing scene and texture files
#[derive(Error, Debug)]
pub enum IoError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid file format: {format}")]
    InvalidFormat { format: String },

    #[error("OBJ error: {0}")]
    Obj(#[from] tobj::LoadError),

    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),

    #[error("Write error: {message}")]
    WriteError { message: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IoError> for lodcrate_core::Error {
    fn from(e: IoError) -> Self {
        match e {
            IoError::Io(io) => lodcrate_core::Error::Io(io),
            IoError::FileNotFound { path } => {
                lodcrate_core::Error::NotFound(format!("file {}", path))
            }
            IoError::InvalidFormat { format } => lodcrate_core::Error::UnsupportedFormat(format),
            other => lodcrate_core::Error::InvalidData(other.to_string()),
        }
    }
}
