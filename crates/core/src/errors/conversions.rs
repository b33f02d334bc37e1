//! Error conversion utilities

use super::types::Error;
use std::io::ErrorKind;

impl Error {
    /// Map an I/O error against a storage key into the taxonomy
    pub fn from_io(backend: &str, key: &str, error: std::io::Error) -> Self {
        match error.kind() {
            ErrorKind::NotFound => Error::blob_not_found(key),
            ErrorKind::PermissionDenied => Error::PermissionDenied {
                operation: format!("{backend} access to '{key}'"),
                message: error.to_string(),
            },
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                Error::unavailable_with_source(backend, format!("I/O on '{key}'"), error)
            }
            _ => Error::unknown(format!("{backend} I/O error on '{key}'"), error),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::from_io("io", "", error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Unknown {
            message: format!("JSON error: {error}"),
            source: Some(Box::new(error)),
        }
    }
}
