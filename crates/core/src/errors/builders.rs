//! Builder methods for creating errors with context

use super::types::{BoxError, Error};

impl Error {
    /// Create an invalid digest error
    #[must_use]
    pub fn invalid_digest(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidDigest {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-found error for a blob
    #[must_use]
    pub fn blob_not_found(key: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "blob",
            key: key.into(),
        }
    }

    /// Create a not-found error for an action result
    #[must_use]
    pub fn action_not_found(key: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "action result",
            key: key.into(),
        }
    }

    /// Create a corrupt entry error
    #[must_use]
    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CorruptEntry {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Create an unavailable error without a source
    #[must_use]
    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Unavailable {
            backend: backend.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an unavailable error with a source error
    #[must_use]
    pub fn unavailable_with_source(
        backend: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::Unavailable {
            backend: backend.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a permission denied error
    #[must_use]
    pub fn permission_denied(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PermissionDenied {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create an unknown error with a source error
    #[must_use]
    pub fn unknown(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Unknown {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}
