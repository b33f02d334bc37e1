//! Core error type definitions

use crate::digest::Digest;

/// Result type alias for remcache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error carried by backend failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error taxonomy shared by the digest, storage and transfer layers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed digest on the wire or in a resource name
    #[error("invalid digest '{input}': {reason}")]
    InvalidDigest { input: String, reason: String },

    /// Expected absence of a blob, action result or upload session
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    /// Declared identity does not match the bytes supplied
    #[error("digest mismatch: declared {expected}, computed {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    /// Stored bytes no longer match the key they are stored under
    #[error("corrupt entry '{key}': {reason}")]
    CorruptEntry { key: String, reason: String },

    /// Chunk offset does not line up with the server's committed size
    #[error(
        "invalid offset {offset} for '{resource}': committed size is {committed_size}"
    )]
    InvalidOffset {
        resource: String,
        offset: i64,
        committed_size: i64,
    },

    /// Action result references blobs that are absent from the CAS
    #[error("action {action} references {} blob(s) missing from the CAS", missing.len())]
    MissingCasReference {
        action: Digest,
        missing: Vec<Digest>,
    },

    /// Transient backend failure
    #[error("{backend} unavailable: {message}")]
    Unavailable {
        backend: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Tenant or backend authorization failure
    #[error("permission denied for {operation}: {message}")]
    PermissionDenied { operation: String, message: String },

    /// Caller supplied an argument that cannot be honoured
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Start-up configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Backend failure outside the known taxonomy
    #[error("{message}")]
    Unknown {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

/// Transport-neutral status code, named after the gRPC codes REAPI clients expect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    DataLoss,
    OutOfRange,
    Unavailable,
    PermissionDenied,
    Unknown,
    Internal,
}

impl ErrorCode {
    /// Numeric gRPC code
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Unknown => 2,
            Self::InvalidArgument => 3,
            Self::NotFound => 5,
            Self::PermissionDenied => 7,
            Self::FailedPrecondition => 9,
            Self::OutOfRange => 11,
            Self::Internal => 13,
            Self::Unavailable => 14,
            Self::DataLoss => 15,
        }
    }

    /// Lower-case label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::FailedPrecondition => "failed_precondition",
            Self::DataLoss => "data_loss",
            Self::OutOfRange => "out_of_range",
            Self::Unavailable => "unavailable",
            Self::PermissionDenied => "permission_denied",
            Self::Unknown => "unknown",
            Self::Internal => "internal",
        }
    }
}

/// Recovery guidance attached to every error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryHint {
    /// Resume the upload from this offset
    ResumeFrom { offset: i64 },

    /// Retry with exponential backoff
    RetryWithBackoff {
        initial_delay_ms: u64,
        max_retries: u32,
    },

    /// Upload the listed blobs, then retry
    UploadMissing { digests: Vec<Digest> },

    /// Re-upload the object from a trusted copy
    Reupload,

    /// Fix the request; retrying unchanged will fail again
    FixRequest,

    /// Expected outcome, nothing to recover
    Ignore,

    /// Operator attention required
    ContactAdmin,
}
