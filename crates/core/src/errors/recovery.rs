//! Recovery utilities for errors

use super::types::{Error, ErrorCode, RecoveryHint};

impl Error {
    /// Map the error onto its transport status code
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidDigest { .. } | Self::InvalidArgument { .. } => {
                ErrorCode::InvalidArgument
            }
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::DigestMismatch { .. } => ErrorCode::InvalidArgument,
            Self::CorruptEntry { .. } => ErrorCode::DataLoss,
            Self::InvalidOffset { .. } => ErrorCode::OutOfRange,
            Self::MissingCasReference { .. } => ErrorCode::FailedPrecondition,
            Self::Unavailable { .. } => ErrorCode::Unavailable,
            Self::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            Self::Configuration { .. } => ErrorCode::Internal,
            Self::Unknown { .. } => ErrorCode::Unknown,
        }
    }

    /// Get the recovery hint for this error
    #[must_use]
    pub fn recovery_hint(&self) -> RecoveryHint {
        match self {
            Self::InvalidOffset { committed_size, .. } => RecoveryHint::ResumeFrom {
                offset: *committed_size,
            },
            Self::MissingCasReference { missing, .. } => RecoveryHint::UploadMissing {
                digests: missing.clone(),
            },
            Self::Unavailable { .. } => RecoveryHint::RetryWithBackoff {
                initial_delay_ms: 100,
                max_retries: 5,
            },
            Self::CorruptEntry { .. } => RecoveryHint::Reupload,
            Self::NotFound { .. } => RecoveryHint::Ignore,
            Self::InvalidDigest { .. }
            | Self::DigestMismatch { .. }
            | Self::InvalidArgument { .. } => RecoveryHint::FixRequest,
            Self::PermissionDenied { .. } | Self::Configuration { .. } | Self::Unknown { .. } => {
                RecoveryHint::ContactAdmin
            }
        }
    }

    /// Check if this error is transient and can be retried
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Check if this error is an expected absence
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error indicates stored data no longer matches its key
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptEntry { .. })
    }
}
