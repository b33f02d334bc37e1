//! Error types and recovery guidance for remcache operations

mod builders;
mod conversions;
mod recovery;
mod types;

pub use types::{BoxError, Error, ErrorCode, RecoveryHint, Result};
