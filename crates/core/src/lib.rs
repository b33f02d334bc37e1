//! Core domain types, errors, and constants for remcache.
//!
//! This crate establishes the identity and error primitives every other
//! remcache crate builds on.
//!
//! ## Key Components
//!
//! - **`digest`**: `Digest`, the content hash plus byte length used as the sole
//!   cache key, with the `DigestFunction` and incremental `DigestHasher` that
//!   produce it.
//! - **`instance`**: `InstanceName`, the tenant partition embedded in every key.
//! - **`action`**: the `ActionResult` record stored in the action cache.
//! - **`errors`**: the `Error` taxonomy with its transport codes and recovery hints.
//! - **`constants`**: shared defaults and environment variable names.

pub mod action;
pub mod constants;
pub mod digest;
pub mod errors;
pub mod instance;

pub use self::{
    action::{ActionResult, ExecutionMetadata, OutputDirectory, OutputFile},
    constants::*,
    digest::{Digest, DigestFunction, DigestHasher},
    errors::{BoxError, Error, ErrorCode, RecoveryHint, Result},
    instance::InstanceName,
};
