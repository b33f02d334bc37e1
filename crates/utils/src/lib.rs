//! Shared utilities for remcache
//!
//! Process-level helpers used by the server binary and the integration
//! tests: tracing subscriber set-up, XDG default paths and shutdown signals.

pub mod shutdown;
pub mod tracing;
pub mod xdg;

pub use shutdown::*;
pub use self::tracing::{init as init_tracing, operation_span, LogFormat};
pub use xdg::*;
