//! ocipeek shared types.
//!
//! This crate holds the error type shared by the extraction engine and
//! the CLI. The engine itself lives in `ocipeek-engine`.

pub mod error;

pub use error::{PeekError, Result};

/// ocipeek version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
