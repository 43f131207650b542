#![forbid(unsafe_code)]
//! sluice-core: the data model every other sluice crate speaks.
//!
//! Design intent:
//! - Table slices are immutable and reference-counted; every transformation
//!   produces a new slice.
//! - Values and types form a closed recursive set (primitives, list, record,
//!   enumeration).
//! - No async, runtime, or I/O here. Those live in `sluice-io` and `sluice-exec`.

pub mod config;
pub mod diagnostic;
pub mod element;
pub mod error;
pub mod expr;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod prelude;
pub mod schema;
pub mod slice;
pub mod types;

/// Engine version string recorded in run manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::{Error, Result};
