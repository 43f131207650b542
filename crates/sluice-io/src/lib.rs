#![forbid(unsafe_code)]
//! sluice-io: everything that touches bytes at rest.
//!
//! - `storage`: synchronous `Storage` trait with filesystem and in-memory
//!   backends.
//! - `actor`: the filesystem actor. It is the single owner of a storage
//!   backend; stages reach it only through an async request/response handle.
//! - `blob` + `codec`: framing, checksums, and compression for checkpoint
//!   payloads.
//! - `checkpoint`: commit/lookup of checkpoint records keyed by
//!   `(run id, sequence, stage)`.
//! - `json`: the JSON-lines parser and printer behind `read json` and
//!   `write json`.

pub mod actor;
pub mod blob;
pub mod checkpoint;
pub mod codec;
pub mod error;
pub mod json;
pub mod storage;

pub use actor::{FilesystemActor, FsHandle};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::{Error, Result};
pub use storage::{FsStorage, MemoryStorage, Storage};
