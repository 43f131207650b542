//! Storage backends behind the filesystem actor.
//!
//! - `fs`: local filesystem (default).
//! - `memory`: `BTreeMap`-backed store for tests and `memory://` roots.
//!
//! Backends are synchronous; only the filesystem actor calls them, and it does
//! so from a blocking thread.

mod fs;
mod memory;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

use crate::error::Result;

/// Abstract byte store addressed by `/`-separated paths.
pub trait Storage: Send + Sync {
    /// Write bytes to a path. Creates parent directories if needed.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a whole object.
    fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a path and everything below it. Idempotent.
    fn delete(&self, path: &str) -> Result<()>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// All object paths under a prefix, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Pick a backend for a root location. `memory://` roots get a fresh
/// in-memory store; everything else is treated as a local path.
pub fn build_storage(root: &str) -> Box<dyn Storage> {
    if root.starts_with("memory://") {
        Box::new(MemoryStorage::new())
    } else {
        Box::new(FsStorage::new())
    }
}
