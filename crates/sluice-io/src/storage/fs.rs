use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use super::Storage;
use crate::error::{Error, Result};

/// Local filesystem storage (rooted at current FS).
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorage;

impl FsStorage {
    pub fn new() -> Self {
        Self
    }
}

fn io_err(op: &str, path: &str, e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound(path.to_string())
    } else {
        Error::Storage(format!("{op} {path}: {e}"))
    }
}

impl Storage for FsStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err("mkparent", path, e))?;
        }
        let mut f = File::create(p).map_err(|e| io_err("create", path, e))?;
        f.write_all(bytes).map_err(|e| io_err("write", path, e))?;
        f.sync_all().map_err(|e| io_err("sync", path, e))?;
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| io_err("read", path, e))
    }

    fn delete(&self, path: &str) -> Result<()> {
        let p = Path::new(path);
        let res = if p.is_dir() {
            fs::remove_dir_all(p)
        } else {
            fs::remove_file(p)
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err("delete", path, e)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        if let Some(parent) = Path::new(to).parent() {
            fs::create_dir_all(parent).map_err(|e| io_err("mkparent", to, e))?;
        }
        fs::rename(from, to).map_err(|e| io_err("rename", from, e))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = Path::new(prefix);
        let mut results = Vec::new();

        if !prefix_path.exists() {
            return Ok(results);
        }

        if prefix_path.is_file() {
            if let Some(s) = prefix_path.to_str() {
                results.push(s.to_string());
            }
            return Ok(results);
        }

        fn visit_dirs(dir: &Path, results: &mut Vec<String>) -> std::io::Result<()> {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    visit_dirs(&path, results)?;
                } else if let Some(s) = path.to_str() {
                    results.push(s.to_string());
                }
            }
            Ok(())
        }

        visit_dirs(prefix_path, &mut results).map_err(|e| io_err("list", prefix, e))?;
        results.sort();
        Ok(results)
    }
}
