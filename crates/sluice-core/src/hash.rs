//! Stable hashing helpers for pipelines, schemas, and checkpoint payloads.

use blake3::Hasher;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        // blake3 hex(32b) is 64 hex chars
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<Hasher> for Hash256 {
    fn from(h: Hasher) -> Self {
        Hash256(h.finalize().into())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    Hash256::from(h)
}

pub fn hash_str(s: &str) -> Hash256 {
    hash_bytes(s.as_bytes())
}

/// Hash any serde-serializable value deterministically (via JSON).
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256, crate::error::Error> {
    let bytes = serde_json::to_vec(v).map_err(|e| crate::error::Error::Hash(e.to_string()))?;
    Ok(hash_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_64_chars_and_stable() {
        let a = hash_str("sluice");
        let b = hash_str("sluice");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
        assert_ne!(a, hash_str("sluicE"));
    }

    #[test]
    fn serde_hash_depends_on_content() {
        let a = hash_serde(&vec!["rows", "select"]).unwrap();
        let b = hash_serde(&vec!["rows", "where"]).unwrap();
        assert_ne!(a, b);
    }
}
