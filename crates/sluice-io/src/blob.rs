//! Framing for persisted checkpoint blobs.
//!
//! Layout:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes … ][ blake3(header || payload): 32 bytes ]

use sluice_core::config::Codec;

use crate::codec::{compress, decompress};
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x534C_4350; // "SLCP"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8;
pub const CHECKSUM_LEN: usize = 32;

/// Refuse to allocate for absurd header values.
const MAX_BLOB_LEN: u64 = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub codec: Codec,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

impl BlobHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&VERSION.to_le_bytes());
        out[6] = self.codec as u8;
        out[8..16].copy_from_slice(&self.uncompressed_len.to_le_bytes());
        out[16..24].copy_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Corrupt("short header".into()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let mut version = [0u8; 2];
        version.copy_from_slice(&bytes[4..6]);
        if u32::from_le_bytes(magic) != MAGIC || u16::from_le_bytes(version) != VERSION {
            return Err(Error::Corrupt("bad magic/version".into()));
        }
        let codec = Codec::from_u8(bytes[6])
            .ok_or_else(|| Error::Corrupt(format!("unknown codec tag {}", bytes[6])))?;

        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[8..16]);
        let uncompressed_len = u64::from_le_bytes(len);
        len.copy_from_slice(&bytes[16..24]);
        let compressed_len = u64::from_le_bytes(len);

        let header = Self {
            codec,
            uncompressed_len,
            compressed_len,
        };
        header.validate_sizes()?;
        Ok(header)
    }

    fn validate_sizes(&self) -> Result<()> {
        if self.uncompressed_len > MAX_BLOB_LEN || self.compressed_len > MAX_BLOB_LEN {
            return Err(Error::Corrupt(format!(
                "blob lengths {}/{} exceed max {}",
                self.compressed_len, self.uncompressed_len, MAX_BLOB_LEN
            )));
        }
        if self.codec == Codec::None && self.compressed_len != self.uncompressed_len {
            return Err(Error::Corrupt("length mismatch for uncompressed blob".into()));
        }
        Ok(())
    }
}

/// Compress and frame `raw`.
pub fn encode_blob(codec: Codec, raw: &[u8]) -> Result<Vec<u8>> {
    let payload = compress(codec, raw)?;
    let header = BlobHeader {
        codec,
        uncompressed_len: raw.len() as u64,
        compressed_len: payload.len() as u64,
    };

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&payload);
    let checksum = blake3::hash(&out);
    out.extend_from_slice(checksum.as_bytes());
    Ok(out)
}

/// Verify and unframe a blob produced by [`encode_blob`]. `label` names the
/// blob in error messages.
pub fn decode_blob(label: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    let header = BlobHeader::from_bytes(bytes)?;
    let body_end = HEADER_LEN + header.compressed_len as usize;
    if bytes.len() != body_end + CHECKSUM_LEN {
        return Err(Error::Corrupt(format!(
            "{label}: expected {} bytes, found {}",
            body_end + CHECKSUM_LEN,
            bytes.len()
        )));
    }

    let computed = blake3::hash(&bytes[..body_end]);
    if computed.as_bytes()[..] != bytes[body_end..] {
        return Err(Error::ChecksumMismatch(label.to_string()));
    }

    let raw = decompress(header.codec, &bytes[HEADER_LEN..body_end])?;
    if raw.len() as u64 != header.uncompressed_len {
        return Err(Error::Corrupt(format!(
            "{label}: decompressed {} bytes, header says {}",
            raw.len(),
            header.uncompressed_len
        )));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout() {
        let framed = encode_blob(Codec::None, b"abc").unwrap();
        assert_eq!(framed.len(), HEADER_LEN + 3 + CHECKSUM_LEN);
        assert_eq!(&framed[HEADER_LEN..HEADER_LEN + 3], b"abc");
        assert_eq!(decode_blob("t", &framed).unwrap(), b"abc");
    }

    #[test]
    fn flipped_payload_bit_is_detected() {
        let mut framed = encode_blob(Codec::None, b"state").unwrap();
        framed[HEADER_LEN] ^= 0x01;
        assert!(matches!(
            decode_blob("stage-0000", &framed),
            Err(Error::ChecksumMismatch(label)) if label == "stage-0000"
        ));
    }

    #[test]
    fn truncated_blob_is_corrupt() {
        let framed = encode_blob(Codec::None, b"state").unwrap();
        assert!(matches!(
            decode_blob("t", &framed[..framed.len() - 1]),
            Err(Error::Corrupt(_))
        ));
        assert!(matches!(decode_blob("t", &framed[..10]), Err(Error::Corrupt(_))));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut framed = encode_blob(Codec::None, b"state").unwrap();
        framed[0] = 0;
        assert!(matches!(decode_blob("t", &framed), Err(Error::Corrupt(_))));
    }
}
