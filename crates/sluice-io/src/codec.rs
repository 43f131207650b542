//! Compression facade for checkpoint blobs (feature-gated).
//!
//! Synchronous. Unsupported codecs fail loudly instead of
//! silently writing uncompressed data under a compressed tag.

use sluice_core::config::Codec;

use crate::error::{Error, Result};

/// zstd level used for checkpoint payloads.
#[cfg(feature = "zstd")]
const ZSTD_LEVEL: i32 = 3;

pub fn compress(codec: Codec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(input.to_vec()),
        Codec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                let mut out = Vec::new();
                zstd::stream::copy_encode(input, &mut out, ZSTD_LEVEL)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(out)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(Error::CodecUnsupported("zstd"))
            }
        }
        Codec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                Ok(lz4_flex::compress_prepend_size(input))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(Error::CodecUnsupported("lz4"))
            }
        }
    }
}

pub fn decompress(codec: Codec, input: &[u8]) -> Result<Vec<u8>> {
    match codec {
        Codec::None => Ok(input.to_vec()),
        Codec::Zstd => {
            #[cfg(feature = "zstd")]
            {
                let mut out = Vec::new();
                zstd::stream::copy_decode(input, &mut out)
                    .map_err(|e| Error::Codec(format!("zstd: {e}")))?;
                Ok(out)
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(Error::CodecUnsupported("zstd"))
            }
        }
        Codec::Lz4 => {
            #[cfg(feature = "lz4")]
            {
                lz4_flex::decompress_size_prepended(input)
                    .map_err(|e| Error::Codec(format!("lz4: {e}")))
            }
            #[cfg(not(feature = "lz4"))]
            {
                Err(Error::CodecUnsupported("lz4"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let data = b"checkpoint payload".to_vec();
        assert_eq!(compress(Codec::None, &data).unwrap(), data);
        assert_eq!(decompress(Codec::None, &data).unwrap(), data);
    }

    #[cfg(not(feature = "zstd"))]
    #[test]
    fn zstd_without_feature_is_rejected() {
        assert!(matches!(
            compress(Codec::Zstd, b"x"),
            Err(Error::CodecUnsupported("zstd"))
        ));
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_shrinks_repetitive_input() {
        let data = vec![7u8; 4096];
        let packed = compress(Codec::Lz4, &data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(Codec::Lz4, &packed).unwrap(), data);
    }
}
