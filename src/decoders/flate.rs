//! FlateDecode (zlib/deflate) via flate2.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// FlateDecode filter.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => Ok(output),
            // Data cut short by a bad checksum or trailing garbage is still usable.
            Err(e) if !output.is_empty() => {
                log::warn!("FlateDecode recovered {} bytes before error: {}", output.len(), e);
                Ok(output)
            },
            Err(zlib_err) => {
                // Some writers omit the zlib header.
                log::debug!("zlib decode failed ({}), trying raw deflate", zlib_err);
                output.clear();
                match DeflateDecoder::new(input).read_to_end(&mut output) {
                    Ok(_) if !output.is_empty() => Ok(output),
                    _ => Err(Error::Decode(format!("FlateDecode failed: {}", zlib_err))),
                }
            },
        }
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_zlib() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"xref stream rows").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(FlateDecoder.decode(&compressed).unwrap(), b"xref stream rows");
    }

    #[test]
    fn test_raw_deflate_fallback() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"no zlib header").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(FlateDecoder.decode(&compressed).unwrap(), b"no zlib header");
    }

    #[test]
    fn test_garbage_fails() {
        assert!(matches!(FlateDecoder.decode(b"\xff\xff\xff\xff"), Err(Error::Decode(_))));
    }
}
