//! Byte-range digests.
//!
//! A PDF signature covers every byte of the file except the `/Contents`
//! hex string that will hold it. The two covered ranges are streamed
//! through the hasher in fixed-size chunks, so documents of any size are
//! digested in constant memory.

use super::types::{to_hex, ByteRange, DigestAlgorithm};
use crate::error::Result;
use std::io::{Read, Seek, SeekFrom};

/// Default read size.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Digest of the bytes covered by a [`ByteRange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentDigest {
    /// Algorithm used
    pub algorithm: DigestAlgorithm,
    /// Raw digest bytes
    pub bytes: Vec<u8>,
}

impl DocumentDigest {
    /// Uppercase hex form.
    pub fn to_hex(&self) -> String {
        to_hex(&self.bytes)
    }
}

/// Computes byte-range digests over seekable sources.
#[derive(Debug, Clone)]
pub struct ByteRangeDigestEngine {
    algorithm: DigestAlgorithm,
    chunk_size: usize,
}

impl ByteRangeDigestEngine {
    /// Engine for `algorithm` with the default chunk size.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Use a different read size (minimum 1 byte).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Algorithm this engine computes.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Digest the two ranges of `range` read from `source`.
    ///
    /// A range reaching past the end of the source fails with an
    /// `UnexpectedEof` I/O error.
    pub fn digest<R: Read + Seek>(&self, source: &mut R, range: &ByteRange) -> Result<DocumentDigest> {
        let mut hasher = self.algorithm.hasher();
        let mut buf = vec![0u8; self.chunk_size];

        for (offset, len) in range.ranges() {
            source.seek(SeekFrom::Start(offset))?;
            let mut remaining = len;
            while remaining > 0 {
                let n = remaining.min(buf.len() as u64) as usize;
                source.read_exact(&mut buf[..n])?;
                hasher.update(&buf[..n]);
                remaining -= n as u64;
            }
        }

        let digest = DocumentDigest {
            algorithm: self.algorithm,
            bytes: hasher.finalize().into_vec(),
        };
        log::debug!("{} digest over {} is {}", self.algorithm, range, digest.to_hex());
        Ok(digest)
    }

    /// Digest an in-memory document.
    pub fn digest_bytes(&self, data: &[u8], range: &ByteRange) -> Result<DocumentDigest> {
        self.digest(&mut std::io::Cursor::new(data), range)
    }
}
