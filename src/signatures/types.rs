//! Digital signature types and data structures.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use der::oid::{AssociatedOid, ObjectIdentifier};
use serde::Serialize;
use sha2::digest::DynDigest;
use std::fmt;

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DigestAlgorithm {
    /// SHA-1 (legacy; still requested by some timestamp authorities)
    Sha1,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Algorithm OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => sha1::Sha1::OID,
            DigestAlgorithm::Sha256 => sha2::Sha256::OID,
            DigestAlgorithm::Sha384 => sha2::Sha384::OID,
            DigestAlgorithm::Sha512 => sha2::Sha512::OID,
        }
    }

    /// Algorithm for an OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Parse a timestamp-authority digest name.
    ///
    /// Only `"SHA1"` and `"SHA-256"` are accepted.
    pub fn from_tsa_name(name: &str) -> Result<Self> {
        match name {
            "SHA1" => Ok(DigestAlgorithm::Sha1),
            "SHA-256" => Ok(DigestAlgorithm::Sha256),
            other => Err(Error::UnsupportedDigestAlgorithm(other.to_string())),
        }
    }

    /// Digest output length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Fresh incremental hasher.
    pub fn hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            DigestAlgorithm::Sha1 => Box::<sha1::Sha1>::default(),
            DigestAlgorithm::Sha256 => Box::<sha2::Sha256>::default(),
            DigestAlgorithm::Sha384 => Box::<sha2::Sha384>::default(),
            DigestAlgorithm::Sha512 => Box::<sha2::Sha512>::default(),
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize().into_vec()
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            _ => None,
        }
    }
}

/// Zero-filled region reserved for the signature.
///
/// `offset` addresses the `<` of the `/Contents` hex string and `len`
/// includes both angle brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignaturePlaceholder {
    /// Offset of `<`
    pub offset: u64,
    /// Length including `<` and `>`
    pub len: u64,
}

impl SignaturePlaceholder {
    /// Placeholder able to hold `capacity` bytes of DER at `offset`.
    pub fn with_capacity(offset: u64, capacity: usize) -> Self {
        Self {
            offset,
            len: capacity as u64 * 2 + 2,
        }
    }

    /// Largest signature in bytes that fits.
    pub fn capacity(&self) -> usize {
        (self.len.saturating_sub(2) / 2) as usize
    }

    /// Offset just past `>`.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// The `/ByteRange` of a signature: `[0 a b c]`.
///
/// The first range runs from the start of the file up to the placeholder,
/// the second from just after the placeholder to the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    /// Length of the first range (offset of `<`)
    pub first_len: u64,
    /// Start of the second range (offset just past `>`)
    pub second_offset: u64,
    /// Length of the second range
    pub second_len: u64,
}

impl ByteRange {
    /// Byte range bracketing `placeholder` in a file of `file_len` bytes.
    pub fn around(placeholder: &SignaturePlaceholder, file_len: u64) -> Result<Self> {
        if placeholder.end() > file_len {
            return Err(Error::MalformedPdf(format!(
                "placeholder ends at {} beyond file length {}",
                placeholder.end(),
                file_len
            )));
        }
        Ok(Self {
            first_len: placeholder.offset,
            second_offset: placeholder.end(),
            second_len: file_len - placeholder.end(),
        })
    }

    /// Parse `/ByteRange` values. Only the two-range form is accepted.
    pub fn from_values(values: &[i64]) -> Result<Self> {
        match values {
            [0, a, b, c] if *a >= 0 && *b >= *a && *c >= 0 => Ok(Self {
                first_len: *a as u64,
                second_offset: *b as u64,
                second_len: *c as u64,
            }),
            _ => Err(Error::MalformedPdf(format!("unsupported /ByteRange {:?}", values))),
        }
    }

    /// The four `/ByteRange` numbers.
    pub fn as_array(&self) -> [u64; 4] {
        [0, self.first_len, self.second_offset, self.second_len]
    }

    /// The two (offset, length) pairs.
    pub fn ranges(&self) -> [(u64, u64); 2] {
        [(0, self.first_len), (self.second_offset, self.second_len)]
    }

    /// Total number of covered bytes.
    pub fn covered_len(&self) -> u64 {
        self.first_len + self.second_len
    }

    /// End of the second range, i.e. the file length it was computed for.
    pub fn end(&self) -> u64 {
        self.second_offset + self.second_len
    }

    /// The excluded gap as a placeholder.
    pub fn gap(&self) -> SignaturePlaceholder {
        SignaturePlaceholder {
            offset: self.first_len,
            len: self.second_offset - self.first_len,
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0 {} {} {}]", self.first_len, self.second_offset, self.second_len)
    }
}

/// Options for signing a PDF.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Digest algorithm for the document digest and the signature
    pub digest_algorithm: DigestAlgorithm,
    /// Signature sub-filter (format)
    pub sub_filter: SignatureSubFilter,
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Name of the signer (if different from certificate CN)
    pub name: Option<String>,
    /// Explicit signature size in bytes; overrides the estimate
    pub estimated_size: Option<usize>,
    /// Page carrying the signature widget (zero-based)
    pub page_index: usize,
    /// Fixed signing time; the current time is used when unset
    pub signing_time: Option<DateTime<Utc>>,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha256,
            sub_filter: SignatureSubFilter::Pkcs7Detached,
            reason: None,
            location: None,
            contact_info: None,
            name: None,
            estimated_size: None,
            page_index: 0,
            signing_time: None,
        }
    }
}

impl SignOptions {
    /// Set the digest algorithm.
    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }

    /// Set the sub-filter.
    pub fn with_sub_filter(mut self, sub_filter: SignatureSubFilter) -> Self {
        self.sub_filter = sub_filter;
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Set the signer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reserve exactly `bytes` for the signature.
    pub fn with_estimated_size(mut self, bytes: usize) -> Self {
        self.estimated_size = Some(bytes);
        self
    }

    /// Put the signature widget on another page.
    pub fn with_page_index(mut self, index: usize) -> Self {
        self.page_index = index;
        self
    }

    /// Use a fixed signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }
}

/// Outcome of a successful signing operation.
#[derive(Debug, Clone, Serialize)]
pub struct SigningReport {
    /// Written file
    pub output: std::path::PathBuf,
    /// Name of the created signature field
    pub field_name: String,
    /// Signed byte range
    pub byte_range: ByteRange,
    /// Digest algorithm
    pub digest_algorithm: DigestAlgorithm,
    /// Hex-encoded byte-range digest
    pub digest: String,
    /// Size of the CMS blob
    pub signature_len: usize,
    /// Size reserved for it
    pub reserved_len: usize,
    /// Leaf certificate subject
    pub signer: String,
    /// Signing time placed in the signed attributes and `/M`
    pub signing_time: DateTime<Utc>,
    /// Timestamp authority time, if a token was embedded
    pub timestamp_time: Option<DateTime<Utc>>,
}

/// Information about an existing signature in a PDF.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignatureInfo {
    /// Field name
    pub field_name: String,
    /// `/Name` or the certificate common name
    pub signer_name: Option<String>,
    /// Certificate subject
    pub certificate_subject: Option<String>,
    /// Certificate issuer
    pub certificate_issuer: Option<String>,
    /// Signing time from the signed attributes (or `/M`)
    pub signing_time: Option<DateTime<Utc>>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Signature sub-filter type
    pub sub_filter: Option<SignatureSubFilter>,
    /// Byte range of the signed data
    pub byte_range: Option<ByteRange>,
    /// Whether the byte range covers the whole file except `/Contents`
    pub covers_whole_document: bool,
    /// Time asserted by an embedded timestamp token
    pub timestamp_time: Option<DateTime<Utc>>,
}

/// Verification status of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationStatus {
    /// Signature is valid and chains to a trusted root
    Valid,
    /// Signature is invalid (cryptographically or structurally)
    Invalid,
    /// Signature is intact but the chain does not reach a trusted root
    Unknown,
}

impl VerificationStatus {
    /// Check if the status indicates a valid signature.
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationStatus::Valid)
    }
}

/// Result of signature verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    /// Overall verification status
    pub status: VerificationStatus,
    /// Signature information
    pub signature_info: SignatureInfo,
    /// Problems found, in the order they were detected
    pub messages: Vec<String>,
    /// Whether the byte-range digest matches the signed message digest
    pub digest_valid: bool,
    /// Whether the signature over the signed attributes verifies
    pub signature_valid: bool,
    /// Whether the chain builds to a trusted root
    pub certificate_trusted: bool,
    /// Whether a certificate was outside its validity at signing time
    pub certificate_expired: bool,
    /// Whether the timestamp token verifies (if present)
    pub timestamp_valid: Option<bool>,
}

impl VerificationResult {
    pub(crate) fn new(info: SignatureInfo) -> Self {
        Self {
            status: VerificationStatus::Invalid,
            signature_info: info,
            messages: Vec::new(),
            digest_valid: false,
            signature_valid: false,
            certificate_trusted: false,
            certificate_expired: false,
            timestamp_valid: None,
        }
    }
}

/// Uppercase hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789ABCDEF";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}
