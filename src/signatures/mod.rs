//! PDF digital signatures.
//!
//! Signing appends one incremental revision holding a signature field and a
//! zero-filled `/Contents` placeholder, digests every byte except that
//! placeholder, and patches in a detached CMS SignedData blob. An RFC 3161
//! timestamp token over the signature value can be attached as an unsigned
//! attribute.
//!
//! ## Example
//!
//! ```no_run
//! use pdf_oxide_sign::signatures::{PdfSigner, SignOptions, SigningCredential};
//!
//! # fn main() -> pdf_oxide_sign::Result<()> {
//! let credential = SigningCredential::from_pkcs12_file("signer.p12", "secret")?;
//! let signer = PdfSigner::new(credential, SignOptions::default().with_reason("Approved"));
//! let report = signer.sign_file("contract.pdf", "contract-signed.pdf")?;
//! println!("signed with {} bytes to spare", report.reserved_len - report.signature_len);
//! # Ok(())
//! # }
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ETSI EN 319 142-1 - PAdES baseline signatures
//! - RFC 5652 (CMS), RFC 3161 (Time-Stamp Protocol), RFC 5035 (signingCertificateV2)

mod byterange;
pub mod cms;
mod credentials;
mod events;
pub mod keys;
mod signer;
pub mod timestamp;
mod types;
mod verifier;

pub use byterange::{ByteRangeDigestEngine, DocumentDigest, DEFAULT_CHUNK_SIZE};
pub use cms::{CmsSignature, CmsSignatureBuilder, VerifiedSigner};
pub use credentials::SigningCredential;
pub use events::{LogObserver, SigningEvent, SigningObserver};
pub use keys::{EcdsaP256SigningKey, RsaSigningKey, SignatureKey};
pub use signer::{PdfSigner, CMS_OVERHEAD};
#[cfg(feature = "tsa")]
pub use timestamp::HttpTransport;
pub use timestamp::{
    TimestampClient, TimestampToken, TsaTransport, DEFAULT_TIMEOUT, DEFAULT_TOKEN_SIZE_ESTIMATE,
};
pub use types::{
    to_hex, ByteRange, DigestAlgorithm, SignOptions, SignatureInfo,
    SignaturePlaceholder, SignatureSubFilter, SigningReport, VerificationResult, VerificationStatus,
};
pub use verifier::{parse_pdf_date, SignatureVerifier};
