// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::large_enum_variant)]

//! # PDF Oxide Sign
//!
//! Digital signatures for existing PDF documents, applied as an incremental
//! update so the original bytes stay untouched.
//!
//! ## Core Features
//!
//! - **Incremental signing**: a new revision appends the signature field,
//!   widget, AcroForm entries and a cross-reference section (table or stream,
//!   matching the source)
//! - **Detached CMS**: `adbe.pkcs7.detached` or `ETSI.CAdES.detached`, RSA
//!   PKCS#1 v1.5 or ECDSA P-256, full certificate chain embedded
//! - **RFC 3161 timestamps**: token over the signature value attached as an
//!   unsigned attribute; pluggable transport with an HTTP(S) default
//! - **Verification**: byte-range digest, signature, chain to trusted roots,
//!   certificate validity and timestamp checks
//! - **Credentials**: PKCS#12 stores and PEM key/certificate files
//!
//! ## Quick Start
//!
//! ```no_run
//! use pdf_oxide_sign::config::{CredentialSource, SignerConfig, TsaConfig};
//! use pdf_oxide_sign::signatures::SignOptions;
//!
//! # fn main() -> pdf_oxide_sign::Result<()> {
//! let report = SignerConfig::new(
//!     "contract.pdf",
//!     "contract-signed.pdf",
//!     CredentialSource::pkcs12("signer.p12", "secret"),
//! )
//! .with_options(SignOptions::default().with_reason("Approved"))
//! .with_tsa(TsaConfig::new("http://timestamp.example.com/tsr"))
//! .sign()?;
//! println!("{} signed {}", report.signer, report.field_name);
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 (<http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license (<http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;

// Stream decoders
pub mod decoders;

// Incremental updates
pub mod writer;

// Digital signatures
pub mod signatures;

// Configuration
pub mod config;

// Re-exports
pub use config::{CredentialSource, SignerConfig, TsaConfig};
pub use document::PdfDocument;
pub use error::{Error, ErrorKind, Phase, Result, ResultExt};
pub use signatures::{
    PdfSigner, SignOptions, SignatureVerifier, SigningCredential, SigningReport, VerificationResult,
    VerificationStatus,
};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
