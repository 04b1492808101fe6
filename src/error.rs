//! Error types for PDF signing.
//!
//! Low-level failures (parsing, DER, crypto, network) are mapped onto a small
//! taxonomy exposed through [`ErrorKind`]. Errors leaving a signing operation
//! are wrapped with the [`Phase`] in which they happened, so callers can tell
//! configuration mistakes from transient network failures from document
//! corruption without parsing messages.

use std::fmt;
use std::path::PathBuf;

/// Result type alias for signing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Step of a signing (or verification) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Validating options before any I/O
    Configuration,
    /// Opening and decrypting the credential store
    LoadCredential,
    /// Reading and parsing the source document
    ReadDocument,
    /// Laying out the incremental update and placeholder
    PrepareUpdate,
    /// Hashing the byte ranges
    Digest,
    /// Producing the CMS signature
    Sign,
    /// Talking to the timestamp authority
    Timestamp,
    /// Patching and persisting the output file
    WriteOutput,
    /// Checking an existing signature
    Verify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Phase::Configuration => "configuration",
            Phase::LoadCredential => "loading credential",
            Phase::ReadDocument => "reading document",
            Phase::PrepareUpdate => "preparing incremental update",
            Phase::Digest => "computing digest",
            Phase::Sign => "signing",
            Phase::Timestamp => "timestamping",
            Phase::WriteOutput => "writing output",
            Phase::Verify => "verifying",
        };
        f.write_str(text)
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad or missing input, detected before any I/O
    Configuration,
    /// File open/read/write failure
    Io,
    /// Source document lacks a parseable structure
    MalformedPdf,
    /// Reserved signature space is smaller than the signature
    PlaceholderTooSmall,
    /// Key, chain or algorithm mismatch
    SigningKey,
    /// Network failure talking to the TSA (transient)
    TsaUnreachable,
    /// TSA answered with a status other than granted
    TsaRejected,
    /// TSA response could not be parsed or does not match the request
    TsaResponseMalformed,
    /// Digest algorithm name not accepted
    UnsupportedDigestAlgorithm,
    /// Timestamp token missing or inconsistent with the signature
    Timestamp,
    /// A cryptographic signature did not verify
    InvalidSignature,
    /// Document feature the signer does not handle
    Unsupported,
}

/// Error types that can occur while signing or verifying.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error on a specific file
    #[error("IO error on {}: {source}", path.display())]
    File {
        /// File being accessed
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// Structurally invalid document
    #[error("Malformed PDF: {0}")]
    MalformedPdf(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Unexpected end of file
    #[error("End of file reached unexpectedly")]
    UnexpectedEof,

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),

    /// Unsupported document feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Signature does not fit the reserved /Contents space
    #[error(
        "Signature placeholder too small: signature needs {required} bytes, {reserved} reserved"
    )]
    PlaceholderTooSmall {
        /// DER size of the finished signature
        required: usize,
        /// Bytes available in the placeholder
        reserved: usize,
    },

    /// Key, certificate chain or algorithm problem
    #[error("Signing key error: {0}")]
    SigningKey(String),

    /// Digest algorithm name not accepted
    #[error("Unsupported digest algorithm: {0} (expected \"SHA1\" or \"SHA-256\")")]
    UnsupportedDigestAlgorithm(String),

    /// TSA could not be reached
    #[error("Timestamp authority {url} unreachable: {reason}")]
    TsaUnreachable {
        /// TSA endpoint
        url: String,
        /// Underlying network failure
        reason: String,
    },

    /// TSA refused the request
    #[error("Timestamp authority rejected the request with status {status}{}", describe_rejection(.status_text, .failure_info))]
    TsaRejected {
        /// PKIStatus value
        status: u32,
        /// Free text returned by the TSA
        status_text: Option<String>,
        /// PKIFailureInfo flag names
        failure_info: Option<String>,
    },

    /// TSA response could not be parsed or failed validation
    #[error("Malformed timestamp response: {0}")]
    TsaResponseMalformed(String),

    /// Timestamp token problem outside the TSA exchange
    #[error("Timestamp error: {0}")]
    Timestamp(String),

    /// Signature, certificate or CMS structure did not verify
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Error annotated with the operation phase
    #[error("{phase} failed: {source}")]
    InPhase {
        /// Phase in which the error happened
        phase: Phase,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

fn describe_rejection(text: &Option<String>, failure: &Option<String>) -> String {
    let mut out = String::new();
    if let Some(text) = text {
        out.push_str(&format!(" ({})", text));
    }
    if let Some(failure) = failure {
        out.push_str(&format!(" [failure: {}]", failure));
    }
    out
}

impl Error {
    /// Attach a phase. An error that already carries one keeps it.
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            Error::InPhase { .. } => self,
            other => Error::InPhase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// IO error on a named file.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }

    /// Phase recorded on this error, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::InPhase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The error without phase annotations.
    pub fn root(&self) -> &Error {
        match self {
            Error::InPhase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Io(_) | Error::File { .. } => ErrorKind::Io,
            Error::MalformedPdf(_)
            | Error::ParseError { .. }
            | Error::InvalidXref
            | Error::ObjectNotFound(..)
            | Error::InvalidObjectType { .. }
            | Error::UnexpectedEof
            | Error::Decode(_)
            | Error::UnsupportedFilter(_)
            | Error::RecursionLimitExceeded(_) => ErrorKind::MalformedPdf,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::PlaceholderTooSmall { .. } => ErrorKind::PlaceholderTooSmall,
            Error::SigningKey(_) => ErrorKind::SigningKey,
            Error::UnsupportedDigestAlgorithm(_) => ErrorKind::UnsupportedDigestAlgorithm,
            Error::TsaUnreachable { .. } => ErrorKind::TsaUnreachable,
            Error::TsaRejected { .. } => ErrorKind::TsaRejected,
            Error::TsaResponseMalformed(_) => ErrorKind::TsaResponseMalformed,
            Error::Timestamp(_) => ErrorKind::Timestamp,
            Error::InvalidSignature(_) => ErrorKind::InvalidSignature,
            Error::InPhase { source, .. } => source.kind(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TsaUnreachable
    }

    /// Whether the failure came from the timestamping step.
    pub fn is_timestamp_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TsaUnreachable
                | ErrorKind::TsaRejected
                | ErrorKind::TsaResponseMalformed
                | ErrorKind::Timestamp
        ) || self.phase() == Some(Phase::Timestamp)
    }
}

/// Phase annotation for results.
pub trait ResultExt<T> {
    /// Record `phase` on the error, if any.
    fn during(self, phase: Phase) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn during(self, phase: Phase) -> Result<T> {
        self.map_err(|err| err.in_phase(phase))
    }
}
