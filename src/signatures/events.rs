//! Progress notifications for embedding applications.

use super::types::{ByteRange, DigestAlgorithm};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A step completed while signing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SigningEvent {
    /// Source document parsed
    DocumentLoaded {
        /// PDF version from the header
        version: String,
        /// Size of the original file
        size: u64,
    },
    /// Incremental update laid out
    PlaceholderReserved {
        /// New signature field
        field_name: String,
        /// Bytes reserved for the CMS blob
        capacity: usize,
        /// Ranges that will be signed
        byte_range: ByteRange,
    },
    /// Byte ranges hashed
    DigestComputed {
        /// Hash algorithm
        algorithm: DigestAlgorithm,
        /// Uppercase hex digest
        digest: String,
    },
    /// Request sent to the timestamp authority
    TimestampRequested {
        /// TSA endpoint
        endpoint: String,
    },
    /// Token received and validated
    TimestampReceived {
        /// Time asserted by the TSA
        gen_time: DateTime<Utc>,
    },
    /// Signature written into the placeholder
    SignatureEmbedded {
        /// Where the signed file was written
        output: PathBuf,
        /// DER size of the CMS blob
        signature_len: usize,
    },
}

/// Receives [`SigningEvent`]s.
pub trait SigningObserver: Send + Sync {
    /// Called once per event, in order.
    fn on_event(&self, event: &SigningEvent);
}

impl<F> SigningObserver for F
where
    F: Fn(&SigningEvent) + Send + Sync,
{
    fn on_event(&self, event: &SigningEvent) {
        self(event)
    }
}

/// Forwards events to the `log` facade at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogObserver;

impl SigningObserver for LogObserver {
    fn on_event(&self, event: &SigningEvent) {
        log::debug!("signing event: {:?}", event);
    }
}
