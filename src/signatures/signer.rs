//! Signing orchestration.
//!
//! [`PdfSigner`] drives one signature from source file to output file:
//! parse, lay out the incremental revision, write it to a temporary file
//! next to the destination, digest the byte ranges, build the CMS blob
//! (optionally timestamped) and patch it into the placeholder. The
//! temporary file only replaces the destination once everything succeeded,
//! so a failure at any step leaves the destination untouched.

use super::byterange::ByteRangeDigestEngine;
use super::cms::CmsSignatureBuilder;
use super::credentials::SigningCredential;
use super::events::{LogObserver, SigningEvent, SigningObserver};
use super::timestamp::TimestampClient;
use super::types::{SignOptions, SigningReport};
use crate::document::PdfDocument;
use crate::error::{Error, Phase, Result, ResultExt};
use crate::writer::{embed_signature, write_update, IncrementalPdfWriter};
use chrono::{DateTime, Utc};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Room reserved for SignedData framing, signed attributes and the
/// signature value on top of the certificates.
pub const CMS_OVERHEAD: usize = 4096;

/// Signs PDF documents with one credential.
pub struct PdfSigner {
    credential: SigningCredential,
    options: SignOptions,
    timestamp: Option<TimestampClient>,
    observer: Box<dyn SigningObserver>,
}

impl PdfSigner {
    /// Signer without a timestamp authority.
    pub fn new(credential: SigningCredential, options: SignOptions) -> Self {
        Self {
            credential,
            options,
            timestamp: None,
            observer: Box::new(LogObserver),
        }
    }

    /// Embed an RFC 3161 token obtained from `client`.
    pub fn with_timestamp(mut self, client: TimestampClient) -> Self {
        self.timestamp = Some(client);
        self
    }

    /// Report progress to `observer` instead of the log.
    pub fn with_observer(mut self, observer: impl SigningObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// The signing credential.
    pub fn credential(&self) -> &SigningCredential {
        &self.credential
    }

    /// The signing options.
    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// The timestamp client, if any.
    pub fn timestamp_client(&self) -> Option<&TimestampClient> {
        self.timestamp.as_ref()
    }

    /// Number of DER bytes reserved for the signature.
    ///
    /// An explicit [`SignOptions::estimated_size`] wins. Otherwise the
    /// certificate chain plus [`CMS_OVERHEAD`] plus the timestamp client's
    /// token estimate.
    pub fn placeholder_capacity(&self) -> usize {
        if let Some(size) = self.options.estimated_size {
            return size;
        }
        let token = self.timestamp.as_ref().map_or(0, TimestampClient::token_size_estimate);
        self.credential.chain_der_len() + CMS_OVERHEAD + token
    }

    /// Sign `input` and write the result to `output`.
    ///
    /// `input` and `output` may be the same path. The output is written to a
    /// temporary file in the destination directory and renamed into place.
    pub fn sign_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<SigningReport> {
        let input = input.as_ref();
        let output = output.as_ref();

        let data = std::fs::read(input)
            .map_err(|e| Error::file(input, e))
            .during(Phase::ReadDocument)?;
        let mut doc = PdfDocument::from_bytes(data).during(Phase::ReadDocument)?;

        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut staged = tempfile::Builder::new()
            .prefix(".pdf-oxide-sign-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| Error::file(&dir, e))
            .during(Phase::WriteOutput)?;

        let report = self.sign_into(&mut doc, staged.as_file_mut(), output)?;

        staged
            .persist(output)
            .map_err(|e| Error::file(output, e.error))
            .during(Phase::WriteOutput)?;
        log::info!(
            "signed {} -> {} ({} of {} bytes used)",
            input.display(),
            output.display(),
            report.signature_len,
            report.reserved_len
        );
        Ok(report)
    }

    /// Sign an in-memory document and return the signed bytes.
    pub fn sign_bytes(&self, data: impl Into<bytes::Bytes>) -> Result<(Vec<u8>, SigningReport)> {
        let mut doc = PdfDocument::from_bytes(data).during(Phase::ReadDocument)?;
        let mut out = Cursor::new(Vec::new());
        let report = self.sign_into(&mut doc, &mut out, Path::new(""))?;
        Ok((out.into_inner(), report))
    }

    fn sign_into<F>(&self, doc: &mut PdfDocument, out: &mut F, destination: &Path) -> Result<SigningReport>
    where
        F: Read + Write + Seek,
    {
        let (major, minor) = doc.version();
        self.observer.on_event(&SigningEvent::DocumentLoaded {
            version: format!("{}.{}", major, minor),
            size: doc.data().len() as u64,
        });

        let signing_time = self.signing_time();
        let capacity = self.placeholder_capacity();
        let update = IncrementalPdfWriter::new(doc)
            .prepare(&self.options, signing_time, capacity)
            .during(Phase::PrepareUpdate)?;
        self.observer.on_event(&SigningEvent::PlaceholderReserved {
            field_name: update.field_name.clone(),
            capacity: update.placeholder.capacity(),
            byte_range: update.byte_range,
        });

        out.seek(SeekFrom::Start(0)).map_err(Error::from).during(Phase::WriteOutput)?;
        write_update(out, doc.data(), &update).during(Phase::WriteOutput)?;
        out.flush().map_err(Error::from).during(Phase::WriteOutput)?;

        let digest = ByteRangeDigestEngine::new(self.options.digest_algorithm)
            .digest(out, &update.byte_range)
            .during(Phase::Digest)?;
        self.observer.on_event(&SigningEvent::DigestComputed {
            algorithm: digest.algorithm,
            digest: digest.to_hex(),
        });

        let mut builder = CmsSignatureBuilder::new(&self.credential, self.options.digest_algorithm)
            .with_sub_filter(self.options.sub_filter)
            .with_signing_time(signing_time);
        if let Some(client) = &self.timestamp {
            self.observer.on_event(&SigningEvent::TimestampRequested {
                endpoint: client.endpoint(),
            });
            builder = builder.with_timestamp(client);
        }
        let signature = builder.build_detached(&digest).during(Phase::Sign)?;
        let timestamp_time = signature.timestamp.as_ref().map(|token| token.gen_time());
        if let Some(gen_time) = timestamp_time {
            self.observer.on_event(&SigningEvent::TimestampReceived { gen_time });
        }

        embed_signature(out, &update.placeholder, &signature.der).during(Phase::WriteOutput)?;
        self.observer.on_event(&SigningEvent::SignatureEmbedded {
            output: destination.to_path_buf(),
            signature_len: signature.der.len(),
        });

        Ok(SigningReport {
            output: destination.to_path_buf(),
            field_name: update.field_name,
            byte_range: update.byte_range,
            digest_algorithm: digest.algorithm,
            digest: digest.to_hex(),
            signature_len: signature.der.len(),
            reserved_len: update.placeholder.capacity(),
            signer: self.credential.subject(),
            signing_time,
            timestamp_time,
        })
    }

    /// Configured time, or now truncated to whole seconds (the resolution
    /// of both `/M` and UTCTime).
    fn signing_time(&self) -> DateTime<Utc> {
        self.options.signing_time.unwrap_or_else(|| {
            let now = Utc::now();
            DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
        })
    }
}

impl std::fmt::Debug for PdfSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfSigner")
            .field("credential", &self.credential)
            .field("options", &self.options)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::signatures::types::SignatureSubFilter;
    use crate::signatures::verifier::SignatureVerifier;
    use chrono::TimeZone;
    use std::sync::{Arc, Mutex};

    fn fixture_path(name: &str) -> String {
        format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    fn credential() -> SigningCredential {
        SigningCredential::from_pkcs12_file(fixture_path("self_signed.p12"), "test123").unwrap()
    }

    fn options() -> SignOptions {
        SignOptions::default().with_signing_time(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap())
    }

    #[test]
    fn test_placeholder_capacity_estimate() {
        let signer = PdfSigner::new(credential(), SignOptions::default());
        assert_eq!(signer.placeholder_capacity(), signer.credential().chain_der_len() + CMS_OVERHEAD);

        let fixed = PdfSigner::new(credential(), SignOptions::default().with_estimated_size(9000));
        assert_eq!(fixed.placeholder_capacity(), 9000);
    }

    #[test]
    fn test_sign_bytes_keeps_original_prefix() {
        let original = std::fs::read(fixture_path("one_page.pdf")).unwrap();
        let signer = PdfSigner::new(credential(), options().with_reason("Approved"));
        let (signed, report) = signer.sign_bytes(original.clone()).unwrap();

        assert_eq!(&signed[..original.len()], original.as_slice());
        assert_eq!(report.byte_range.end(), signed.len() as u64);
        assert_eq!(report.field_name, "Signature1");
        assert!(report.signature_len <= report.reserved_len);
        assert!(report.timestamp_time.is_none());
        assert!(signed.ends_with(b"%%EOF\n"));

        let gap = report.byte_range.gap();
        assert_eq!(signed[gap.offset as usize], b'<');
        assert_eq!(signed[(gap.end() - 1) as usize], b'>');
    }

    #[test]
    fn test_signed_bytes_verify() {
        let original = std::fs::read(fixture_path("one_page.pdf")).unwrap();
        let signer = PdfSigner::new(credential(), options().with_sub_filter(SignatureSubFilter::CadesDetached));
        let (signed, _) = signer.sign_bytes(original).unwrap();

        let results = SignatureVerifier::new().verify_bytes(signed).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].digest_valid, "{:?}", results[0].messages);
        assert!(results[0].signature_valid);
        assert_eq!(
            results[0].signature_info.sub_filter,
            Some(SignatureSubFilter::CadesDetached)
        );
    }

    #[test]
    fn test_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let signer = PdfSigner::new(credential(), options())
            .with_observer(move |event: &SigningEvent| sink.lock().unwrap().push(event.clone()));
        signer
            .sign_bytes(std::fs::read(fixture_path("one_page.pdf")).unwrap())
            .unwrap();

        let events = seen.lock().unwrap();
        let names: Vec<&str> = events
            .iter()
            .map(|event| match event {
                SigningEvent::DocumentLoaded { .. } => "loaded",
                SigningEvent::PlaceholderReserved { .. } => "reserved",
                SigningEvent::DigestComputed { .. } => "digest",
                SigningEvent::TimestampRequested { .. } => "ts_req",
                SigningEvent::TimestampReceived { .. } => "ts_recv",
                SigningEvent::SignatureEmbedded { .. } => "embedded",
            })
            .collect();
        assert_eq!(names, ["loaded", "reserved", "digest", "embedded"]);
    }

    #[test]
    fn test_placeholder_too_small() {
        let signer = PdfSigner::new(credential(), options().with_estimated_size(64));
        let err = signer
            .sign_bytes(std::fs::read(fixture_path("one_page.pdf")).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlaceholderTooSmall);
        match err.root() {
            Error::PlaceholderTooSmall { required, reserved } => {
                assert_eq!(*reserved, 64);
                assert!(*required > 64);
            },
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_malformed_input_reports_read_phase() {
        let signer = PdfSigner::new(credential(), options());
        let err = signer.sign_bytes(b"not a pdf".to_vec()).unwrap_err();
        assert_eq!(err.phase(), Some(Phase::ReadDocument));
        assert_eq!(err.kind(), ErrorKind::MalformedPdf);
    }

    #[test]
    fn test_sign_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        std::fs::copy(fixture_path("one_page.pdf"), &path).unwrap();
        let before = std::fs::read(&path).unwrap();

        let report = PdfSigner::new(credential(), options()).sign_file(&path, &path).unwrap();
        let after = std::fs::read(&path).unwrap();
        assert_eq!(&after[..before.len()], before.as_slice());
        assert_eq!(report.output, path);
        assert_eq!(report.byte_range.end(), after.len() as u64);

        // Only the signed file remains in the directory.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PdfSigner::new(credential(), options())
            .sign_file(dir.path().join("missing.pdf"), dir.path().join("out.pdf"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.phase(), Some(Phase::ReadDocument));
        assert!(!dir.path().join("out.pdf").exists());
    }
}
