//! PDF signature verification.
//!
//! Every signature field with a value is checked independently: the byte
//! range is digested and compared with the signed `messageDigest`, the
//! signature over the signed attributes is verified against the signer's
//! certificate, the certificate chain is built towards the configured
//! trusted roots, and an embedded timestamp token is validated against the
//! signature value it claims to cover.

use super::byterange::ByteRangeDigestEngine;
use super::cms::{self, VerifiedSigner};
use super::credentials::verify_issued_by;
use super::timestamp::TimestampToken;
use super::types::{ByteRange, SignatureInfo, SignatureSubFilter, VerificationResult, VerificationStatus};
use crate::document::{decode_text_string, PdfDocument};
use crate::error::{Error, Phase, Result, ResultExt};
use crate::object::{Dictionary, Object};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use der::Encode;
use std::path::Path;
use x509_cert::Certificate;
use x509_parser::prelude::{parse_x509_certificate, X509Certificate};

/// Longest issuer path followed before giving up.
const MAX_CHAIN_DEPTH: usize = 16;

/// Verifier for PDF digital signatures.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    trusted_roots: Vec<Certificate>,
}

impl SignatureVerifier {
    /// Verifier that trusts nothing; intact signatures report `Unknown`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trusted root certificate.
    pub fn with_trusted_root(mut self, certificate: Certificate) -> Self {
        self.trusted_roots.push(certificate);
        self
    }

    /// Add every certificate of a PEM bundle as a trusted root.
    pub fn add_trusted_pem(&mut self, pem: &str) -> Result<usize> {
        let certs = Certificate::load_pem_chain(pem.as_bytes())
            .map_err(|e| Error::Configuration(format!("invalid trusted root PEM: {}", e)))?;
        let count = certs.len();
        self.trusted_roots.extend(certs);
        Ok(count)
    }

    /// Read a PEM bundle of trusted roots.
    pub fn add_trusted_pem_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| Error::file(path, e))?;
        self.add_trusted_pem(&pem)
    }

    /// Number of trusted roots.
    pub fn trusted_root_count(&self) -> usize {
        self.trusted_roots.len()
    }

    /// Verify every signature in a file.
    pub fn verify_file(&self, path: impl AsRef<Path>) -> Result<Vec<VerificationResult>> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| Error::file(path, e))
            .during(Phase::Verify)?;
        self.verify_bytes(data)
    }

    /// Verify every signature in an in-memory document.
    ///
    /// Failing signatures are reported in the results; an `Err` means the
    /// document itself could not be read.
    pub fn verify_bytes(&self, data: impl Into<bytes::Bytes>) -> Result<Vec<VerificationResult>> {
        let mut doc = PdfDocument::from_bytes(data).during(Phase::Verify)?;
        let signatures = doc.signature_dictionaries().during(Phase::Verify)?;
        log::debug!("found {} signature(s)", signatures.len());

        let results: Vec<VerificationResult> = signatures
            .iter()
            .map(|(name, dict)| self.verify_signature(doc.data(), name, dict))
            .collect();
        for result in &results {
            log::info!(
                "signature {:?}: {:?}",
                result.signature_info.field_name,
                result.status
            );
        }
        Ok(results)
    }

    /// Verify one signature dictionary against the whole file `data`.
    pub fn verify_signature(&self, data: &[u8], field_name: &str, sig_dict: &Dictionary) -> VerificationResult {
        let mut result = VerificationResult::new(extract_signature_info(field_name, sig_dict));

        let Some(byte_range) = result.signature_info.byte_range else {
            result.messages.push("missing or unsupported /ByteRange".to_string());
            return result;
        };
        if let Err(problem) = check_byte_range(data, &byte_range) {
            result.messages.push(problem);
            return result;
        }
        result.signature_info.covers_whole_document = byte_range.end() == data.len() as u64;
        if !result.signature_info.covers_whole_document {
            result.messages.push(format!(
                "signature covers {} of {} bytes; the document was changed after signing",
                byte_range.end(),
                data.len()
            ));
        }

        let Some(contents) = sig_dict.get("Contents").and_then(Object::as_string) else {
            result.messages.push("missing /Contents".to_string());
            return result;
        };
        let signed_data = match cms::parse_signed_data(contents) {
            Ok(signed_data) => signed_data,
            Err(e) => {
                result.messages.push(e.to_string());
                return result;
            },
        };

        let mut computed = None;
        let outcome = cms::verify_signer(&signed_data, |algorithm| {
            let digest = ByteRangeDigestEngine::new(algorithm).digest_bytes(data, &byte_range)?.bytes;
            computed = Some(digest.clone());
            Ok(digest)
        });
        let signer = match outcome {
            Ok(signer) => signer,
            Err(e) => {
                result.digest_valid = computed.is_some() && cms::signed_message_digest(&signed_data) == computed;
                result.messages.push(e.to_string());
                return result;
            },
        };
        result.digest_valid = true;
        result.signature_valid = true;

        self.check_certificate(&signer, sig_dict, &mut result);
        result.status = overall_status(&result);
        result
    }

    fn check_certificate(&self, signer: &VerifiedSigner, sig_dict: &Dictionary, result: &mut VerificationResult) {
        let tbs = &signer.certificate.tbs_certificate;
        let info = &mut result.signature_info;
        info.certificate_subject = Some(tbs.subject.to_string());
        info.certificate_issuer = Some(tbs.issuer.to_string());
        if info.signer_name.is_none() {
            info.signer_name = common_name(&signer.certificate);
        }
        if signer.signing_time.is_some() {
            info.signing_time = signer.signing_time;
        }

        if let Some(token_der) = &signer.timestamp_token {
            let checked = check_timestamp(token_der, &signer.signature_value);
            match checked {
                Ok(gen_time) => {
                    result.timestamp_valid = Some(true);
                    result.signature_info.timestamp_time = Some(gen_time);
                },
                Err(e) => {
                    result.timestamp_valid = Some(false);
                    result.messages.push(format!("timestamp: {}", e));
                },
            }
        }

        let (path, trusted) = self.build_path(&signer.certificate, &signer.certificates);
        result.certificate_trusted = trusted;
        if !trusted {
            result.messages.push(format!(
                "certificate chain of {:?} does not reach a trusted root",
                signer.certificate.tbs_certificate.subject.to_string()
            ));
        }

        // Timestamp time is authoritative when present, then the signed
        // attribute, then /M.
        let reference = result
            .signature_info
            .timestamp_time
            .filter(|_| result.timestamp_valid == Some(true))
            .or(result.signature_info.signing_time)
            .or_else(|| sig_dict.get("M").and_then(Object::as_string).and_then(parse_pdf_date))
            .unwrap_or_else(Utc::now);
        for cert in &path {
            if let Some(problem) = validity_problem(cert, reference) {
                result.certificate_expired = true;
                result.messages.push(problem);
            }
        }
    }

    /// Follow issuers from `leaf` through the carried certificates and the
    /// trusted roots. Returns the path and whether it ends at a trusted root.
    fn build_path(&self, leaf: &Certificate, carried: &[Certificate]) -> (Vec<Certificate>, bool) {
        let mut path = vec![leaf.clone()];
        while path.len() <= MAX_CHAIN_DEPTH {
            let current = &path[path.len() - 1];
            if self.trusted_roots.contains(current) {
                return (path, true);
            }
            let issuer = self
                .trusted_roots
                .iter()
                .chain(carried)
                .filter(|candidate| candidate.tbs_certificate.subject == current.tbs_certificate.issuer)
                .filter(|candidate| !path.contains(candidate))
                .find(|candidate| verify_issued_by(current, candidate).is_ok())
                .cloned();
            match issuer {
                Some(issuer) => path.push(issuer),
                None => break,
            }
        }
        (path, false)
    }
}

fn overall_status(result: &VerificationResult) -> VerificationStatus {
    if !result.digest_valid
        || !result.signature_valid
        || result.certificate_expired
        || result.timestamp_valid == Some(false)
    {
        VerificationStatus::Invalid
    } else if !result.certificate_trusted || !result.signature_info.covers_whole_document {
        VerificationStatus::Unknown
    } else {
        VerificationStatus::Valid
    }
}

/// The byte range must stay inside the file and exclude exactly one hex
/// string.
fn check_byte_range(data: &[u8], range: &ByteRange) -> std::result::Result<(), String> {
    if range.end() > data.len() as u64 {
        return Err(format!("/ByteRange {} reaches past the end of the file ({} bytes)", range, data.len()));
    }
    let gap = range.gap();
    if gap.len < 2 || data[gap.offset as usize] != b'<' || data[(gap.end() - 1) as usize] != b'>' {
        return Err(format!("/ByteRange {} does not exclude exactly the /Contents string", range));
    }
    Ok(())
}

fn check_timestamp(token_der: &[u8], signature_value: &[u8]) -> Result<DateTime<Utc>> {
    let token = TimestampToken::from_der(token_der)?;
    if !token.covers(signature_value) {
        return Err(Error::Timestamp("message imprint does not match the signature value".to_string()));
    }
    token.verify_signature()?;
    Ok(token.gen_time())
}

fn extract_signature_info(field_name: &str, dict: &Dictionary) -> SignatureInfo {
    let text = |key: &str| dict.get(key).and_then(Object::as_string).map(decode_text_string);
    let byte_range = dict
        .get("ByteRange")
        .and_then(Object::as_array)
        .and_then(|values| values.iter().map(Object::as_integer).collect::<Option<Vec<i64>>>())
        .and_then(|values| ByteRange::from_values(&values).ok());

    SignatureInfo {
        field_name: field_name.to_string(),
        signer_name: text("Name"),
        signing_time: dict.get("M").and_then(Object::as_string).and_then(parse_pdf_date),
        reason: text("Reason"),
        location: text("Location"),
        contact_info: text("ContactInfo"),
        sub_filter: dict
            .get("SubFilter")
            .and_then(Object::as_name)
            .and_then(SignatureSubFilter::from_pdf_name),
        byte_range,
        ..SignatureInfo::default()
    }
}

fn with_parsed<T>(cert: &Certificate, f: impl FnOnce(&X509Certificate<'_>) -> Option<T>) -> Option<T> {
    let der = cert.to_der().ok()?;
    let (_, parsed) = parse_x509_certificate(&der).ok()?;
    f(&parsed)
}

fn common_name(cert: &Certificate) -> Option<String> {
    with_parsed(cert, |parsed| {
        parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string)
    })
}

fn validity_problem(cert: &Certificate, at: DateTime<Utc>) -> Option<String> {
    let (not_before, not_after) = with_parsed(cert, |parsed| {
        let validity = parsed.validity();
        Some((validity.not_before.timestamp(), validity.not_after.timestamp()))
    })?;
    let t = at.timestamp();
    if t < not_before || t > not_after {
        Some(format!(
            "certificate {:?} is not valid at {}",
            cert.tbs_certificate.subject.to_string(),
            at.to_rfc3339()
        ))
    } else {
        None
    }
}

/// Parse a PDF date (`D:YYYYMMDDHHmmSSOHH'mm'`). Missing trailing fields
/// default as in ISO 32000-1 §7.9.4.
pub fn parse_pdf_date(raw: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(raw).ok()?;
    let text = text.strip_prefix("D:").unwrap_or(text);
    let digits: String = text.chars().take_while(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return None;
    }
    let defaults = "0101000000";
    let mut full = digits.chars().take(14).collect::<String>();
    if full.len() < 14 {
        full.push_str(&defaults[full.len() - 4..]);
    }
    let naive = NaiveDateTime::parse_from_str(&full, "%Y%m%d%H%M%S").ok()?;

    let rest = &text[digits.len().min(14)..];
    let offset_secs = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let parts: Vec<i64> = rest[1..]
                .split('\'')
                .filter(|part| !part.is_empty())
                .take(2)
                .map(|part| part.parse().ok())
                .collect::<Option<Vec<i64>>>()?;
            let secs = parts.first().copied().unwrap_or(0) * 3600 + parts.get(1).copied().unwrap_or(0) * 60;
            if sign == '-' {
                -secs
            } else {
                secs
            }
        },
        _ => 0,
    };
    Some(Utc.from_utc_datetime(&naive) - chrono::Duration::seconds(offset_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig_dict() -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("Sig"));
        dict.insert("Filter".to_string(), Object::name("Adobe.PPKLite"));
        dict.insert("SubFilter".to_string(), Object::name("adbe.pkcs7.detached"));
        dict.insert("Name".to_string(), Object::text("Test Signer"));
        dict.insert("Reason".to_string(), Object::text("Testing"));
        dict.insert("Location".to_string(), Object::text("Test City"));
        dict.insert("M".to_string(), Object::text("D:20240101120000+02'00'"));
        dict.insert(
            "ByteRange".to_string(),
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(10),
                Object::Integer(16),
                Object::Integer(4),
            ]),
        );
        dict
    }

    #[test]
    fn test_extract_signature_info() {
        let info = extract_signature_info("Signature1", &sig_dict());
        assert_eq!(info.field_name, "Signature1");
        assert_eq!(info.signer_name.as_deref(), Some("Test Signer"));
        assert_eq!(info.reason.as_deref(), Some("Testing"));
        assert_eq!(info.location.as_deref(), Some("Test City"));
        assert_eq!(info.sub_filter, Some(SignatureSubFilter::Pkcs7Detached));
        assert_eq!(info.byte_range.unwrap().as_array(), [0, 10, 16, 4]);
        assert_eq!(
            info.signing_time,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_pdf_date_variants() {
        assert_eq!(
            parse_pdf_date(b"D:20240301123000Z"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
        assert_eq!(
            parse_pdf_date(b"D:20240301123000+00'00'"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
        assert_eq!(
            parse_pdf_date(b"D:20240301123000-05'30'"),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap())
        );
        assert_eq!(
            parse_pdf_date(b"D:2024"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_pdf_date(b"yesterday"), None);
    }

    #[test]
    fn test_byte_range_must_bracket_contents() {
        let data = b"0123456789<0000>wxyz";
        let good = ByteRange::from_values(&[0, 10, 16, 4]).unwrap();
        assert!(check_byte_range(data, &good).is_ok());

        let shifted = ByteRange::from_values(&[0, 9, 16, 4]).unwrap();
        assert!(check_byte_range(data, &shifted).is_err());

        let too_long = ByteRange::from_values(&[0, 10, 16, 5]).unwrap();
        assert!(check_byte_range(data, &too_long).is_err());
    }

    #[test]
    fn test_missing_contents_is_invalid() {
        let data = b"0123456789<0000>wxyz";
        let result = SignatureVerifier::new().verify_signature(data, "Signature1", &sig_dict());
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert!(result.signature_info.covers_whole_document);
        assert!(result.messages.iter().any(|m| m.contains("/Contents")));
    }

    #[test]
    fn test_garbage_contents_is_invalid() {
        let data = b"0123456789<0000>wxyz";
        let mut dict = sig_dict();
        dict.insert("Contents".to_string(), Object::String(vec![0x30, 0x03, 0x02, 0x01, 0x00]));
        let result = SignatureVerifier::new().verify_signature(data, "Signature1", &dict);
        assert_eq!(result.status, VerificationStatus::Invalid);
        assert!(!result.digest_valid);
        assert!(!result.signature_valid);
    }

    #[test]
    fn test_trusted_pem() {
        let mut verifier = SignatureVerifier::new();
        let pem = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/chain_cas.pem")).unwrap();
        assert_eq!(verifier.add_trusted_pem(&pem).unwrap(), 2);
        assert_eq!(verifier.trusted_root_count(), 2);
        assert!(verifier.add_trusted_pem("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n").is_err());
    }
}
