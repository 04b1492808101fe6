//! CMS SignedData construction and checking (RFC 5652).
//!
//! PDF signatures use a detached SignedData: the content is the byte-range
//! digest, carried in the `messageDigest` signed attribute. Timestamp
//! tokens use the same structure with an encapsulated TSTInfo, so one
//! builder serves both.

use super::byterange::DocumentDigest;
use super::credentials::SigningCredential;
use super::keys;
use super::timestamp::{TimestampClient, TimestampToken};
use super::types::{DigestAlgorithm, SignatureSubFilter};
use crate::error::{Error, Phase, Result, ResultExt};
use chrono::{DateTime, Datelike, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{GeneralizedTime, ObjectIdentifier, OctetString, SetOfVec, UtcTime};
use der::{Any, Decode, Encode, EncodeValue, Sequence, SliceReader, Tag, Tagged};
use spki::AlgorithmIdentifierOwned;
use std::time::Duration;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;
use x509_cert::Certificate;

/// id-data
pub const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
/// id-signedData
pub const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
/// id-ct-TSTInfo
pub const ID_CT_TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");

const ATTR_CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
const ATTR_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const ATTR_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
const ATTR_SIGNING_CERTIFICATE_V2: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
/// id-aa-timeStampToken
pub const ATTR_TIMESTAMP_TOKEN: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");

/// ESSCertIDv2 with the default SHA-256 hash algorithm (RFC 5035).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EssCertIdV2 {
    cert_hash: OctetString,
}

/// SigningCertificateV2 without policies.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SigningCertificateV2 {
    certs: Vec<EssCertIdV2>,
}

/// A finished CMS signature.
#[derive(Debug, Clone)]
pub struct CmsSignature {
    /// DER-encoded ContentInfo
    pub der: Vec<u8>,
    /// Raw signature value of the signer
    pub signature_value: Vec<u8>,
    /// Timestamp token attached as an unsigned attribute
    pub timestamp: Option<TimestampToken>,
}

/// Builds SignedData structures for one credential.
pub struct CmsSignatureBuilder<'a> {
    credential: &'a SigningCredential,
    digest_algorithm: DigestAlgorithm,
    sub_filter: SignatureSubFilter,
    signing_time: DateTime<Utc>,
    timestamp: Option<&'a TimestampClient>,
}

impl<'a> CmsSignatureBuilder<'a> {
    /// Builder signing with `credential` and hashing with `digest_algorithm`.
    pub fn new(credential: &'a SigningCredential, digest_algorithm: DigestAlgorithm) -> Self {
        Self {
            credential,
            digest_algorithm,
            sub_filter: SignatureSubFilter::default(),
            signing_time: Utc::now(),
            timestamp: None,
        }
    }

    /// Attribute profile: plain PKCS#7 or CAdES.
    pub fn with_sub_filter(mut self, sub_filter: SignatureSubFilter) -> Self {
        self.sub_filter = sub_filter;
        self
    }

    /// Claimed signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = time;
        self
    }

    /// Obtain a timestamp token over the signature value.
    pub fn with_timestamp(mut self, client: &'a TimestampClient) -> Self {
        self.timestamp = Some(client);
        self
    }

    /// Detached signature over a byte-range digest.
    pub fn build_detached(&self, digest: &DocumentDigest) -> Result<CmsSignature> {
        if digest.algorithm != self.digest_algorithm {
            return Err(Error::Configuration(format!(
                "digest computed with {} but signer is configured for {}",
                digest.algorithm, self.digest_algorithm
            )));
        }

        let mut attrs = vec![
            attribute(ATTR_CONTENT_TYPE, encode_any(&ID_DATA)?)?,
            attribute(ATTR_MESSAGE_DIGEST, octet_string_any(&digest.bytes)?)?,
        ];
        match self.sub_filter {
            SignatureSubFilter::Pkcs7Detached => {
                attrs.push(attribute(ATTR_SIGNING_TIME, encode_any(&asn1_time(&self.signing_time)?)?)?);
            },
            SignatureSubFilter::CadesDetached => {
                attrs.push(self.signing_certificate_attribute()?);
            },
        }

        let mut signer_info = self.signer_info(attrs).during(Phase::Sign)?;
        let signature_value = signer_info.signature.as_bytes().to_vec();

        let timestamp = match self.timestamp {
            Some(client) => {
                let token = client.timestamp(&signature_value)?;
                let value = Any::from_der(&token.der)
                    .map_err(|e| Error::TsaResponseMalformed(format!("token is not valid DER: {}", e)))
                    .during(Phase::Timestamp)?;
                let attrs = SetOfVec::try_from(vec![attribute(ATTR_TIMESTAMP_TOKEN, value)?]).map_err(asn1_error)?;
                signer_info.unsigned_attrs = Some(attrs);
                Some(token)
            },
            None => None,
        };

        let der = self.signed_data(signer_info, EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        })?;
        log::info!(
            "built {} CMS signature: {} bytes{}",
            self.sub_filter.as_pdf_name(),
            der.len(),
            if timestamp.is_some() { " with timestamp" } else { "" }
        );

        Ok(CmsSignature {
            der,
            signature_value,
            timestamp,
        })
    }

    /// SignedData with `content` encapsulated under `content_type`.
    pub fn build_encapsulated(&self, content_type: ObjectIdentifier, content: &[u8]) -> Result<Vec<u8>> {
        let attrs = vec![
            attribute(ATTR_CONTENT_TYPE, encode_any(&content_type)?)?,
            attribute(ATTR_MESSAGE_DIGEST, octet_string_any(&self.digest_algorithm.digest(content))?)?,
            self.signing_certificate_attribute()?,
        ];
        let signer_info = self.signer_info(attrs)?;
        self.signed_data(signer_info, EncapsulatedContentInfo {
            econtent_type: content_type,
            econtent: Some(octet_string_any(content)?),
        })
    }

    fn signing_certificate_attribute(&self) -> Result<Attribute> {
        let cert_der = self.credential.certificate().to_der().map_err(asn1_error)?;
        let value = SigningCertificateV2 {
            certs: vec![EssCertIdV2 {
                cert_hash: OctetString::new(DigestAlgorithm::Sha256.digest(&cert_der)).map_err(asn1_error)?,
            }],
        };
        attribute(ATTR_SIGNING_CERTIFICATE_V2, encode_any(&value)?)
    }

    /// Sign the DER SET encoding of `attrs`.
    fn signer_info(&self, attrs: Vec<Attribute>) -> Result<SignerInfo> {
        let signed_attrs = SetOfVec::try_from(attrs).map_err(asn1_error)?;
        let to_sign = signed_attrs.to_der().map_err(asn1_error)?;

        let key = self.credential.key();
        let signature = key.sign_prehash(self.digest_algorithm, &self.digest_algorithm.digest(&to_sign))?;
        let leaf = self.credential.certificate();

        Ok(SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: leaf.tbs_certificate.issuer.clone(),
                serial_number: leaf.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: digest_algorithm_identifier(self.digest_algorithm),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: key.signature_algorithm(self.digest_algorithm)?,
            signature: OctetString::new(signature).map_err(asn1_error)?,
            unsigned_attrs: None,
        })
    }

    fn signed_data(&self, signer_info: SignerInfo, encap_content_info: EncapsulatedContentInfo) -> Result<Vec<u8>> {
        let certificates: Vec<CertificateChoices> = self
            .credential
            .chain()
            .iter()
            .cloned()
            .map(CertificateChoices::Certificate)
            .collect();

        let version = if encap_content_info.econtent_type == ID_DATA {
            CmsVersion::V1
        } else {
            CmsVersion::V3
        };

        let signed_data = SignedData {
            version,
            digest_algorithms: SetOfVec::try_from(vec![digest_algorithm_identifier(self.digest_algorithm)])
                .map_err(asn1_error)?,
            encap_content_info,
            certificates: Some(CertificateSet(SetOfVec::try_from(certificates).map_err(asn1_error)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info]).map_err(asn1_error)?),
        };

        ContentInfo {
            content_type: ID_SIGNED_DATA,
            content: encode_any(&signed_data)?,
        }
        .to_der()
        .map_err(asn1_error)
    }
}

/// What [`verify_signer`] established about the first signer.
#[derive(Debug, Clone)]
pub struct VerifiedSigner {
    /// Certificate identified by the SignerInfo
    pub certificate: Certificate,
    /// Other certificates carried in the SignedData
    pub certificates: Vec<Certificate>,
    /// Digest algorithm of the SignerInfo
    pub digest_algorithm: DigestAlgorithm,
    /// `signingTime` signed attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// Raw signature value
    pub signature_value: Vec<u8>,
    /// DER of an attached timestamp token
    pub timestamp_token: Option<Vec<u8>>,
}

/// Decode a ContentInfo holding SignedData.
///
/// Trailing bytes after the structure are ignored: PDF `/Contents` values
/// are zero-padded to the reserved size.
pub fn parse_signed_data(der: &[u8]) -> Result<SignedData> {
    let mut reader = SliceReader::new(der).map_err(|e| Error::InvalidSignature(format!("bad DER: {}", e)))?;
    let content_info = ContentInfo::decode(&mut reader)
        .map_err(|e| Error::InvalidSignature(format!("not a CMS ContentInfo: {}", e)))?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(Error::InvalidSignature(format!(
            "content type {} is not signedData",
            content_info.content_type
        )));
    }
    content_info
        .content
        .decode_as::<SignedData>()
        .map_err(|e| Error::InvalidSignature(format!("invalid SignedData: {}", e)))
}

/// Encapsulated content bytes, if any.
pub fn encapsulated_content(signed_data: &SignedData) -> Result<Option<Vec<u8>>> {
    match &signed_data.encap_content_info.econtent {
        Some(any) => any
            .decode_as::<OctetString>()
            .map(|octets| Some(octets.as_bytes().to_vec()))
            .map_err(|e| Error::InvalidSignature(format!("eContent is not an OCTET STRING: {}", e))),
        None => Ok(None),
    }
}

/// Check the first SignerInfo of `signed_data`.
///
/// `content_digest` receives the signer's digest algorithm and returns the
/// digest of the signed content. The `messageDigest` and `contentType`
/// attributes are compared and the signature checked against the signer's
/// certificate. Certificate trust is not evaluated here.
pub fn verify_signer<F>(signed_data: &SignedData, content_digest: F) -> Result<VerifiedSigner>
where
    F: FnOnce(DigestAlgorithm) -> Result<Vec<u8>>,
{
    let signer_info = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| Error::InvalidSignature("SignedData has no signer".to_string()))?;

    let certificates: Vec<Certificate> = signed_data
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(cert) => Some(cert.clone()),
            _ => None,
        })
        .collect();

    let certificate = find_signer_certificate(&signer_info.sid, &certificates)?;

    let digest_algorithm = DigestAlgorithm::from_oid(&signer_info.digest_alg.oid).ok_or_else(|| {
        Error::UnsupportedDigestAlgorithm(signer_info.digest_alg.oid.to_string())
    })?;
    let expected = content_digest(digest_algorithm)?;
    let signature_value = signer_info.signature.as_bytes().to_vec();
    let spki = &certificate.tbs_certificate.subject_public_key_info;

    let mut signing_time = None;
    match &signer_info.signed_attrs {
        Some(attrs) => {
            let message_digest = find_attribute(attrs.iter(), &ATTR_MESSAGE_DIGEST)
                .ok_or_else(|| Error::InvalidSignature("messageDigest attribute missing".to_string()))?
                .decode_as::<OctetString>()
                .map_err(|e| Error::InvalidSignature(format!("invalid messageDigest: {}", e)))?;
            if message_digest.as_bytes() != expected.as_slice() {
                return Err(Error::InvalidSignature(
                    "messageDigest does not match the signed content".to_string(),
                ));
            }

            if let Some(content_type) = find_attribute(attrs.iter(), &ATTR_CONTENT_TYPE) {
                let content_type = content_type
                    .decode_as::<ObjectIdentifier>()
                    .map_err(|e| Error::InvalidSignature(format!("invalid contentType: {}", e)))?;
                if content_type != signed_data.encap_content_info.econtent_type {
                    return Err(Error::InvalidSignature(format!(
                        "contentType attribute {} differs from eContentType {}",
                        content_type, signed_data.encap_content_info.econtent_type
                    )));
                }
            }

            signing_time = find_attribute(attrs.iter(), &ATTR_SIGNING_TIME)
                .and_then(|any| any.to_der().ok())
                .and_then(|der| Time::from_der(&der).ok())
                .and_then(|time| chrono_time(&time));

            let to_verify = attrs.to_der().map_err(asn1_error)?;
            keys::verify_prehash(spki, digest_algorithm, &digest_algorithm.digest(&to_verify), &signature_value)?;
        },
        None => keys::verify_prehash(spki, digest_algorithm, &expected, &signature_value)?,
    }

    let timestamp_token = signer_info
        .unsigned_attrs
        .as_ref()
        .and_then(|attrs| find_attribute(attrs.iter(), &ATTR_TIMESTAMP_TOKEN))
        .map(|any| any.to_der())
        .transpose()
        .map_err(asn1_error)?;

    Ok(VerifiedSigner {
        certificate,
        certificates,
        digest_algorithm,
        signing_time,
        signature_value,
        timestamp_token,
    })
}

/// `messageDigest` signed attribute of the first signer.
pub fn signed_message_digest(signed_data: &SignedData) -> Option<Vec<u8>> {
    let signer_info = signed_data.signer_infos.0.iter().next()?;
    let attrs = signer_info.signed_attrs.as_ref()?;
    find_attribute(attrs.iter(), &ATTR_MESSAGE_DIGEST)
        .and_then(|any| any.decode_as::<OctetString>().ok())
        .map(|octets| octets.as_bytes().to_vec())
}

fn find_signer_certificate(sid: &SignerIdentifier, certificates: &[Certificate]) -> Result<Certificate> {
    let found = match sid {
        SignerIdentifier::IssuerAndSerialNumber(id) => certificates.iter().find(|cert| {
            cert.tbs_certificate.issuer == id.issuer && cert.tbs_certificate.serial_number == id.serial_number
        }),
        // Subject key identifiers are only resolved when there is no choice.
        SignerIdentifier::SubjectKeyIdentifier(_) if certificates.len() == 1 => certificates.first(),
        SignerIdentifier::SubjectKeyIdentifier(_) => None,
    };
    found
        .cloned()
        .ok_or_else(|| Error::InvalidSignature("signer certificate not included in SignedData".to_string()))
}

fn find_attribute<'a>(
    mut attrs: impl Iterator<Item = &'a Attribute>,
    oid: &ObjectIdentifier,
) -> Option<&'a Any> {
    attrs.find(|attr| &attr.oid == oid).and_then(|attr| attr.values.iter().next())
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value]).map_err(asn1_error)?,
    })
}

fn encode_any<T: EncodeValue + Tagged>(value: &T) -> Result<Any> {
    Any::encode_from(value).map_err(asn1_error)
}

fn octet_string_any(bytes: &[u8]) -> Result<Any> {
    Any::new(Tag::OctetString, bytes.to_vec()).map_err(asn1_error)
}

fn digest_algorithm_identifier(digest: DigestAlgorithm) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: digest.oid(),
        parameters: None,
    }
}

/// UTCTime through 2049, GeneralizedTime after (RFC 5280 §4.1.2.5).
pub(crate) fn asn1_time(time: &DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(time.timestamp())
        .map_err(|_| Error::Configuration(format!("time {} is before 1970", time)))?;
    let duration = Duration::from_secs(secs);
    if time.year() < 2050 {
        UtcTime::from_unix_duration(duration).map(Time::UtcTime).map_err(asn1_error)
    } else {
        GeneralizedTime::from_unix_duration(duration)
            .map(Time::GeneralTime)
            .map_err(asn1_error)
    }
}

pub(crate) fn chrono_time(time: &Time) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(time.to_unix_duration().as_secs()).ok()?;
    DateTime::from_timestamp(secs, 0)
}

fn asn1_error(e: der::Error) -> Error {
    Error::SigningKey(format!("ASN.1 encoding failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::byterange::DocumentDigest;
    use chrono::TimeZone;

    fn credential(key: &str, certs: &[&str]) -> SigningCredential {
        let read = |name: &str| {
            std::fs::read_to_string(format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)).unwrap()
        };
        let bundle: String = certs.iter().map(|name| read(name)).collect();
        SigningCredential::from_pem(&read(key), &bundle).unwrap()
    }

    fn digest_of(data: &[u8]) -> DocumentDigest {
        DocumentDigest {
            algorithm: DigestAlgorithm::Sha256,
            bytes: DigestAlgorithm::Sha256.digest(data),
        }
    }

    #[test]
    fn test_detached_signature_verifies() {
        let cred = credential("leaf_key.pem", &["leaf.pem", "intermediate.pem", "root_ca.pem"]);
        let time = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let signature = CmsSignatureBuilder::new(&cred, DigestAlgorithm::Sha256)
            .with_signing_time(time)
            .build_detached(&digest_of(b"covered bytes"))
            .unwrap();
        assert!(signature.timestamp.is_none());

        // Zero padding as found in a PDF /Contents value.
        let mut padded = signature.der.clone();
        padded.resize(padded.len() + 100, 0);
        let signed_data = parse_signed_data(&padded).unwrap();
        assert_eq!(signed_data.version, CmsVersion::V1);
        assert!(encapsulated_content(&signed_data).unwrap().is_none());

        let signer = verify_signer(&signed_data, |alg| Ok(alg.digest(b"covered bytes"))).unwrap();
        assert_eq!(signer.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(signer.certificates.len(), 3);
        assert_eq!(signer.signing_time, Some(time));
        assert_eq!(signer.signature_value, signature.signature_value);
        assert!(signer
            .certificate
            .tbs_certificate
            .subject
            .to_string()
            .contains("Chain Leaf Signer"));
    }

    #[test]
    fn test_tampered_content_is_rejected() {
        let cred = credential("self_signed_key.pem", &["self_signed_cert.pem"]);
        let signature = CmsSignatureBuilder::new(&cred, DigestAlgorithm::Sha256)
            .build_detached(&digest_of(b"original"))
            .unwrap();
        let signed_data = parse_signed_data(&signature.der).unwrap();
        let err = verify_signer(&signed_data, |alg| Ok(alg.digest(b"modified"))).unwrap_err();
        assert!(matches!(err, Error::InvalidSignature(_)));
    }

    #[test]
    fn test_cades_profile_has_signing_certificate() {
        let cred = credential("ec_key.pem", &["ec_cert.pem"]);
        let signature = CmsSignatureBuilder::new(&cred, DigestAlgorithm::Sha256)
            .with_sub_filter(SignatureSubFilter::CadesDetached)
            .build_detached(&digest_of(b"data"))
            .unwrap();
        let signed_data = parse_signed_data(&signature.der).unwrap();
        let signer_info = signed_data.signer_infos.0.iter().next().unwrap();
        let attrs = signer_info.signed_attrs.as_ref().unwrap();
        assert!(find_attribute(attrs.iter(), &ATTR_SIGNING_CERTIFICATE_V2).is_some());
        assert!(find_attribute(attrs.iter(), &ATTR_SIGNING_TIME).is_none());

        let signer = verify_signer(&signed_data, |alg| Ok(alg.digest(b"data"))).unwrap();
        assert!(signer.signing_time.is_none());
    }

    #[test]
    fn test_encapsulated_content() {
        let cred = credential("tsa_key.pem", &["tsa_cert.pem"]);
        let der = CmsSignatureBuilder::new(&cred, DigestAlgorithm::Sha256)
            .build_encapsulated(ID_CT_TST_INFO, b"payload")
            .unwrap();
        let signed_data = parse_signed_data(&der).unwrap();
        assert_eq!(signed_data.version, CmsVersion::V3);
        assert_eq!(signed_data.encap_content_info.econtent_type, ID_CT_TST_INFO);
        let content = encapsulated_content(&signed_data).unwrap().unwrap();
        assert_eq!(content, b"payload");
        verify_signer(&signed_data, |alg| Ok(alg.digest(&content))).unwrap();
    }

    #[test]
    fn test_digest_algorithm_mismatch() {
        let cred = credential("self_signed_key.pem", &["self_signed_cert.pem"]);
        let err = CmsSignatureBuilder::new(&cred, DigestAlgorithm::Sha1)
            .build_detached(&digest_of(b"x"))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_not_signed_data() {
        assert!(matches!(parse_signed_data(&[0x30, 0x00]), Err(Error::InvalidSignature(_))));
        assert!(matches!(parse_signed_data(b"garbage"), Err(Error::InvalidSignature(_))));
    }

    #[test]
    fn test_asn1_time_switches_to_generalized() {
        let early = Utc.with_ymd_and_hms(2049, 12, 31, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2050, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(asn1_time(&early).unwrap(), Time::UtcTime(_)));
        assert!(matches!(asn1_time(&late).unwrap(), Time::GeneralTime(_)));
        assert_eq!(chrono_time(&asn1_time(&late).unwrap()), Some(late));
    }
}
