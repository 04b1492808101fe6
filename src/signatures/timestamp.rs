//! RFC 3161 timestamp client.
//!
//! A request carries the hash of the data to timestamp, a random nonce and
//! `certReq = TRUE`. The response must be granted, and the token's TSTInfo
//! must echo both the message imprint and the nonce. The transport is a
//! trait so HTTP can be replaced in tests or batch systems.

use super::cms::{self, ID_CT_TST_INFO};
use super::types::DigestAlgorithm;
use crate::error::{Error, Phase, Result, ResultExt};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use der::asn1::{BitString, GeneralizedTime, Int, ObjectIdentifier, OctetString};
use der::{
    Any, Decode, DecodeValue, Encode, EncodeValue, FixedTag, Header, Length, Reader, Sequence, Tag, Tagged,
    Writer,
};
use spki::AlgorithmIdentifierOwned;
use std::time::Duration;
use x509_cert::Certificate;

/// Default HTTP timeout for a TSA exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(65);

/// Placeholder space reserved for a timestamp token unless configured.
pub const DEFAULT_TOKEN_SIZE_ESTIMATE: usize = 16 * 1024;

/// Carries DER requests to a timestamp authority.
pub trait TsaTransport: Send + Sync {
    /// Send a TimeStampReq and return the raw TimeStampResp.
    ///
    /// Network failures and non-success HTTP statuses are reported as
    /// [`Error::TsaUnreachable`].
    fn send(&self, request: &[u8]) -> Result<Vec<u8>>;

    /// Endpoint description for logs and errors.
    fn endpoint(&self) -> String;
}

/// HTTP(S) transport with optional basic authentication.
#[cfg(feature = "tsa")]
pub struct HttpTransport {
    url: String,
    username: Option<String>,
    password: Option<zeroize::Zeroizing<String>>,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

#[cfg(feature = "tsa")]
impl HttpTransport {
    /// Transport posting to `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdf_oxide_sign/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("cannot create HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            username: None,
            password: None,
            timeout,
            client,
        })
    }

    /// Authenticate with HTTP basic auth.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password.map(zeroize::Zeroizing::new);
        self
    }

    fn unreachable(&self, reason: String) -> Error {
        Error::TsaUnreachable {
            url: self.url.clone(),
            reason,
        }
    }
}

#[cfg(feature = "tsa")]
impl TsaTransport for HttpTransport {
    fn send(&self, request: &[u8]) -> Result<Vec<u8>> {
        use reqwest::header::{ACCEPT, CONTENT_TYPE};

        let mut http = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/timestamp-query")
            .header(ACCEPT, "application/timestamp-reply")
            .body(request.to_vec());
        if let Some(username) = &self.username {
            http = http.basic_auth(username, self.password.as_deref());
        }

        let response = http.send().map_err(|e| {
            if e.is_timeout() {
                self.unreachable(format!("no response within {:?}", self.timeout))
            } else {
                self.unreachable(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.unreachable(format!("HTTP {}", status)));
        }
        let body = response
            .bytes()
            .map_err(|e| self.unreachable(format!("cannot read response body: {}", e)))?;
        log::debug!("TSA {} answered {} bytes", self.url, body.len());
        Ok(body.to_vec())
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// Hash algorithm and hash of the timestamped data.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    /// Hash algorithm
    pub hash_algorithm: AlgorithmIdentifierOwned,
    /// Hash of the data
    pub hashed_message: OctetString,
}

impl MessageImprint {
    /// Imprint of `digest` computed with `algorithm`.
    pub fn new(algorithm: DigestAlgorithm, digest: &[u8]) -> Result<Self> {
        Ok(Self {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: None,
            },
            hashed_message: OctetString::new(digest.to_vec())
                .map_err(|e| Error::Timestamp(format!("invalid imprint: {}", e)))?,
        })
    }

    /// Whether this imprint is `algorithm(data)`.
    pub fn matches(&self, data: &[u8]) -> bool {
        DigestAlgorithm::from_oid(&self.hash_algorithm.oid)
            .map(|algorithm| algorithm.digest(data) == self.hashed_message.as_bytes())
            .unwrap_or(false)
    }
}

/// TimeStampReq (extensions are never sent).
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    /// Always 1
    pub version: u8,
    /// What to timestamp
    pub message_imprint: MessageImprint,
    /// Requested TSA policy
    pub req_policy: Option<ObjectIdentifier>,
    /// Replay protection
    pub nonce: Option<u64>,
    /// Ask the TSA to include its certificate
    #[asn1(default = "Default::default")]
    pub cert_req: bool,
}

/// PKIStatusInfo.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    /// 0 granted, 1 grantedWithMods, 2 rejection, 3 waiting, 4/5 revocation
    pub status: u32,
    /// PKIFreeText
    pub status_string: Option<Vec<String>>,
    /// PKIFailureInfo
    pub fail_info: Option<BitString>,
}

/// TimeStampResp. The token is kept as raw DER.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampResp {
    /// Outcome
    pub status: PkiStatusInfo,
    /// ContentInfo with SignedData over a TSTInfo
    pub time_stamp_token: Option<Any>,
}

/// The fields of a TSTInfo this crate uses.
///
/// Accuracy, `tsa` and extensions are skipped when decoding. `genTime`
/// with fractional seconds is accepted; fractions are kept in `gen_time`
/// but dropped when encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TstInfo {
    /// Always 1
    pub version: u8,
    /// TSA policy under which the token was issued
    pub policy: ObjectIdentifier,
    /// Echo of the request imprint
    pub message_imprint: MessageImprint,
    /// Unique per TSA
    pub serial_number: Int,
    /// Time of issue
    pub gen_time: DateTime<Utc>,
    /// Whether tokens from this TSA can be ordered by genTime alone
    pub ordering: bool,
    /// Echo of the request nonce
    pub nonce: Option<u64>,
}

impl TstInfo {
    fn fields(&self) -> der::Result<Vec<Any>> {
        let secs = u64::try_from(self.gen_time.timestamp()).map_err(|_| Tag::GeneralizedTime.value_error())?;
        let mut fields = vec![
            Any::encode_from(&self.version)?,
            Any::encode_from(&self.policy)?,
            Any::encode_from(&self.message_imprint)?,
            Any::encode_from(&self.serial_number)?,
            Any::encode_from(&GeneralizedTime::from_unix_duration(Duration::from_secs(secs))?)?,
        ];
        if self.ordering {
            fields.push(Any::encode_from(&true)?);
        }
        if let Some(nonce) = self.nonce {
            fields.push(Any::encode_from(&nonce)?);
        }
        Ok(fields)
    }
}

impl<'a> DecodeValue<'a> for TstInfo {
    fn decode_value<R: Reader<'a>>(reader: &mut R, header: Header) -> der::Result<Self> {
        reader.read_nested(header.length, |reader| {
            let version = reader.decode()?;
            let policy = reader.decode()?;
            let message_imprint = reader.decode()?;
            let serial_number = reader.decode()?;

            let gen_time: Any = reader.decode()?;
            if gen_time.tag() != Tag::GeneralizedTime {
                return Err(gen_time.tag().unexpected_error(Some(Tag::GeneralizedTime)));
            }
            let gen_time = parse_generalized_time(gen_time.value()).ok_or_else(|| Tag::GeneralizedTime.value_error())?;

            let mut ordering = false;
            let mut nonce = None;
            while !reader.is_finished() {
                let field: Any = reader.decode()?;
                match field.tag() {
                    Tag::Boolean => ordering = field.decode_as::<bool>()?,
                    Tag::Integer => nonce = Some(field.decode_as::<u64>()?),
                    // accuracy, tsa, extensions
                    _ => {},
                }
            }

            Ok(Self {
                version,
                policy,
                message_imprint,
                serial_number,
                gen_time,
                ordering,
                nonce,
            })
        })
    }
}

impl EncodeValue for TstInfo {
    fn value_len(&self) -> der::Result<Length> {
        self.fields()?
            .iter()
            .try_fold(Length::ZERO, |len, field| len + field.encoded_len()?)
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        for field in self.fields()? {
            field.encode(writer)?;
        }
        Ok(())
    }
}

impl FixedTag for TstInfo {
    const TAG: Tag = Tag::Sequence;
}

/// `YYYYMMDDHHMMSS[.fff]Z`
fn parse_generalized_time(value: &[u8]) -> Option<DateTime<Utc>> {
    let text = std::str::from_utf8(value).ok()?;
    let naive = NaiveDateTime::parse_from_str(text, "%Y%m%d%H%M%S%.fZ").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// A validated timestamp token.
#[derive(Debug, Clone)]
pub struct TimestampToken {
    /// DER ContentInfo as issued by the TSA
    pub der: Vec<u8>,
    /// Decoded TSTInfo
    pub info: TstInfo,
}

impl TimestampToken {
    /// Decode a token: ContentInfo, SignedData, TSTInfo.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let signed_data = cms::parse_signed_data(der)
            .map_err(|e| Error::TsaResponseMalformed(format!("token: {}", e)))?;
        if signed_data.encap_content_info.econtent_type != ID_CT_TST_INFO {
            return Err(Error::TsaResponseMalformed(format!(
                "token content type {} is not id-ct-TSTInfo",
                signed_data.encap_content_info.econtent_type
            )));
        }
        let content = cms::encapsulated_content(&signed_data)
            .map_err(|e| Error::TsaResponseMalformed(format!("token: {}", e)))?
            .ok_or_else(|| Error::TsaResponseMalformed("token has no TSTInfo".to_string()))?;
        let info = TstInfo::from_der(&content)
            .map_err(|e| Error::TsaResponseMalformed(format!("invalid TSTInfo: {}", e)))?;
        Ok(Self {
            der: der.to_vec(),
            info,
        })
    }

    /// Time the TSA vouches for.
    pub fn gen_time(&self) -> DateTime<Utc> {
        self.info.gen_time
    }

    /// Whether the token's imprint covers `data`.
    pub fn covers(&self, data: &[u8]) -> bool {
        self.info.message_imprint.matches(data)
    }

    /// Check the TSA's signature over the TSTInfo and return the TSA
    /// certificate. Trust in that certificate is not evaluated.
    pub fn verify_signature(&self) -> Result<Certificate> {
        let signed_data = cms::parse_signed_data(&self.der)?;
        let content = cms::encapsulated_content(&signed_data)?
            .ok_or_else(|| Error::Timestamp("token has no TSTInfo".to_string()))?;
        let signer = cms::verify_signer(&signed_data, |algorithm| Ok(algorithm.digest(&content)))?;
        Ok(signer.certificate)
    }
}

/// RFC 3161 client.
pub struct TimestampClient {
    transport: Box<dyn TsaTransport>,
    digest: DigestAlgorithm,
    policy: Option<ObjectIdentifier>,
    token_size_estimate: usize,
}

impl TimestampClient {
    /// Client hashing with `digest_name` ("SHA1" or "SHA-256").
    ///
    /// Any other name fails here, before the transport is used.
    pub fn new(transport: impl TsaTransport + 'static, digest_name: &str) -> Result<Self> {
        let digest = DigestAlgorithm::from_tsa_name(digest_name)?;
        Ok(Self {
            transport: Box::new(transport),
            digest,
            policy: None,
            token_size_estimate: DEFAULT_TOKEN_SIZE_ESTIMATE,
        })
    }

    /// Request tokens under a specific TSA policy.
    pub fn with_policy(mut self, policy: ObjectIdentifier) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Upper bound for the token size used when reserving space.
    pub fn with_token_size_estimate(mut self, bytes: usize) -> Self {
        self.token_size_estimate = bytes;
        self
    }

    /// Imprint hash algorithm.
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest
    }

    /// Expected maximum token size.
    pub fn token_size_estimate(&self) -> usize {
        self.token_size_estimate
    }

    /// Endpoint of the underlying transport.
    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// Timestamp `data` (hashed with the configured algorithm).
    pub fn timestamp(&self, data: &[u8]) -> Result<TimestampToken> {
        self.timestamp_digest(&self.digest.digest(data))
    }

    /// Timestamp a precomputed hash.
    pub fn timestamp_digest(&self, digest: &[u8]) -> Result<TimestampToken> {
        self.exchange(digest).during(Phase::Timestamp)
    }

    fn exchange(&self, digest: &[u8]) -> Result<TimestampToken> {
        if digest.len() != self.digest.output_len() {
            return Err(Error::Timestamp(format!(
                "{} digest must be {} bytes, got {}",
                self.digest,
                self.digest.output_len(),
                digest.len()
            )));
        }

        let request = TimeStampReq {
            version: 1,
            message_imprint: MessageImprint::new(self.digest, digest)?,
            req_policy: self.policy,
            nonce: Some(rand::random::<u64>()),
            cert_req: true,
        };
        let request_der = request
            .to_der()
            .map_err(|e| Error::Timestamp(format!("cannot encode request: {}", e)))?;

        log::info!("requesting {} timestamp from {}", self.digest, self.transport.endpoint());
        let response = self.transport.send(&request_der)?;
        let token = validate_response(&response, &request)?;
        log::info!("timestamp granted at {}", token.gen_time());
        Ok(token)
    }
}

impl std::fmt::Debug for TimestampClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampClient")
            .field("endpoint", &self.transport.endpoint())
            .field("digest", &self.digest)
            .field("token_size_estimate", &self.token_size_estimate)
            .finish()
    }
}

/// Check a TimeStampResp against the request that produced it.
pub fn validate_response(response: &[u8], request: &TimeStampReq) -> Result<TimestampToken> {
    let response = TimeStampResp::from_der(response)
        .map_err(|e| Error::TsaResponseMalformed(format!("cannot decode TimeStampResp: {}", e)))?;

    let status = &response.status;
    if status.status > 1 {
        return Err(Error::TsaRejected {
            status: status.status,
            status_text: status.status_string.as_ref().map(|texts| texts.join("; ")),
            failure_info: status.fail_info.as_ref().and_then(failure_names),
        });
    }

    let token = response
        .time_stamp_token
        .ok_or_else(|| Error::TsaResponseMalformed("granted response carries no token".to_string()))?;
    let der = token
        .to_der()
        .map_err(|e| Error::TsaResponseMalformed(format!("cannot encode token: {}", e)))?;
    let token = TimestampToken::from_der(&der)?;

    if token.info.message_imprint != request.message_imprint {
        return Err(Error::TsaResponseMalformed(
            "token message imprint does not match the request".to_string(),
        ));
    }
    if token.info.nonce != request.nonce {
        return Err(Error::TsaResponseMalformed(format!(
            "token nonce {:?} does not match request nonce {:?}",
            token.info.nonce, request.nonce
        )));
    }
    Ok(token)
}

/// PKIFailureInfo bit names (RFC 3161 §2.4.2).
fn failure_names(bits: &BitString) -> Option<String> {
    const NAMES: [(usize, &str); 8] = [
        (0, "badAlg"),
        (2, "badRequest"),
        (5, "badDataFormat"),
        (14, "timeNotAvailable"),
        (15, "unacceptedPolicy"),
        (16, "unacceptedExtension"),
        (17, "addInfoNotAvailable"),
        (25, "systemFailure"),
    ];
    let set: Vec<usize> = bits.bits().enumerate().filter(|(_, bit)| *bit).map(|(i, _)| i).collect();
    if set.is_empty() {
        return None;
    }
    let names: Vec<String> = set
        .iter()
        .map(|i| {
            NAMES
                .iter()
                .find(|(bit, _)| bit == i)
                .map(|(_, name)| name.to_string())
                .unwrap_or_else(|| format!("bit{}", i))
        })
        .collect();
    Some(names.join(","))
}
