//! Signing configuration.
//!
//! [`SignerConfig`] gathers everything one signing run needs: source and
//! destination, where the credential comes from, the signature options and
//! optional timestamp-authority settings. [`SignerConfig::validate`] runs
//! every check that needs no I/O, so bad input is reported before any file
//! or network access.

use crate::error::{Error, Phase, Result, ResultExt};
use crate::signatures::{
    DigestAlgorithm, PdfSigner, SignOptions, SigningCredential, SigningReport, TimestampClient,
    DEFAULT_TIMEOUT, DEFAULT_TOKEN_SIZE_ESTIMATE,
};
use der::asn1::ObjectIdentifier;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::Zeroizing;

/// Where the private key and certificates are loaded from.
#[derive(Clone)]
pub enum CredentialSource {
    /// Password-protected PKCS#12 store
    Pkcs12 {
        /// `.p12` / `.pfx` file
        path: PathBuf,
        /// Store password
        password: Zeroizing<String>,
    },
    /// PEM private key plus PEM certificate bundle
    Pem {
        /// PKCS#8 or PKCS#1 key file
        key: PathBuf,
        /// Leaf and issuer certificates, any order
        certificates: PathBuf,
    },
}

impl CredentialSource {
    /// PKCS#12 store.
    pub fn pkcs12(path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        CredentialSource::Pkcs12 {
            path: path.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// PEM key and certificate files.
    pub fn pem(key: impl Into<PathBuf>, certificates: impl Into<PathBuf>) -> Self {
        CredentialSource::Pem {
            key: key.into(),
            certificates: certificates.into(),
        }
    }

    /// Open the credential.
    pub fn load(&self) -> Result<SigningCredential> {
        let credential = match self {
            CredentialSource::Pkcs12 { path, password } => SigningCredential::from_pkcs12_file(path, password),
            CredentialSource::Pem { key, certificates } => SigningCredential::from_pem_files(key, certificates),
        };
        credential.during(Phase::LoadCredential)
    }

    fn paths(&self) -> Vec<&Path> {
        match self {
            CredentialSource::Pkcs12 { path, .. } => vec![path.as_path()],
            CredentialSource::Pem { key, certificates } => vec![key.as_path(), certificates.as_path()],
        }
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Pkcs12 { path, .. } => f
                .debug_struct("Pkcs12")
                .field("path", path)
                .field("password", &"<redacted>")
                .finish(),
            CredentialSource::Pem { key, certificates } => f
                .debug_struct("Pem")
                .field("key", key)
                .field("certificates", certificates)
                .finish(),
        }
    }
}

/// Timestamp authority settings.
#[derive(Clone)]
pub struct TsaConfig {
    /// `http://` or `https://` endpoint
    pub url: String,
    /// `"SHA1"` or `"SHA-256"`
    pub digest_name: String,
    /// Basic auth user
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<Zeroizing<String>>,
    /// HTTP timeout
    pub timeout: Duration,
    /// Bytes reserved for the token in the placeholder
    pub token_size_estimate: usize,
    /// Requested TSA policy OID, dotted form
    pub policy: Option<String>,
}

impl TsaConfig {
    /// Settings for `url` with SHA-256 imprints and default limits.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            digest_name: DigestAlgorithm::Sha256.name().to_string(),
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            token_size_estimate: DEFAULT_TOKEN_SIZE_ESTIMATE,
            policy: None,
        }
    }

    /// Set the imprint digest name.
    pub fn with_digest_name(mut self, name: impl Into<String>) -> Self {
        self.digest_name = name.into();
        self
    }

    /// Set basic auth credentials.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password.map(Zeroizing::new);
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the placeholder space reserved for the token.
    pub fn with_token_size_estimate(mut self, bytes: usize) -> Self {
        self.token_size_estimate = bytes;
        self
    }

    /// Request a specific TSA policy.
    pub fn with_policy(mut self, oid: impl Into<String>) -> Self {
        self.policy = Some(oid.into());
        self
    }

    /// Check the settings without contacting the TSA.
    pub fn validate(&self) -> Result<()> {
        DigestAlgorithm::from_tsa_name(&self.digest_name)?;
        let lower = self.url.to_ascii_lowercase();
        let rest = lower
            .strip_prefix("http://")
            .or_else(|| lower.strip_prefix("https://"))
            .ok_or_else(|| Error::Configuration(format!("TSA URL {:?} is not http(s)", self.url)))?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(Error::Configuration(format!("TSA URL {:?} has no host", self.url)));
        }
        if self.timeout.is_zero() {
            return Err(Error::Configuration("TSA timeout must be positive".to_string()));
        }
        if self.token_size_estimate == 0 {
            return Err(Error::Configuration("TSA token size estimate must be positive".to_string()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(Error::Configuration("TSA password given without a user".to_string()));
        }
        self.policy_oid()?;
        Ok(())
    }

    fn policy_oid(&self) -> Result<Option<ObjectIdentifier>> {
        self.policy
            .as_deref()
            .map(|oid| {
                ObjectIdentifier::new(oid)
                    .map_err(|e| Error::Configuration(format!("invalid TSA policy {:?}: {}", oid, e)))
            })
            .transpose()
    }

    /// Build an HTTP timestamp client.
    #[cfg(feature = "tsa")]
    pub fn build_client(&self) -> Result<TimestampClient> {
        self.validate()?;
        let mut transport = crate::signatures::HttpTransport::new(&self.url, self.timeout)?;
        if let Some(username) = &self.username {
            transport = transport.with_basic_auth(username, self.password.as_ref().map(|p| p.to_string()));
        }
        self.client_with(transport)
    }

    /// Build an HTTP timestamp client.
    #[cfg(not(feature = "tsa"))]
    pub fn build_client(&self) -> Result<TimestampClient> {
        self.validate()?;
        Err(Error::Unsupported(
            "timestamping over HTTP requires the `tsa` feature".to_string(),
        ))
    }

    /// Build a timestamp client over a caller-supplied transport.
    pub fn client_with(&self, transport: impl crate::signatures::TsaTransport + 'static) -> Result<TimestampClient> {
        let mut client =
            TimestampClient::new(transport, &self.digest_name)?.with_token_size_estimate(self.token_size_estimate);
        if let Some(policy) = self.policy_oid()? {
            client = client.with_policy(policy);
        }
        Ok(client)
    }
}

impl fmt::Debug for TsaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsaConfig")
            .field("url", &self.url)
            .field("digest_name", &self.digest_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("token_size_estimate", &self.token_size_estimate)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Everything needed for one signing run.
#[derive(Debug, Clone)]
pub struct SignerConfig {
    /// Source document
    pub input: PathBuf,
    /// Destination (may equal `input`)
    pub output: PathBuf,
    /// Credential location
    pub credential: CredentialSource,
    /// Signature options
    pub options: SignOptions,
    /// Timestamp authority, if any
    pub tsa: Option<TsaConfig>,
}

impl SignerConfig {
    /// Configuration with default options and no timestamp.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, credential: CredentialSource) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            credential,
            options: SignOptions::default(),
            tsa: None,
        }
    }

    /// Replace the signature options.
    pub fn with_options(mut self, options: SignOptions) -> Self {
        self.options = options;
        self
    }

    /// Timestamp the signature.
    pub fn with_tsa(mut self, tsa: TsaConfig) -> Self {
        self.tsa = Some(tsa);
        self
    }

    /// Check everything that can be checked without I/O.
    pub fn validate(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(Error::Configuration("no input file given".to_string()));
        }
        if self.output.as_os_str().is_empty() {
            return Err(Error::Configuration("no output file given".to_string()));
        }
        if self.credential.paths().iter().any(|p| p.as_os_str().is_empty()) {
            return Err(Error::Configuration("no credential file given".to_string()));
        }
        if self.options.estimated_size == Some(0) {
            return Err(Error::Configuration("signature size must be positive".to_string()));
        }
        if let Some(tsa) = &self.tsa {
            tsa.validate()?;
        }
        Ok(())
    }

    /// Validate, load the credential and assemble a signer.
    pub fn build_signer(&self) -> Result<PdfSigner> {
        self.validate().during(Phase::Configuration)?;
        let credential = self.credential.load()?;
        let mut signer = PdfSigner::new(credential, self.options.clone());
        if let Some(tsa) = &self.tsa {
            signer = signer.with_timestamp(tsa.build_client().during(Phase::Configuration)?);
        }
        Ok(signer)
    }

    /// Sign `input` into `output`.
    pub fn sign(&self) -> Result<SigningReport> {
        self.build_signer()?.sign_file(&self.input, &self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    fn config() -> SignerConfig {
        SignerConfig::new(
            fixture("one_page.pdf"),
            "/tmp/out.pdf",
            CredentialSource::pkcs12(fixture("self_signed.p12"), "test123"),
        )
    }

    #[test]
    fn test_valid_config() {
        config().validate().unwrap();
        config()
            .with_tsa(TsaConfig::new("https://tsa.example/tsr").with_digest_name("SHA1"))
            .validate()
            .unwrap();
    }

    #[test]
    fn test_tsa_digest_rejected_without_io() {
        let err = config()
            .with_tsa(TsaConfig::new("http://127.0.0.1:9/").with_digest_name("MD5"))
            .build_signer()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedDigestAlgorithm);
        assert_eq!(err.phase(), Some(Phase::Configuration));
    }

    #[test]
    fn test_tsa_url_checks() {
        for url in ["ftp://tsa.example", "tsa.example", "http://", "https:///path"] {
            let err = TsaConfig::new(url).validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration, "{}", url);
        }
        assert!(TsaConfig::new("HTTP://TSA.EXAMPLE").validate().is_ok());
    }

    #[test]
    fn test_tsa_limits_and_policy() {
        let base = TsaConfig::new("http://tsa.example");
        assert!(base.clone().with_timeout(Duration::ZERO).validate().is_err());
        assert!(base.clone().with_token_size_estimate(0).validate().is_err());
        assert!(base.clone().with_policy("not an oid").validate().is_err());
        assert!(base.clone().with_policy("1.2.3.4.1").validate().is_ok());
        let mut no_user = base;
        no_user.password = Some(Zeroizing::new("secret".to_string()));
        assert!(no_user.validate().is_err());
    }

    #[test]
    fn test_missing_paths() {
        let mut cfg = config();
        cfg.input = PathBuf::new();
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Configuration);

        let cfg = SignerConfig::new("in.pdf", "out.pdf", CredentialSource::pem("", "certs.pem"));
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Configuration);

        let cfg = config().with_options(SignOptions::default().with_estimated_size(0));
        assert_eq!(cfg.validate().unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_wrong_password_is_credential_phase() {
        let cfg = SignerConfig::new(
            fixture("one_page.pdf"),
            "/tmp/out.pdf",
            CredentialSource::pkcs12(fixture("self_signed.p12"), "wrong"),
        );
        let err = cfg.build_signer().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SigningKey);
        assert_eq!(err.phase(), Some(Phase::LoadCredential));
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let cfg = config().with_tsa(TsaConfig::new("http://tsa.example").with_basic_auth("user", Some("hunter2".into())));
        let debug = format!("{:?}", cfg);
        assert!(!debug.contains("test123"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_pem_source_loads() {
        let source = CredentialSource::pem(fixture("leaf_key.pem"), fixture("leaf.pem"));
        let credential = source.load().unwrap();
        assert!(credential.subject().contains("Chain Leaf Signer"));
    }
}
