//! Signing credentials: a private key plus its certificate chain.

use super::keys::{self, SignatureKey};
use crate::error::{Error, Result};
use der::{Decode, Encode};
use p12_keystore::{KeyStore, KeyStoreEntry};
use std::fmt;
use std::path::Path;
use x509_cert::Certificate;
use zeroize::Zeroizing;

/// Private key and certificate chain, ordered leaf first.
pub struct SigningCredential {
    key: Box<dyn SignatureKey>,
    chain: Vec<Certificate>,
}

impl SigningCredential {
    /// Pair a key with a set of certificates in any order.
    ///
    /// The certificate holding the key's public half becomes the leaf, and
    /// issuers are followed by subject name towards the root. Certificates
    /// outside that path are dropped. Every link must carry a valid
    /// signature from the next certificate.
    pub fn new(key: Box<dyn SignatureKey>, certificates: Vec<Certificate>) -> Result<Self> {
        let chain = order_chain(key.as_ref(), certificates)?;
        log::debug!(
            "loaded {} credential for {:?} with {} certificate(s)",
            key.describe(),
            chain[0].tbs_certificate.subject.to_string(),
            chain.len()
        );
        Ok(Self { key, chain })
    }

    /// Open a PKCS#12 file.
    pub fn from_pkcs12_file(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        let path = path.as_ref();
        let data = Zeroizing::new(std::fs::read(path).map_err(|e| Error::file(path, e))?);
        Self::from_pkcs12(&data, password)
    }

    /// Decode a PKCS#12 store holding exactly one private key.
    pub fn from_pkcs12(data: &[u8], password: &str) -> Result<Self> {
        let store = KeyStore::from_pkcs12(data, password)
            .map_err(|e| Error::SigningKey(format!("cannot open PKCS#12 store (wrong password?): {}", e)))?;

        let mut keys = Vec::new();
        let mut certificates = Vec::new();
        for (alias, entry) in store.entries() {
            match entry {
                KeyStoreEntry::PrivateKeyChain(chain) => {
                    log::debug!("PKCS#12 entry {:?}: private key with {} certificate(s)", alias, chain.chain().len());
                    keys.push(Zeroizing::new(chain.key().to_vec()));
                    for cert in chain.chain() {
                        certificates.push(decode_certificate(cert.as_der())?);
                    }
                },
                KeyStoreEntry::Certificate(cert) => {
                    log::debug!("PKCS#12 entry {:?}: certificate", alias);
                    certificates.push(decode_certificate(cert.as_der())?);
                },
                #[allow(unreachable_patterns)]
                _ => log::debug!("PKCS#12 entry {:?}: ignored", alias),
            }
        }

        let key_der = single_key(keys)?;
        let key = keys::key_from_pkcs8_der(&key_der)?;
        Self::new(key, certificates)
    }

    /// Decode a PEM private key and a PEM certificate bundle.
    pub fn from_pem(key_pem: &str, certificates_pem: &str) -> Result<Self> {
        let key = keys::key_from_pem(key_pem)?;
        let certificates = Certificate::load_pem_chain(certificates_pem.as_bytes())
            .map_err(|e| Error::SigningKey(format!("invalid PEM certificates: {}", e)))?;
        Self::new(key, certificates)
    }

    /// Read a PEM key file and a PEM certificate bundle file.
    pub fn from_pem_files(key_path: impl AsRef<Path>, certificates_path: impl AsRef<Path>) -> Result<Self> {
        let key_path = key_path.as_ref();
        let certs_path = certificates_path.as_ref();
        let key_pem = Zeroizing::new(std::fs::read_to_string(key_path).map_err(|e| Error::file(key_path, e))?);
        let certs_pem = std::fs::read_to_string(certs_path).map_err(|e| Error::file(certs_path, e))?;
        Self::from_pem(&key_pem, &certs_pem)
    }

    /// The private key.
    pub fn key(&self) -> &dyn SignatureKey {
        self.key.as_ref()
    }

    /// The signer's certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.chain[0]
    }

    /// Certificates from leaf to the furthest known issuer.
    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    /// Signer subject as an RFC 4514 string.
    pub fn subject(&self) -> String {
        self.certificate().tbs_certificate.subject.to_string()
    }

    /// Total DER size of the chain, used to size the signature placeholder.
    pub fn chain_der_len(&self) -> usize {
        self.chain
            .iter()
            .map(|cert| cert.to_der().map(|der| der.len()).unwrap_or(0))
            .sum()
    }
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredential")
            .field("key", &format_args!("<{} redacted>", self.key.describe()))
            .field("subject", &self.subject())
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// Exactly one key entry is accepted.
fn single_key(mut keys: Vec<Zeroizing<Vec<u8>>>) -> Result<Zeroizing<Vec<u8>>> {
    match keys.len() {
        1 => Ok(keys.remove(0)),
        0 => Err(Error::Configuration("PKCS#12 store contains no private key".to_string())),
        n => Err(Error::Configuration(format!(
            "PKCS#12 store contains {} private keys, expected exactly one",
            n
        ))),
    }
}

fn decode_certificate(der: &[u8]) -> Result<Certificate> {
    Certificate::from_der(der).map_err(|e| Error::SigningKey(format!("invalid certificate: {}", e)))
}

fn is_self_issued(cert: &Certificate) -> bool {
    cert.tbs_certificate.subject == cert.tbs_certificate.issuer
}

/// Check that `issuer` signed `cert`.
pub(crate) fn verify_issued_by(cert: &Certificate, issuer: &Certificate) -> Result<()> {
    let digest = keys::digest_of_signature_algorithm(&cert.signature_algorithm.oid).ok_or_else(|| {
        Error::SigningKey(format!(
            "unsupported certificate signature algorithm {}",
            cert.signature_algorithm.oid
        ))
    })?;
    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| Error::SigningKey(format!("cannot encode certificate: {}", e)))?;
    keys::verify_message(
        &issuer.tbs_certificate.subject_public_key_info,
        digest,
        &tbs,
        cert.signature.raw_bytes(),
    )
}

fn order_chain(key: &dyn SignatureKey, mut pool: Vec<Certificate>) -> Result<Vec<Certificate>> {
    let leaf_index = pool
        .iter()
        .position(|cert| keys::key_matches(key, &cert.tbs_certificate.subject_public_key_info))
        .ok_or_else(|| Error::SigningKey("private key does not match any certificate".to_string()))?;

    let mut chain = vec![pool.swap_remove(leaf_index)];
    loop {
        let current = &chain[chain.len() - 1];
        if is_self_issued(current) {
            break;
        }
        let issuer_index = pool
            .iter()
            .position(|cert| cert.tbs_certificate.subject == current.tbs_certificate.issuer);
        let Some(issuer_index) = issuer_index else {
            break;
        };
        let issuer = pool.swap_remove(issuer_index);
        verify_issued_by(current, &issuer).map_err(|e| {
            Error::SigningKey(format!(
                "certificate {:?} is not signed by {:?}: {}",
                current.tbs_certificate.subject.to_string(),
                issuer.tbs_certificate.subject.to_string(),
                e
            ))
        })?;
        chain.push(issuer);
    }

    if !pool.is_empty() {
        log::debug!("ignoring {} certificate(s) outside the signer's chain", pool.len());
    }
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_path(name: &str) -> String {
        format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    fn fixture_text(name: &str) -> String {
        std::fs::read_to_string(fixture_path(name)).unwrap()
    }

    #[test]
    fn test_pem_chain_is_ordered_leaf_first() {
        // Deliberately shuffled bundle: root, leaf, intermediate.
        let bundle = format!(
            "{}{}{}",
            fixture_text("root_ca.pem"),
            fixture_text("leaf.pem"),
            fixture_text("intermediate.pem")
        );
        let credential = SigningCredential::from_pem(&fixture_text("leaf_key.pem"), &bundle).unwrap();
        let subjects: Vec<String> = credential
            .chain()
            .iter()
            .map(|c| c.tbs_certificate.subject.to_string())
            .collect();
        assert_eq!(subjects.len(), 3);
        assert!(subjects[0].contains("Chain Leaf Signer"));
        assert!(subjects[1].contains("Test Intermediate CA"));
        assert!(subjects[2].contains("Test Root CA"));
        assert!(credential.chain_der_len() > 1000);
    }

    #[test]
    fn test_unrelated_certificates_are_dropped() {
        let bundle = format!("{}{}", fixture_text("self_signed_cert.pem"), fixture_text("tsa_cert.pem"));
        let credential = SigningCredential::from_pem(&fixture_text("self_signed_key.pem"), &bundle).unwrap();
        assert_eq!(credential.chain().len(), 1);
        assert!(credential.subject().contains("Self Signed Signer"));
    }

    #[test]
    fn test_key_certificate_mismatch() {
        let err = SigningCredential::from_pem(&fixture_text("other_key.pem"), &fixture_text("self_signed_cert.pem"))
            .unwrap_err();
        assert!(matches!(err, Error::SigningKey(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let credential =
            SigningCredential::from_pem(&fixture_text("ec_key.pem"), &fixture_text("ec_cert.pem")).unwrap();
        let debug = format!("{:?}", credential);
        assert!(debug.contains("redacted"));
        assert!(debug.contains("EC Signer"));
        assert!(!debug.contains("PRIVATE"));
    }

    #[test]
    fn test_exactly_one_key_required() {
        let key = || Zeroizing::new(vec![1u8, 2, 3]);
        assert_eq!(single_key(vec![key()]).unwrap().as_slice(), &[1, 2, 3]);
        assert!(matches!(single_key(vec![]), Err(Error::Configuration(_))));
        match single_key(vec![key(), key()]) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("2 private keys")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_verify_issued_by() {
        let root = Certificate::load_pem_chain(fixture_text("root_ca.pem").as_bytes()).unwrap().remove(0);
        let intermediate = Certificate::load_pem_chain(fixture_text("intermediate.pem").as_bytes())
            .unwrap()
            .remove(0);
        verify_issued_by(&intermediate, &root).unwrap();
        assert!(verify_issued_by(&root, &intermediate).is_err());
    }
}
