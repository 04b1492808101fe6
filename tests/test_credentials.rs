//! Loading signing credentials from PKCS#12 and PEM.

mod common;

use common::*;
use pdf_oxide_sign::error::{Error, ErrorKind, Phase};
use pdf_oxide_sign::signatures::{PdfSigner, SignOptions, SignatureVerifier, SigningCredential};
use pdf_oxide_sign::CredentialSource;

#[test]
fn test_self_signed_store() {
    let credential = self_signed();
    assert_eq!(credential.chain().len(), 1);
    assert!(credential.subject().contains("Self Signed Signer"));
    assert!(credential.key().describe().contains("RSA"));
}

#[test]
fn test_chain_store_is_ordered_leaf_to_root() {
    let credential = chain_signer();
    let subjects: Vec<String> = credential
        .chain()
        .iter()
        .map(|c| c.tbs_certificate.subject.to_string())
        .collect();
    assert_eq!(subjects.len(), 3);
    assert!(subjects[0].contains("Chain Leaf Signer"));
    assert!(subjects[2].contains("Test Root CA"));
}

#[test]
fn test_ec_store() {
    let credential = SigningCredential::from_pkcs12_file(fixture_path("ec.p12"), PASSWORD).unwrap();
    assert!(credential.key().describe().contains("P-256"));
}

#[test]
fn test_wrong_password() {
    let err = SigningCredential::from_pkcs12_file(fixture_path("self_signed.p12"), "nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SigningKey);
}

#[test]
fn test_store_without_key() {
    let err = SigningCredential::from_pkcs12_file(fixture_path("no_key.p12"), PASSWORD).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_missing_store_file() {
    let err = CredentialSource::pkcs12(fixture_path("missing.p12"), PASSWORD)
        .load()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.phase(), Some(Phase::LoadCredential));
    assert!(matches!(err.root(), Error::File { .. }));
}

#[test]
fn test_pem_with_pkcs8_key_and_bundle() {
    let credential =
        SigningCredential::from_pem_files(fixture_path("leaf_key.pem"), fixture_path("chain_cas.pem"));
    // The bundle lacks the leaf itself.
    assert_eq!(credential.unwrap_err().kind(), ErrorKind::SigningKey);

    let bundle = format!("{}{}", fixture_text("leaf.pem"), fixture_text("chain_cas.pem"));
    let credential = SigningCredential::from_pem(&fixture_text("leaf_key.pem"), &bundle).unwrap();
    assert_eq!(credential.chain().len(), 3);
}

#[test]
fn test_pkcs1_key_mismatch() {
    let err = SigningCredential::from_pem(&fixture_text("other_key_pkcs1.pem"), &fixture_text("leaf.pem"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SigningKey);
}

#[test]
fn test_unrelated_issuer_is_not_chained() {
    let bundle = format!("{}{}", fixture_text("tsa_cert.pem"), fixture_text("intermediate.pem"));
    let credential = SigningCredential::from_pem(&fixture_text("tsa_key.pem"), &bundle).unwrap();
    // The TSA certificate is issued by the root, not the intermediate.
    assert_eq!(credential.chain().len(), 1);
}

#[test]
fn test_pem_credential_signs() {
    let credential = SigningCredential::from_pem_files(fixture_path("ec_key.pem"), fixture_path("ec_cert.pem")).unwrap();
    let (signed, report) = PdfSigner::new(credential, SignOptions::default())
        .sign_bytes(fixture_bytes("one_page.pdf"))
        .unwrap();
    assert!(report.signer.contains("EC Signer"));
    let results = SignatureVerifier::new().verify_bytes(signed).unwrap();
    assert!(results[0].signature_valid, "{:?}", results[0].messages);
}
