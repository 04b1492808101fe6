//! Signing with an RFC 3161 timestamp authority.

mod common;

use common::*;
use pdf_oxide_sign::error::{Error, ErrorKind, Phase};
use pdf_oxide_sign::signatures::timestamp::TimeStampReq;
use pdf_oxide_sign::signatures::{
    cms, ByteRangeDigestEngine, DigestAlgorithm, PdfSigner, SignOptions, SignatureVerifier, SigningEvent,
    TimestampClient, TimestampToken, VerificationStatus, DEFAULT_TOKEN_SIZE_ESTIMATE,
};
use pdf_oxide_sign::{CredentialSource, SignerConfig, TsaConfig};
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn timestamped_signer(behavior: TsaBehavior) -> PdfSigner {
    let client = TimestampClient::new(MockTsa::new(behavior), "SHA-256").unwrap();
    PdfSigner::new(chain_signer(), SignOptions::default()).with_timestamp(client)
}

#[test]
fn test_token_covers_signature_value() {
    let (signed, report) = timestamped_signer(TsaBehavior::Grant)
        .sign_bytes(fixture_bytes("one_page.pdf"))
        .unwrap();
    assert!(report.timestamp_time.is_some());

    let signed_data = cms::parse_signed_data(&contents(&signed)).unwrap();
    let signer = cms::verify_signer(&signed_data, |algorithm| {
        Ok(ByteRangeDigestEngine::new(algorithm)
            .digest_bytes(&signed, &report.byte_range)?
            .bytes)
    })
    .unwrap();

    let token_der = signer.timestamp_token.expect("timestamp attribute");
    let token = TimestampToken::from_der(&token_der).unwrap();
    assert_eq!(
        token.info.message_imprint.hashed_message.as_bytes(),
        DigestAlgorithm::Sha256.digest(&signer.signature_value).as_slice()
    );
    assert!(token.covers(&signer.signature_value));
    assert!(token
        .verify_signature()
        .unwrap()
        .tbs_certificate
        .subject
        .to_string()
        .contains("Test TSA"));
    assert_eq!(Some(token.gen_time()), report.timestamp_time);
}

#[test]
fn test_timestamped_signature_verifies() {
    let (signed, _) = timestamped_signer(TsaBehavior::Grant)
        .sign_bytes(fixture_bytes("one_page.pdf"))
        .unwrap();
    let mut verifier = SignatureVerifier::new();
    verifier.add_trusted_pem(&fixture_text("root_ca.pem")).unwrap();

    let results = verifier.verify_bytes(signed).unwrap();
    assert_eq!(results[0].status, VerificationStatus::Valid, "{:?}", results[0].messages);
    assert_eq!(results[0].timestamp_valid, Some(true));
    assert!(results[0].signature_info.timestamp_time.is_some());
}

#[test]
fn test_sha1_imprint_requested() {
    let tsa = MockTsa::new(TsaBehavior::Grant);
    let requests = tsa.requests();
    let client = TimestampClient::new(tsa, "SHA1").unwrap();
    PdfSigner::new(self_signed(), SignOptions::default())
        .with_timestamp(client)
        .sign_bytes(fixture_bytes("one_page.pdf"))
        .unwrap();

    let sent = requests.lock().unwrap();
    assert_eq!(sent.len(), 1);
    use der::Decode;
    let request = TimeStampReq::from_der(&sent[0]).unwrap();
    assert_eq!(request.message_imprint.hash_algorithm.oid, DigestAlgorithm::Sha1.oid());
    assert_eq!(request.message_imprint.hashed_message.as_bytes().len(), 20);
    assert!(request.cert_req);
    assert!(request.nonce.is_some());
}

#[test]
fn test_rejected_timestamp_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("signed.pdf");
    let err = timestamped_signer(TsaBehavior::Reject {
        status: 2,
        text: "policy not accepted".to_string(),
        failure_bit: 15,
    })
    .sign_file(fixture_path("one_page.pdf"), &out)
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TsaRejected);
    assert_eq!(err.phase(), Some(Phase::Timestamp));
    assert!(!err.is_transient());
    match err.root() {
        Error::TsaRejected {
            status,
            status_text,
            failure_info,
        } => {
            assert_eq!(*status, 2);
            assert_eq!(status_text.as_deref(), Some("policy not accepted"));
            assert_eq!(failure_info.as_deref(), Some("unacceptedPolicy"));
        },
        other => panic!("unexpected {:?}", other),
    }
    assert!(!out.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_unechoed_nonce_is_malformed() {
    let err = timestamped_signer(TsaBehavior::WrongNonce)
        .sign_bytes(fixture_bytes("one_page.pdf"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TsaResponseMalformed);
    assert!(err.is_timestamp_failure());
}

#[test]
fn test_unreachable_is_transient() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("signed.pdf");
    let err = timestamped_signer(TsaBehavior::Unreachable)
        .sign_file(fixture_path("one_page.pdf"), &out)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TsaUnreachable);
    assert!(err.is_transient());
    assert!(!out.exists());
}

#[test]
fn test_token_must_fit_placeholder() {
    let signer = timestamped_signer(TsaBehavior::Grant);
    let tight = signer.credential().chain_der_len() + 1024;
    let client = TimestampClient::new(MockTsa::new(TsaBehavior::Grant), "SHA-256").unwrap();
    let err = PdfSigner::new(chain_signer(), SignOptions::default().with_estimated_size(tight))
        .with_timestamp(client)
        .sign_bytes(fixture_bytes("one_page.pdf"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PlaceholderTooSmall);
}

#[test]
fn test_estimate_includes_token() {
    let signer = timestamped_signer(TsaBehavior::Grant);
    assert_eq!(
        signer.placeholder_capacity(),
        signer.credential().chain_der_len() + pdf_oxide_sign::signatures::CMS_OVERHEAD + DEFAULT_TOKEN_SIZE_ESTIMATE
    );
}

#[test]
fn test_timestamp_events() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    timestamped_signer(TsaBehavior::Grant)
        .with_observer(move |event: &SigningEvent| sink.lock().unwrap().push(event.clone()))
        .sign_bytes(fixture_bytes("one_page.pdf"))
        .unwrap();

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, SigningEvent::TimestampRequested { endpoint } if endpoint == "mock://tsa")));
    assert!(events.iter().any(|e| matches!(e, SigningEvent::TimestampReceived { .. })));
}

#[test]
fn test_http_transport_with_basic_auth() {
    let mut server = mockito::Server::new();
    let tsa = Arc::new(MockTsa::new(TsaBehavior::Grant));
    let responder = Arc::clone(&tsa);
    let mock = server
        .mock("POST", "/tsr")
        .match_header("content-type", "application/timestamp-query")
        .match_header("authorization", "Basic dXNlcjpwYXNz")
        .with_status(200)
        .with_header("content-type", "application/timestamp-reply")
        .with_body_from_request(move |request| responder.respond(request.body().unwrap()))
        .create();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("signed.pdf");
    let report = SignerConfig::new(
        fixture_path("one_page.pdf"),
        &out,
        CredentialSource::pkcs12(fixture_path("chain.p12"), PASSWORD),
    )
    .with_tsa(
        TsaConfig::new(format!("{}/tsr", server.url()))
            .with_basic_auth("user", Some("pass".to_string()))
            .with_timeout(Duration::from_secs(10)),
    )
    .sign()
    .unwrap();

    mock.assert();
    assert!(report.timestamp_time.is_some());
    assert!(out.exists());
}

#[test]
fn test_http_error_status_is_unreachable() {
    let mut server = mockito::Server::new();
    let mock = server.mock("POST", "/tsr").with_status(500).create();

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("signed.pdf");
    let err = SignerConfig::new(
        fixture_path("one_page.pdf"),
        &out,
        CredentialSource::pkcs12(fixture_path("self_signed.p12"), PASSWORD),
    )
    .with_tsa(TsaConfig::new(format!("{}/tsr", server.url())))
    .sign()
    .unwrap_err();

    mock.assert();
    assert_eq!(err.kind(), ErrorKind::TsaUnreachable);
    assert_eq!(err.phase(), Some(Phase::Timestamp));
    assert!(err.to_string().contains("500"));
    assert!(!out.exists());
}

#[test]
fn test_unsupported_tsa_digest_before_io() {
    for name in ["SHA-1", "SHA256", "sha-256", "SHA-512", "MD5"] {
        let tsa = MockTsa::new(TsaBehavior::Grant);
        let requests = tsa.requests();
        let err = TimestampClient::new(tsa, name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedDigestAlgorithm, "{}", name);
        assert!(requests.lock().unwrap().is_empty());
    }
}
