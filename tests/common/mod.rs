//! Shared helpers for integration tests: fixtures and an in-process TSA.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use der::asn1::{BitString, Int, ObjectIdentifier};
use der::{Any, Decode, Encode};
use pdf_oxide_sign::error::{Error, Result};
use pdf_oxide_sign::object::{Dictionary, Object};
use pdf_oxide_sign::signatures::cms::{CmsSignatureBuilder, ID_CT_TST_INFO};
use pdf_oxide_sign::signatures::timestamp::{PkiStatusInfo, TimeStampReq, TimeStampResp, TstInfo};
use pdf_oxide_sign::signatures::{DigestAlgorithm, SigningCredential, TsaTransport};
use pdf_oxide_sign::PdfDocument;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub const PASSWORD: &str = "test123";

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

pub fn fixture_bytes(name: &str) -> Vec<u8> {
    std::fs::read(fixture_path(name)).unwrap()
}

pub fn fixture_text(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}

pub fn self_signed() -> SigningCredential {
    SigningCredential::from_pkcs12_file(fixture_path("self_signed.p12"), PASSWORD).unwrap()
}

pub fn chain_signer() -> SigningCredential {
    SigningCredential::from_pkcs12_file(fixture_path("chain.p12"), PASSWORD).unwrap()
}

pub fn tsa_credential() -> SigningCredential {
    let certs = format!("{}{}", fixture_text("tsa_cert.pem"), fixture_text("root_ca.pem"));
    SigningCredential::from_pem(&fixture_text("tsa_key.pem"), &certs).unwrap()
}

/// Signature dictionaries of a signed document.
pub fn signatures(data: &[u8]) -> Vec<(String, Dictionary)> {
    PdfDocument::from_bytes(data.to_vec())
        .unwrap()
        .signature_dictionaries()
        .unwrap()
}

/// `/Contents` of the only signature in `data`.
pub fn contents(data: &[u8]) -> Vec<u8> {
    let sigs = signatures(data);
    assert_eq!(sigs.len(), 1);
    sigs[0].1.get("Contents").and_then(Object::as_string).unwrap().to_vec()
}

/// How the mock authority answers.
#[derive(Debug, Clone)]
pub enum TsaBehavior {
    /// Sign a TSTInfo echoing imprint and nonce
    Grant,
    /// PKIStatus with failure bits
    Reject {
        status: u32,
        text: String,
        failure_bit: usize,
    },
    /// Granted, but the nonce is not echoed
    WrongNonce,
    /// Transport failure before any answer
    Unreachable,
}

/// RFC 3161 authority running in the test process.
pub struct MockTsa {
    behavior: TsaBehavior,
    credential: Arc<SigningCredential>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTsa {
    pub fn new(behavior: TsaBehavior) -> Self {
        Self {
            behavior,
            credential: Arc::new(tsa_credential()),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Requests seen so far, shared with the transport after it is moved.
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.requests)
    }

    /// Produce the DER TimeStampResp for a DER TimeStampReq.
    pub fn respond(&self, request: &[u8]) -> Vec<u8> {
        let request = TimeStampReq::from_der(request).unwrap();
        match &self.behavior {
            TsaBehavior::Grant => granted(&self.credential, &request, request.nonce),
            TsaBehavior::WrongNonce => granted(&self.credential, &request, request.nonce.map(|n| n ^ 1)),
            TsaBehavior::Reject {
                status,
                text,
                failure_bit,
            } => TimeStampResp {
                status: PkiStatusInfo {
                    status: *status,
                    status_string: Some(vec![text.clone()]),
                    fail_info: Some(failure_bits(*failure_bit)),
                },
                time_stamp_token: None,
            }
            .to_der()
            .unwrap(),
            TsaBehavior::Unreachable => Vec::new(),
        }
    }
}

impl TsaTransport for MockTsa {
    fn send(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(request.to_vec());
        if let TsaBehavior::Unreachable = self.behavior {
            return Err(Error::TsaUnreachable {
                url: self.endpoint(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.respond(request))
    }

    fn endpoint(&self) -> String {
        "mock://tsa".to_string()
    }
}

pub fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap()
}

fn granted(credential: &SigningCredential, request: &TimeStampReq, nonce: Option<u64>) -> Vec<u8> {
    let info = TstInfo {
        version: 1,
        policy: ObjectIdentifier::new_unwrap("1.2.3.4.1"),
        message_imprint: request.message_imprint.clone(),
        serial_number: Int::new(&[0x01, 0x5A]).unwrap(),
        gen_time: now(),
        ordering: false,
        nonce,
    };
    let token = CmsSignatureBuilder::new(credential, DigestAlgorithm::Sha256)
        .build_encapsulated(ID_CT_TST_INFO, &info.to_der().unwrap())
        .unwrap();
    TimeStampResp {
        status: PkiStatusInfo {
            status: 0,
            status_string: None,
            fail_info: None,
        },
        time_stamp_token: Some(Any::from_der(&token).unwrap()),
    }
    .to_der()
    .unwrap()
}

/// PKIFailureInfo with one bit set (bit 0 is the most significant).
fn failure_bits(bit: usize) -> BitString {
    let mut bytes = vec![0u8; bit / 8 + 1];
    bytes[bit / 8] |= 0x80 >> (bit % 8);
    BitString::from_bytes(&bytes).unwrap()
}
