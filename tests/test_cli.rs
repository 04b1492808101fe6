//! The `pdf-oxide-sign` binary: exit codes and output files.

mod common;

use common::{fixture_path, PASSWORD};
use std::path::Path;
use std::process::{Command, Output};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pdf-oxide-sign"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_no_arguments_prints_help() {
    let out = run(&[]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("Usage"));
}

#[test]
fn test_incomplete_arguments_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("signed.pdf");
    let input = fixture_path("one_page.pdf");

    let out = run(&["-i", path_str(&input), "-o", path_str(&output)]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--certfile"));
    assert!(!output.exists());
}

#[test]
fn test_missing_password_prints_help() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("signed.pdf");
    let out = run(&[
        "-i",
        path_str(&fixture_path("one_page.pdf")),
        "-o",
        path_str(&output),
        "-c",
        path_str(&fixture_path("self_signed.p12")),
    ]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--certpass"));
    assert!(String::from_utf8_lossy(&out.stdout).contains("Usage"));
    assert!(!output.exists());
}

#[test]
fn test_invalid_timestamp_digest_prints_help() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("signed.pdf");
    let out = run(&[
        "-i",
        path_str(&fixture_path("one_page.pdf")),
        "-o",
        path_str(&output),
        "-c",
        path_str(&fixture_path("self_signed.p12")),
        "-p",
        PASSWORD,
        "--tsha",
        "MD5",
    ]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("Usage"));
    assert!(!output.exists());
}

#[test]
fn test_sign_then_verify() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("signed.pdf");
    let out = run(&[
        "-i",
        path_str(&fixture_path("one_page.pdf")),
        "-o",
        path_str(&output),
        "-c",
        path_str(&fixture_path("chain.p12")),
        "-p",
        PASSWORD,
        "--reason",
        "Approved",
        "--json",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["field_name"], "Signature1");
    assert!(report["timestamp_time"].is_null());
    assert!(output.exists());

    let out = run(&[
        "--verify",
        path_str(&output),
        "--trust",
        path_str(&fixture_path("root_ca.pem")),
        "--json",
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let results: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(results.as_array().unwrap().len(), 1);
    assert_eq!(results[0]["status"], "Valid");
    assert_eq!(results[0]["signature_info"]["reason"], "Approved");
}

#[test]
fn test_verify_unsigned_fails() {
    let out = run(&["--verify", path_str(&fixture_path("one_page.pdf"))]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stdout).contains("no signatures"));
}

#[test]
fn test_wrong_password_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("signed.pdf");
    let out = run(&[
        "-i",
        path_str(&fixture_path("one_page.pdf")),
        "-o",
        path_str(&output),
        "-c",
        path_str(&fixture_path("self_signed.p12")),
        "-p",
        "not the password",
    ]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).starts_with("Error:"));
    assert!(!output.exists());
}
