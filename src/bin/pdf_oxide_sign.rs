//! Sign or verify PDF documents from the command line.
//!
//! Usage:
//!   pdf-oxide-sign -i in.pdf -o out.pdf -c signer.p12 -p secret
//!   pdf-oxide-sign -i in.pdf -o out.pdf -c signer.p12 -p secret --turl http://tsa.example/tsr
//!   pdf-oxide-sign --verify out.pdf --trust roots.pem
//!
//! Set `RUST_LOG=debug` for progress details.

use clap::{CommandFactory, Parser};
use pdf_oxide_sign::config::{CredentialSource, SignerConfig, TsaConfig};
use pdf_oxide_sign::signatures::{DigestAlgorithm, SignOptions, SignatureSubFilter};
use pdf_oxide_sign::{Result, SignatureVerifier, SigningReport, VerificationResult, VerificationStatus};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "pdf-oxide-sign")]
#[command(about = "Digitally sign PDF documents, optionally with an RFC 3161 timestamp")]
#[command(version)]
struct Cli {
    /// PDF file to sign
    #[arg(short = 'i', long = "in", value_name = "FILE")]
    input: Option<PathBuf>,

    /// Signed PDF to write (may equal the input)
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    output: Option<PathBuf>,

    /// PKCS#12 store, or PEM certificates when --key is given
    #[arg(short = 'c', long = "certfile", value_name = "FILE")]
    certfile: Option<PathBuf>,

    /// PKCS#12 password (required unless --key is given)
    #[arg(short = 'p', long = "certpass", value_name = "PASSWORD")]
    certpass: Option<String>,

    /// PEM private key (PKCS#8 or PKCS#1)
    #[arg(long, value_name = "FILE")]
    key: Option<PathBuf>,

    /// Timestamp imprint digest: SHA1 or SHA-256
    #[arg(long = "tsha", value_name = "NAME", default_value = "SHA-256")]
    tsha: String,

    /// Timestamp authority URL
    #[arg(long = "turl", value_name = "URL")]
    turl: Option<String>,

    /// Timestamp authority user
    #[arg(long = "tusr", value_name = "USER")]
    tusr: Option<String>,

    /// Timestamp authority password
    #[arg(long = "tpwd", value_name = "PASSWORD")]
    tpwd: Option<String>,

    /// Reason for signing
    #[arg(long)]
    reason: Option<String>,

    /// Signing location
    #[arg(long)]
    location: Option<String>,

    /// Signer contact information
    #[arg(long)]
    contact: Option<String>,

    /// Signer name (defaults to the certificate)
    #[arg(long)]
    name: Option<String>,

    /// Use ETSI.CAdES.detached instead of adbe.pkcs7.detached
    #[arg(long)]
    cades: bool,

    /// Bytes reserved for the signature instead of the estimate
    #[arg(long, value_name = "BYTES")]
    signature_size: Option<usize>,

    /// Verify the signatures of FILE instead of signing
    #[arg(long, value_name = "FILE", conflicts_with_all = ["input", "output"])]
    verify: Option<PathBuf>,

    /// PEM bundle of trusted roots for --verify
    #[arg(long, value_name = "FILE")]
    trust: Vec<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Build the signing configuration, or explain why it is incomplete.
    fn signer_config(&self) -> std::result::Result<SignerConfig, String> {
        let input = self.input.clone().ok_or("missing --in")?;
        let output = self.output.clone().ok_or("missing --out")?;
        let certfile = self.certfile.clone().ok_or("missing --certfile")?;
        DigestAlgorithm::from_tsa_name(&self.tsha).map_err(|e| e.to_string())?;

        let credential = match &self.key {
            Some(key) => CredentialSource::pem(key, certfile),
            None => CredentialSource::pkcs12(certfile, self.certpass.clone().ok_or("missing --certpass")?),
        };

        let mut options = SignOptions::default();
        if self.cades {
            options = options.with_sub_filter(SignatureSubFilter::CadesDetached);
        }
        if let Some(reason) = &self.reason {
            options = options.with_reason(reason);
        }
        if let Some(location) = &self.location {
            options = options.with_location(location);
        }
        if let Some(contact) = &self.contact {
            options = options.with_contact_info(contact);
        }
        if let Some(name) = &self.name {
            options = options.with_name(name);
        }
        if let Some(size) = self.signature_size {
            options = options.with_estimated_size(size);
        }

        let mut config = SignerConfig::new(input, output, credential).with_options(options);
        if let Some(url) = &self.turl {
            let mut tsa = TsaConfig::new(url).with_digest_name(&self.tsha);
            if let Some(user) = &self.tusr {
                tsa = tsa.with_basic_auth(user, self.tpwd.clone());
            }
            config = config.with_tsa(tsa);
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(e.exit_code().clamp(0, 255) as u8);
        },
    };

    let outcome = match &cli.verify {
        Some(path) => verify(&cli, path),
        None => match cli.signer_config() {
            Ok(config) => sign(&cli, &config),
            Err(reason) => {
                eprintln!("{}\n", reason);
                let _ = Cli::command().print_help();
                return ExitCode::SUCCESS;
            },
        },
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::debug!("failure details: {:?}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn sign(cli: &Cli, config: &SignerConfig) -> Result<bool> {
    let report = config.sign()?;
    if cli.json {
        println!("{}", to_json(&report)?);
    } else {
        print_report(&report);
    }
    Ok(true)
}

fn print_report(report: &SigningReport) {
    print!(
        "Signed {} as {} ({} {} bytes of {} reserved, {} {})",
        report.output.display(),
        report.field_name,
        report.signer,
        report.signature_len,
        report.reserved_len,
        report.digest_algorithm,
        report.digest
    );
    match report.timestamp_time {
        Some(time) => println!(", timestamped {}", time.to_rfc3339()),
        None => println!(),
    }
}

fn verify(cli: &Cli, path: &Path) -> Result<bool> {
    let mut verifier = SignatureVerifier::new();
    for bundle in &cli.trust {
        let count = verifier.add_trusted_pem_file(bundle)?;
        log::debug!("trusting {} root(s) from {}", count, bundle.display());
    }
    let results = verifier.verify_file(path)?;

    if cli.json {
        println!("{}", to_json(&results)?);
    } else if results.is_empty() {
        println!("{}: no signatures", path.display());
    } else {
        for result in &results {
            print_result(result);
        }
    }
    Ok(!results.is_empty()
        && results
            .iter()
            .all(|r| r.status != VerificationStatus::Invalid))
}

fn print_result(result: &VerificationResult) {
    let info = &result.signature_info;
    println!(
        "{}: {:?} (signer: {}, signed: {})",
        info.field_name,
        result.status,
        info.signer_name.as_deref().unwrap_or("unknown"),
        info.signing_time.map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339())
    );
    if let Some(time) = info.timestamp_time {
        println!("  timestamp: {}", time.to_rfc3339());
    }
    for message in &result.messages {
        println!("  - {}", message);
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| pdf_oxide_sign::Error::Configuration(format!("cannot serialize report: {}", e)))
}
