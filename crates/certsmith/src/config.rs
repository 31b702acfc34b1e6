use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use cs_acme::AccountKey;
use x509_parser::prelude::*;

const PEM_RSA_KEY: &str = "RSA PRIVATE KEY";
const PEM_EC_KEY: &str = "EC PRIVATE KEY";
const PEM_PKCS8_KEY: &str = "PRIVATE KEY";
const PEM_CSR: &str = "CERTIFICATE REQUEST";

/// Obtain a domain-validated certificate for a pre-built CSR by fulfilling
/// the authority's HTTP-01 challenges.
#[derive(Parser, Debug)]
#[command(name = "certsmith", version, about)]
pub struct Cli {
    /// URL of the authority's directory document.
    #[arg(
        long,
        default_value = "https://acme-v01.api.letsencrypt.org/directory"
    )]
    pub acme_server: String,

    /// Path to the PEM-encoded account private key.
    #[arg(long)]
    pub account_key: PathBuf,

    /// Email address to attach to the registration.
    #[arg(long)]
    pub account_email: Option<String>,

    /// Terms-of-service URI agreed to on registration.
    #[arg(
        long,
        default_value = "https://letsencrypt.org/documents/LE-SA-v1.1.1-August-1-2016.pdf"
    )]
    pub account_terms: String,

    /// Directory the web server exposes at /.well-known/acme-challenge/.
    #[arg(long, default_value = ".well-known/acme-challenge/")]
    pub challenge_dir: PathBuf,

    /// Path to the PEM-encoded certificate signing request.
    #[arg(long)]
    pub csr: PathBuf,

    /// Output path for the PEM certificate chain.
    #[arg(long)]
    pub cert: PathBuf,

    /// Skip the local reachability check before asking for validation.
    #[arg(long)]
    pub skip_self_check: bool,

    /// Budget for the domain-authorization stage, in seconds.
    #[arg(long, default_value_t = 600)]
    pub auth_timeout_secs: u64,

    /// Budget for certificate issuance, in seconds.
    #[arg(long, default_value_t = 1800)]
    pub cert_timeout_secs: u64,
}

/// A loaded certificate signing request: the raw DER handed to the
/// authority plus the domains it names.
#[derive(Debug)]
pub struct SigningRequest {
    pub der: Vec<u8>,
    pub domains: Vec<String>,
}

/// Read and validate the account key.
pub fn load_account_key(path: &Path) -> Result<AccountKey> {
    let raw =
        std::fs::read(path).with_context(|| format!("could not read key {}", path.display()))?;
    let block =
        ::pem::parse(&raw).with_context(|| format!("no PEM block found in {}", path.display()))?;
    match block.tag() {
        PEM_RSA_KEY | PEM_EC_KEY | PEM_PKCS8_KEY => {}
        other => bail!("{}: unsupported PEM block {:?}", path.display(), other),
    }
    AccountKey::from_pem(&raw).with_context(|| format!("could not parse key {}", path.display()))
}

/// Read the CSR and extract the domains it requests, subject CN first,
/// then the DNS subject-alternative names, de-duplicated in order.
pub fn load_csr(path: &Path) -> Result<SigningRequest> {
    let raw =
        std::fs::read(path).with_context(|| format!("could not read CSR {}", path.display()))?;
    let block =
        ::pem::parse(&raw).with_context(|| format!("no PEM block found in {}", path.display()))?;
    if block.tag() != PEM_CSR {
        bail!("{}: unsupported PEM block {:?}", path.display(), block.tag());
    }
    let der = block.contents().to_vec();
    let domains =
        csr_domains(&der).with_context(|| format!("could not parse CSR {}", path.display()))?;
    Ok(SigningRequest { der, domains })
}

fn csr_domains(der: &[u8]) -> Result<Vec<String>> {
    let (_, csr) = X509CertificationRequest::from_der(der)
        .map_err(|err| anyhow::anyhow!("invalid certificate request: {err}"))?;

    let mut domains = Vec::new();
    let subject = &csr.certification_request_info.subject;
    if let Some(cn) = subject
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
    {
        if !cn.is_empty() {
            domains.push(cn.to_string());
        }
    }
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        domains.push((*dns).to_string());
                    }
                }
            }
        }
    }

    // One worker per name; a repeated name would race on its own proof file.
    let mut seen = HashSet::new();
    domains.retain(|domain| seen.insert(domain.clone()));

    if domains.is_empty() {
        bail!("certificate request names no domains");
    }
    Ok(domains)
}

/// The challenge directory must be usable before any network activity.
pub fn check_challenge_dir(path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("can't access challenge directory {}", path.display()))?;
    if !metadata.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    Ok(())
}
