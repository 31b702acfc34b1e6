use std::path::PathBuf;
use std::time::Duration;

use cs_acme::AcmeError;
use thiserror::Error;

/// Settings for one issuance run.
#[derive(Debug, Clone)]
pub struct IssueConfig {
    /// Directory the web server exposes at `/.well-known/acme-challenge/`.
    pub challenge_dir: PathBuf,
    /// Verify the proof artifact is reachable before asking for validation.
    pub self_check: bool,
    /// Delay between authorization status polls.
    pub poll_interval: Duration,
    /// Budget for the whole domain-authorization stage.
    pub authorization_timeout: Duration,
    /// Budget for certificate issuance and retrieval.
    pub issuance_timeout: Duration,
}

impl Default for IssueConfig {
    fn default() -> Self {
        Self {
            challenge_dir: PathBuf::from(".well-known/acme-challenge"),
            self_check: true,
            poll_interval: Duration::from_secs(3),
            authorization_timeout: Duration::from_secs(600),
            issuance_timeout: Duration::from_secs(1800),
        }
    }
}

/// Why a single domain's authorization failed.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("no supported challenge offered")]
    UnsupportedChallenge,

    #[error("could not validate domain")]
    Rejected,

    #[error("authorization timed out")]
    Timeout,

    #[error("canceled")]
    Canceled,

    #[error("could not write challenge response to {path}: {source}")]
    ProofWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("self-check of {url} failed: {reason}")]
    SelfCheck { url: String, reason: String },

    #[error(transparent)]
    Authority(#[from] AcmeError),

    #[error("authorization worker crashed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl DomainError {
    /// True when the failure was induced by a sibling's cancellation rather
    /// than anything wrong with this domain.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// A run-fatal failure, attributed to its stage (and domain, where one is
/// involved).
#[derive(Error, Debug)]
pub enum IssueError {
    #[error("registration: {0}")]
    Registration(#[source] AcmeError),

    #[error("challenge ({domain}): {source}")]
    Domain {
        domain: String,
        #[source]
        source: DomainError,
    },

    #[error("certificate: {0}")]
    Issuance(#[source] AcmeError),

    #[error("certificate issuance timed out after {0:?}")]
    IssuanceTimeout(Duration),
}

pub type IssueResult<T> = Result<T, IssueError>;
