use serde::Deserialize;
use thiserror::Error;

/// The only challenge type this client knows how to fulfill.
pub const HTTP01: &str = "http-01";

/// Well-known machine-readable error types emitted by the authority.
pub mod problem {
    pub const BAD_CSR: &str = "urn:acme:error:badCSR";
    pub const BAD_NONCE: &str = "urn:acme:error:badNonce";
    pub const CONNECTION: &str = "urn:acme:error:connection";
    pub const DNSSEC: &str = "urn:acme:error:dnssec";
    pub const MALFORMED: &str = "urn:acme:error:malformed";
    pub const SERVER_INTERNAL: &str = "urn:acme:error:serverInternal";
    pub const TLS: &str = "urn:acme:error:tls";
    pub const UNAUTHORIZED: &str = "urn:acme:error:unauthorized";
    pub const UNKNOWN_HOST: &str = "urn:acme:error:unknownHost";
    pub const RATE_LIMITED: &str = "urn:acme:error:rateLimited";
}

/// Account record as the authority sees it. The identity key itself lives
/// in [`crate::AccountKey`]; later calls are authorized by the signature,
/// not by this record.
#[derive(Debug, Clone, Default)]
pub struct Account {
    /// Terms-of-service URI the account agrees to.
    pub terms: String,
    /// Optional contact address, e.g. `mailto:ops@example.com`.
    pub contact: Option<String>,
    /// Canonical URI of the record, assigned by registration or recovery.
    pub location: Option<String>,
}

/// Authorization status as reported by the authority. Anything that is not
/// `valid` or `invalid` counts as still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    #[serde(other)]
    Unknown,
}

impl AuthorizationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

/// Per-domain authorization record: the offered challenges plus the URI the
/// verdict is polled at.
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    /// Polling URI, taken from the response's `Location` header.
    #[serde(skip)]
    pub location: String,
}

/// One challenge offered inside an authorization.
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
    pub token: String,
}

/// Outcome of an issuance request.
#[derive(Debug)]
pub enum CertificateOrder {
    /// The authority returned the chain synchronously, leaf first.
    Issued(Vec<Vec<u8>>),
    /// The authority is still generating the certificate; poll here.
    Pending(String),
}

/// Outcome of polling a pending certificate location.
#[derive(Debug)]
pub enum CertificatePoll {
    Issued(Vec<Vec<u8>>),
    /// Not ready yet; the authority suggests waiting this long.
    RetryAfter(std::time::Duration),
}

#[derive(Error, Debug)]
pub enum AcmeError {
    /// Structured rejection from the authority.
    #[error("{status} {kind}: {detail}")]
    Protocol {
        status: u16,
        kind: String,
        detail: String,
    },

    /// Registration collided with an existing account; `location` is the
    /// canonical URI of the record that already exists.
    #[error("account already registered at {location}")]
    AccountExists { location: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("signing error: {0}")]
    Signing(#[from] openssl::error::ErrorStack),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported account key: {0}")]
    UnsupportedKey(String),

    /// The authority answered with something the protocol does not allow.
    #[error("bad response from authority: {0}")]
    BadResponse(String),
}

pub type AcmeResult<T> = Result<T, AcmeError>;
