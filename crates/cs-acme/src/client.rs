use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LINK, LOCATION, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::jws::AccountKey;
use crate::types::{
    AcmeError, AcmeResult, Account, Authorization, CertificateOrder, CertificatePoll, Challenge,
};

const REPLAY_NONCE: &str = "Replay-Nonce";

/// Suggested delay when the authority defers without naming one.
const DEFAULT_RETRY: Duration = Duration::from_secs(1);

/// Everything the issuance flow needs from the remote authority. The HTTP
/// implementation below talks to a live server; tests script their own.
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Create a new account record. An existing record for the same key
    /// surfaces as [`AcmeError::AccountExists`].
    async fn register(&self, account: &Account) -> AcmeResult<Account>;

    /// Update the record at `location` with the account's terms/contact.
    async fn update_account(&self, location: &str, account: &Account) -> AcmeResult<Account>;

    /// Request a fresh authorization for `domain`.
    async fn authorization(&self, domain: &str) -> AcmeResult<Authorization>;

    /// Tell the authority the challenge response is in place.
    async fn accept(&self, challenge: &Challenge) -> AcmeResult<()>;

    /// Re-fetch an authorization to observe its current status.
    async fn poll_authorization(&self, location: &str) -> AcmeResult<Authorization>;

    /// Submit the CSR for issuance. `not_after` is an RFC 3339 timestamp,
    /// forwarded verbatim when present.
    async fn request_certificate(
        &self,
        csr_der: &[u8],
        not_after: Option<&str>,
    ) -> AcmeResult<CertificateOrder>;

    /// Poll a deferred-issuance location.
    async fn poll_certificate(&self, location: &str) -> AcmeResult<CertificatePoll>;

    /// Proof-artifact content for a challenge token.
    fn key_authorization(&self, token: &str) -> AcmeResult<String>;
}

/// Directory document naming the authority's endpoints.
#[derive(Debug, Clone, Deserialize)]
struct Directory {
    #[serde(rename = "new-reg")]
    new_reg: String,
    #[serde(rename = "new-authz")]
    new_authz: String,
    #[serde(rename = "new-cert")]
    new_cert: String,
}

/// Single-slot replay-nonce pool. Every response carries a fresh nonce;
/// the next signed request consumes it.
struct NoncePool {
    current: Mutex<Option<String>>,
}

impl NoncePool {
    fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    fn take(&self) -> Option<String> {
        self.current.lock().unwrap().take()
    }

    fn refill(&self, headers: &HeaderMap) {
        if let Some(nonce) = headers.get(REPLAY_NONCE).and_then(|v| v.to_str().ok()) {
            *self.current.lock().unwrap() = Some(nonce.to_string());
        }
    }
}

/// [`AuthorityClient`] over HTTPS with JWS-signed requests.
pub struct HttpAuthorityClient {
    http: reqwest::Client,
    directory_url: Url,
    directory: Directory,
    key: AccountKey,
    nonces: NoncePool,
}

impl HttpAuthorityClient {
    /// Fetch the directory document and build a client signing with `key`.
    pub async fn connect(directory_url: Url, key: AccountKey) -> AcmeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        debug!(url = %directory_url, "fetching authority directory");
        let response = http.get(directory_url.clone()).send().await?;
        let nonces = NoncePool::new();
        nonces.refill(response.headers());
        let directory: Directory = response.error_for_status()?.json().await?;

        Ok(Self {
            http,
            directory_url,
            directory,
            key,
            nonces,
        })
    }

    async fn nonce(&self) -> AcmeResult<String> {
        if let Some(nonce) = self.nonces.take() {
            return Ok(nonce);
        }
        debug!("nonce pool empty, fetching a fresh one");
        let response = self.http.head(self.directory_url.clone()).send().await?;
        self.nonces.refill(response.headers());
        self.nonces
            .take()
            .ok_or_else(|| AcmeError::BadResponse("no replay nonce offered".into()))
    }

    async fn signed_post(
        &self,
        url: &str,
        payload: serde_json::Value,
    ) -> AcmeResult<reqwest::Response> {
        let nonce = self.nonce().await?;
        let jws = self.key.sign(&nonce, &payload)?;
        let response = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/jose+json")
            .json(&jws)
            .send()
            .await?;
        self.nonces.refill(response.headers());
        Ok(response)
    }

    /// Map a non-success response into a structured protocol error.
    async fn protocol_error(response: reqwest::Response) -> AcmeError {
        #[derive(Deserialize)]
        struct Problem {
            #[serde(rename = "type", default)]
            kind: String,
            #[serde(default)]
            detail: String,
        }

        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();
        match serde_json::from_slice::<Problem>(&body) {
            Ok(problem) => AcmeError::Protocol {
                status: status.as_u16(),
                kind: problem.kind,
                detail: problem.detail,
            },
            Err(_) => {
                // Not a problem document; fall back to the raw body or the
                // status line.
                let mut detail = String::from_utf8_lossy(&body).trim().to_string();
                if detail.is_empty() {
                    detail = status.to_string();
                }
                AcmeError::Protocol {
                    status: status.as_u16(),
                    kind: String::new(),
                    detail,
                }
            }
        }
    }

    /// Fetch issuer certificates by following `Link rel="up"` headers until
    /// the chain is complete.
    async fn complete_chain(
        &self,
        leaf: Vec<u8>,
        mut up: Option<String>,
    ) -> AcmeResult<Vec<Vec<u8>>> {
        const MAX_CHAIN: usize = 8;
        let mut chain = vec![leaf];
        while let Some(url) = up {
            if chain.len() >= MAX_CHAIN {
                return Err(AcmeError::BadResponse("issuer chain too long".into()));
            }
            debug!(%url, "fetching issuer certificate");
            let response = self.http.get(&url).send().await?;
            self.nonces.refill(response.headers());
            if !response.status().is_success() {
                return Err(Self::protocol_error(response).await);
            }
            up = up_link(response.headers());
            chain.push(response.bytes().await?.to_vec());
        }
        Ok(chain)
    }

    fn location(headers: &HeaderMap) -> Option<String> {
        headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn register(&self, account: &Account) -> AcmeResult<Account> {
        let mut payload = json!({
            "resource": "new-reg",
            "agreement": account.terms,
        });
        if let Some(contact) = &account.contact {
            payload["contact"] = json!([contact]);
        }

        let response = self.signed_post(&self.directory.new_reg, payload).await?;
        if response.status() == StatusCode::CONFLICT {
            let location = Self::location(response.headers()).ok_or_else(|| {
                AcmeError::BadResponse("conflicting registration without a location".into())
            })?;
            // The header may be relative; the caller needs an absolute URI.
            let absolute = self.directory_url.join(&location).map_err(|err| {
                AcmeError::BadResponse(format!("unparseable account location {location:?}: {err}"))
            })?;
            return Err(AcmeError::AccountExists {
                location: absolute.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(Self::protocol_error(response).await);
        }

        let location = Self::location(response.headers());
        Ok(Account {
            location: location.or_else(|| account.location.clone()),
            ..account.clone()
        })
    }

    async fn update_account(&self, location: &str, account: &Account) -> AcmeResult<Account> {
        let mut payload = json!({
            "resource": "reg",
            "agreement": account.terms,
        });
        if let Some(contact) = &account.contact {
            payload["contact"] = json!([contact]);
        }

        let response = self.signed_post(location, payload).await?;
        if !response.status().is_success() {
            return Err(Self::protocol_error(response).await);
        }
        Ok(Account {
            location: Some(location.to_string()),
            ..account.clone()
        })
    }

    async fn authorization(&self, domain: &str) -> AcmeResult<Authorization> {
        let payload = json!({
            "resource": "new-authz",
            "identifier": { "type": "dns", "value": domain },
        });
        let response = self.signed_post(&self.directory.new_authz, payload).await?;
        if !response.status().is_success() {
            return Err(Self::protocol_error(response).await);
        }
        let location = Self::location(response.headers()).unwrap_or_default();
        let mut authorization: Authorization = response.json().await?;
        authorization.location = location;
        Ok(authorization)
    }

    async fn accept(&self, challenge: &Challenge) -> AcmeResult<()> {
        let payload = json!({
            "resource": "challenge",
            "type": challenge.kind,
            "keyAuthorization": self.key.key_authorization(&challenge.token)?,
        });
        let response = self.signed_post(&challenge.uri, payload).await?;
        if !response.status().is_success() {
            return Err(Self::protocol_error(response).await);
        }
        Ok(())
    }

    async fn poll_authorization(&self, location: &str) -> AcmeResult<Authorization> {
        let response = self.http.get(location).send().await?;
        self.nonces.refill(response.headers());
        if !response.status().is_success() {
            return Err(Self::protocol_error(response).await);
        }
        let mut authorization: Authorization = response.json().await?;
        authorization.location = location.to_string();
        Ok(authorization)
    }

    async fn request_certificate(
        &self,
        csr_der: &[u8],
        not_after: Option<&str>,
    ) -> AcmeResult<CertificateOrder> {
        let mut payload = json!({
            "resource": "new-cert",
            "csr": URL_SAFE_NO_PAD.encode(csr_der),
        });
        if let Some(not_after) = not_after {
            payload["notAfter"] = json!(not_after);
        }

        let response = self.signed_post(&self.directory.new_cert, payload).await?;
        if !response.status().is_success() {
            return Err(Self::protocol_error(response).await);
        }

        let location = Self::location(response.headers());
        let up = up_link(response.headers());
        let body = response.bytes().await?;
        if body.is_empty() {
            let location = location.ok_or_else(|| {
                AcmeError::BadResponse("deferred issuance without a poll location".into())
            })?;
            debug!(%location, "issuance deferred by the authority");
            return Ok(CertificateOrder::Pending(location));
        }
        Ok(CertificateOrder::Issued(
            self.complete_chain(body.to_vec(), up).await?,
        ))
    }

    async fn poll_certificate(&self, location: &str) -> AcmeResult<CertificatePoll> {
        let response = self.http.get(location).send().await?;
        self.nonces.refill(response.headers());

        if response.status() == StatusCode::ACCEPTED {
            let delay = retry_after(response.headers()).unwrap_or(DEFAULT_RETRY);
            return Ok(CertificatePoll::RetryAfter(delay));
        }
        if !response.status().is_success() {
            return Err(Self::protocol_error(response).await);
        }

        let up = up_link(response.headers());
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(CertificatePoll::RetryAfter(DEFAULT_RETRY));
        }
        Ok(CertificatePoll::Issued(
            self.complete_chain(body.to_vec(), up).await?,
        ))
    }

    fn key_authorization(&self, token: &str) -> AcmeResult<String> {
        self.key.key_authorization(token)
    }
}

/// First `Link` header target with `rel="up"`, if any.
fn up_link(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(LINK) {
        let Ok(raw) = value.to_str() else { continue };
        for part in raw.split(',') {
            let mut pieces = part.trim().split(';');
            let target = match pieces.next() {
                Some(target) => target.trim(),
                None => continue,
            };
            if !(target.starts_with('<') && target.ends_with('>')) {
                continue;
            }
            let is_up = pieces.any(|p| matches!(p.trim(), "rel=\"up\"" | "rel=up"));
            if is_up {
                return Some(target[1..target.len() - 1].to_string());
            }
        }
    }
    None
}

/// `Retry-After` in its delay-seconds form. The HTTP-date form is rare
/// enough here that it falls back to the default delay.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
