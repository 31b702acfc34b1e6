use std::path::PathBuf;
use std::sync::Arc;

use cs_acme::{AuthorityClient, AuthorizationStatus, HTTP01};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::types::{DomainError, IssueConfig, IssueError, IssueResult};

/// Prove control of `domain`, driving one HTTP-01 challenge from proof
/// write to the authority's terminal verdict. Bounded by the configured
/// authorization timeout; aborts early when `cancel` fires.
///
/// The proof artifact attests control of the domain, so it must not
/// outlive the attempt: it is removed on every exit path, including
/// timeout and cancellation.
pub async fn fulfill_domain(
    client: &dyn AuthorityClient,
    http: &reqwest::Client,
    config: &IssueConfig,
    domain: &str,
    cancel: &CancellationToken,
) -> Result<(), DomainError> {
    let mut proof_path: Option<PathBuf> = None;
    let attempt = fulfill_inner(client, http, config, domain, &mut proof_path, cancel);
    let outcome = match time::timeout(config.authorization_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::Timeout),
    };

    if let Some(path) = proof_path {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(domain, path = %path.display(), "challenge response removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(domain, path = %path.display(), error = %err, "failed to remove challenge response");
            }
        }
    }
    outcome
}

async fn fulfill_inner(
    client: &dyn AuthorityClient,
    http: &reqwest::Client,
    config: &IssueConfig,
    domain: &str,
    proof_path: &mut Option<PathBuf>,
    cancel: &CancellationToken,
) -> Result<(), DomainError> {
    let authorization = client.authorization(domain).await?;

    if authorization.status == AuthorizationStatus::Valid {
        debug!(domain, "authorization already valid, nothing to prove");
        return Ok(());
    }

    let challenge = authorization
        .challenges
        .iter()
        .find(|challenge| challenge.kind == HTTP01)
        .cloned()
        .ok_or(DomainError::UnsupportedChallenge)?;

    let proof = client.key_authorization(&challenge.token)?;
    let path = config.challenge_dir.join(&challenge.token);
    *proof_path = Some(path.clone());
    tokio::fs::write(&path, proof.as_bytes())
        .await
        .map_err(|source| DomainError::ProofWrite {
            path: path.clone(),
            source,
        })?;
    debug!(domain, path = %path.display(), "challenge response written");

    if config.self_check {
        self_check(http, domain, &challenge.token).await?;
    }

    client.accept(&challenge).await?;
    debug!(domain, "challenge accepted, waiting for the verdict");

    poll_verdict(client, config, domain, &authorization.location, cancel).await
}

/// Fetch the proof the way the authority will, so an unreachable artifact
/// fails locally instead of burning a validation attempt.
async fn self_check(
    http: &reqwest::Client,
    domain: &str,
    token: &str,
) -> Result<(), DomainError> {
    let url = format!("http://{domain}/.well-known/acme-challenge/{token}");
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|err| DomainError::SelfCheck {
            url: url.clone(),
            reason: err.to_string(),
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(DomainError::SelfCheck {
            url,
            reason: format!("status {}", status.as_u16()),
        });
    }
    debug!(domain, "self-check passed");
    Ok(())
}

async fn poll_verdict(
    client: &dyn AuthorityClient,
    config: &IssueConfig,
    domain: &str,
    location: &str,
    cancel: &CancellationToken,
) -> Result<(), DomainError> {
    loop {
        let authorization = client.poll_authorization(location).await?;
        match authorization.status {
            AuthorizationStatus::Valid => {
                info!(domain, "domain validated");
                return Ok(());
            }
            AuthorizationStatus::Invalid => return Err(DomainError::Rejected),
            _ => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(DomainError::Canceled),
            _ = time::sleep(config.poll_interval) => {}
        }
    }
}

/// Run the fulfillment flow for every domain concurrently.
///
/// The first failing worker cancels the shared token itself, so siblings
/// observe it at their next poll tick regardless of join order; all workers
/// are joined before returning. Cancellation-induced failures never win
/// attribution over the failure that triggered them.
pub async fn authorize_all(
    client: Arc<dyn AuthorityClient>,
    http: reqwest::Client,
    config: &IssueConfig,
    domains: &[String],
) -> IssueResult<()> {
    let cancel = CancellationToken::new();
    let mut workers = Vec::with_capacity(domains.len());
    for domain in domains {
        let client = client.clone();
        let http = http.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        let domain = domain.clone();
        workers.push(tokio::spawn(async move {
            let result = fulfill_domain(client.as_ref(), &http, &config, &domain, &cancel).await;
            if let Err(err) = &result {
                if !err.is_canceled() {
                    warn!(%domain, error = %err, "domain failed, aborting the others");
                    cancel.cancel();
                }
            }
            result
        }));
    }

    let mut triggering: Option<(String, DomainError)> = None;
    let mut canceled: Option<(String, DomainError)> = None;
    for (domain, worker) in domains.iter().zip(workers) {
        let result = match worker.await {
            Ok(result) => result,
            Err(join_err) => {
                cancel.cancel();
                Err(DomainError::Worker(join_err))
            }
        };
        if let Err(err) = result {
            if err.is_canceled() {
                if canceled.is_none() {
                    canceled = Some((domain.clone(), err));
                }
            } else if triggering.is_none() {
                triggering = Some((domain.clone(), err));
            }
        }
    }

    match triggering.or(canceled) {
        None => {
            info!(domains = domains.len(), "all domains authorized");
            Ok(())
        }
        Some((domain, source)) => Err(IssueError::Domain { domain, source }),
    }
}
