use cs_acme::{AuthorityClient, CertificateOrder, CertificatePoll};
use tokio::time;
use tracing::{debug, info};

use crate::types::{IssueConfig, IssueError, IssueResult};

/// Request issuance and wait for the signed chain, honoring the
/// authority's own pacing when it defers. Bounded by the configured
/// issuance timeout.
pub async fn obtain_certificate(
    client: &dyn AuthorityClient,
    config: &IssueConfig,
    csr_der: &[u8],
    not_after: Option<&str>,
) -> IssueResult<Vec<Vec<u8>>> {
    match time::timeout(
        config.issuance_timeout,
        request_and_poll(client, csr_der, not_after),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(IssueError::IssuanceTimeout(config.issuance_timeout)),
    }
}

async fn request_and_poll(
    client: &dyn AuthorityClient,
    csr_der: &[u8],
    not_after: Option<&str>,
) -> IssueResult<Vec<Vec<u8>>> {
    let location = match client
        .request_certificate(csr_der, not_after)
        .await
        .map_err(IssueError::Issuance)?
    {
        CertificateOrder::Issued(chain) => {
            info!(blocks = chain.len(), "certificate issued synchronously");
            return Ok(chain);
        }
        CertificateOrder::Pending(location) => location,
    };

    debug!(%location, "issuance deferred, polling");
    loop {
        match client
            .poll_certificate(&location)
            .await
            .map_err(IssueError::Issuance)?
        {
            CertificatePoll::Issued(chain) => {
                info!(blocks = chain.len(), "certificate issued");
                return Ok(chain);
            }
            CertificatePoll::RetryAfter(delay) => {
                debug!(delay_secs = delay.as_secs(), "authority asked us to retry later");
                time::sleep(delay).await;
            }
        }
    }
}

/// Concatenate the chain's DER blocks as `CERTIFICATE` PEM, leaf first.
pub fn chain_to_pem(chain: &[Vec<u8>]) -> String {
    chain
        .iter()
        .map(|der| pem::encode(&pem::Pem::new("CERTIFICATE", der.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedAuthority;
    use cs_acme::AcmeError;
    use std::time::Duration;

    fn config() -> IssueConfig {
        IssueConfig::default()
    }

    #[tokio::test]
    async fn test_synchronous_issuance() {
        let authority = ScriptedAuthority::default();
        let chain = vec![vec![1u8, 2, 3], vec![4u8, 5, 6]];
        authority.script_order(Ok(CertificateOrder::Issued(chain.clone())));

        let issued = obtain_certificate(&authority, &config(), b"csr", None)
            .await
            .unwrap();
        assert_eq!(issued, chain);
    }

    /// Poll sequence pending → retry-after(2 s) → chain: the suggested
    /// delay is slept in full before the next poll.
    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honored() {
        let authority = ScriptedAuthority::default();
        authority.script_order(Ok(CertificateOrder::Pending(
            "https://authority.test/cert/1".into(),
        )));
        authority.script_cert_poll(Ok(CertificatePoll::RetryAfter(Duration::from_secs(2))));
        authority.script_cert_poll(Ok(CertificatePoll::Issued(vec![vec![7u8, 8]])));

        let started = time::Instant::now();
        let issued = obtain_certificate(&authority, &config(), b"csr", None)
            .await
            .unwrap();

        assert_eq!(issued, vec![vec![7u8, 8]]);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_polling() {
        let authority = ScriptedAuthority::default();
        authority.script_order(Ok(CertificateOrder::Pending(
            "https://authority.test/cert/1".into(),
        )));
        for _ in 0..8 {
            authority.script_cert_poll(Ok(CertificatePoll::RetryAfter(Duration::from_secs(3))));
        }
        let cfg = IssueConfig {
            issuance_timeout: Duration::from_secs(10),
            ..config()
        };

        let err = obtain_certificate(&authority, &cfg, b"csr", None)
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::IssuanceTimeout(_)));
    }

    #[tokio::test]
    async fn test_poll_errors_are_fatal() {
        let authority = ScriptedAuthority::default();
        authority.script_order(Ok(CertificateOrder::Pending(
            "https://authority.test/cert/1".into(),
        )));
        authority.script_cert_poll(Err(AcmeError::Protocol {
            status: 500,
            kind: "urn:acme:error:serverInternal".into(),
            detail: "boom".into(),
        }));

        let err = obtain_certificate(&authority, &config(), b"csr", None)
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::Issuance(_)));
    }

    #[test]
    fn test_chain_pem_round_trip() {
        let chain = vec![vec![0x30u8, 0x03, 0x02, 0x01, 0x01], vec![0x30u8, 0x01, 0x00]];
        let encoded = chain_to_pem(&chain);

        let blocks = pem::parse_many(&encoded).unwrap();
        assert_eq!(blocks.len(), 2);
        for (block, original) in blocks.iter().zip(&chain) {
            assert_eq!(block.tag(), "CERTIFICATE");
            assert_eq!(block.contents(), original.as_slice());
        }
    }
}
