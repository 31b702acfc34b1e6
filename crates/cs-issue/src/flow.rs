use std::sync::Arc;

use cs_acme::{Account, AuthorityClient};

use crate::authorize::authorize_all;
use crate::certificate::obtain_certificate;
use crate::register::resolve_account;
use crate::types::{IssueConfig, IssueResult};

/// End-to-end issuance: register (or recover) the account, prove control
/// of every domain, then retrieve the signed chain.
///
/// Registration strictly precedes all authorization work; every domain
/// must be terminally valid before the certificate request is sent.
pub async fn issue(
    client: Arc<dyn AuthorityClient>,
    http: reqwest::Client,
    config: &IssueConfig,
    account: &Account,
    domains: &[String],
    csr_der: &[u8],
    not_after: Option<&str>,
) -> IssueResult<Vec<Vec<u8>>> {
    resolve_account(client.as_ref(), account).await?;
    authorize_all(client.clone(), http, config, domains).await?;
    obtain_certificate(client.as_ref(), config, csr_der, not_after).await
}
