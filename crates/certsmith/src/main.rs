mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cs_acme::{Account, AuthorityClient, HttpAuthorityClient};
use cs_issue::IssueConfig;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,certsmith=debug".parse().unwrap()),
        )
        .init();

    let cli = config::Cli::parse();

    // Everything that can fail locally fails here, before any network
    // traffic.
    let key = config::load_account_key(&cli.account_key)?;
    let csr = config::load_csr(&cli.csr)?;
    config::check_challenge_dir(&cli.challenge_dir)?;

    let account = Account {
        terms: cli.account_terms.clone(),
        contact: cli
            .account_email
            .as_ref()
            .map(|email| format!("mailto:{email}")),
        location: None,
    };

    let issue_config = IssueConfig {
        challenge_dir: cli.challenge_dir.clone(),
        self_check: !cli.skip_self_check,
        authorization_timeout: Duration::from_secs(cli.auth_timeout_secs),
        issuance_timeout: Duration::from_secs(cli.cert_timeout_secs),
        ..IssueConfig::default()
    };

    info!(server = %cli.acme_server, domains = ?csr.domains, "starting issuance");

    let directory_url = cli
        .acme_server
        .parse()
        .context("invalid authority directory URL")?;
    let client = HttpAuthorityClient::connect(directory_url, key)
        .await
        .context("could not reach the authority directory")?;
    let client: Arc<dyn AuthorityClient> = Arc::new(client);

    let self_check_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("could not build self-check HTTP client")?;

    let chain = cs_issue::issue(
        client,
        self_check_http,
        &issue_config,
        &account,
        &csr.domains,
        &csr.der,
        None,
    )
    .await?;

    std::fs::write(&cli.cert, cs_issue::chain_to_pem(&chain))
        .with_context(|| format!("could not write certificate to {}", cli.cert.display()))?;

    info!(path = %cli.cert.display(), blocks = chain.len(), "certificate chain written");
    Ok(())
}
