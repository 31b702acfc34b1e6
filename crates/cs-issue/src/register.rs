use cs_acme::{Account, AcmeError, AuthorityClient};
use tracing::{debug, info};

use crate::types::{IssueError, IssueResult};

/// Ensure an account exists at the authority for our signing key.
///
/// A conflicting registration is the defined recovery path, not an error:
/// the existing record is updated in place with the supplied terms and
/// contact. Anything else is fatal for the run; there is no retry here.
pub async fn resolve_account(
    client: &dyn AuthorityClient,
    account: &Account,
) -> IssueResult<Account> {
    match client.register(account).await {
        Ok(registered) => {
            info!(
                location = registered.location.as_deref().unwrap_or("-"),
                "registered new account"
            );
            Ok(registered)
        }
        Err(AcmeError::AccountExists { location }) => {
            debug!(%location, "account already exists, updating it in place");
            let updated = client
                .update_account(&location, account)
                .await
                .map_err(IssueError::Registration)?;
            info!(%location, "recovered existing account");
            Ok(updated)
        }
        Err(err) => Err(IssueError::Registration(err)),
    }
}
