//! Certificate issuance orchestration: account registration with conflict
//! recovery, concurrent HTTP-01 domain authorization with fail-fast
//! cancellation, and certificate-retrieval polling.

mod authorize;
mod certificate;
mod flow;
mod register;
#[cfg(test)]
mod testutil;
pub mod types;

pub use authorize::{authorize_all, fulfill_domain};
pub use certificate::{chain_to_pem, obtain_certificate};
pub use flow::issue;
pub use register::resolve_account;
pub use types::{DomainError, IssueConfig, IssueError, IssueResult};
