//! Authority-facing protocol client: typed protocol records, structured
//! errors, JWS request signing, and the HTTP implementation used against a
//! live authority. The [`AuthorityClient`] trait is the seam the issuance
//! core is driven (and tested) through.

mod client;
mod jws;
pub mod types;

pub use client::{AuthorityClient, HttpAuthorityClient};
pub use jws::AccountKey;
pub use types::{
    Account, AcmeError, AcmeResult, Authorization, AuthorizationStatus, CertificateOrder,
    CertificatePoll, Challenge, HTTP01,
};
