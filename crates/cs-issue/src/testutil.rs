//! Scripted stand-in for the authority used across the crate's tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use cs_acme::{
    Account, AcmeError, AcmeResult, Authorization, AuthorizationStatus, AuthorityClient,
    CertificateOrder, CertificatePoll, Challenge, HTTP01,
};

/// Each method pops its next scripted response; call records are kept so
/// tests can assert what the flow actually did. Unscripted authorization
/// polls report `pending`, so a silent domain simply never converges.
#[derive(Default)]
pub struct ScriptedAuthority {
    registers: Mutex<VecDeque<AcmeResult<Account>>>,
    authorizations: Mutex<HashMap<String, VecDeque<AcmeResult<Authorization>>>>,
    polls: Mutex<HashMap<String, VecDeque<AcmeResult<Authorization>>>>,
    orders: Mutex<VecDeque<AcmeResult<CertificateOrder>>>,
    cert_polls: Mutex<VecDeque<AcmeResult<CertificatePoll>>>,
    pub accepts: Mutex<Vec<String>>,
    pub update_calls: Mutex<Vec<String>>,
}

impl ScriptedAuthority {
    pub fn script_register(&self, response: AcmeResult<Account>) {
        self.registers.lock().unwrap().push_back(response);
    }

    pub fn script_authorization(&self, domain: &str, response: AcmeResult<Authorization>) {
        self.authorizations
            .lock()
            .unwrap()
            .entry(domain.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn script_poll(&self, location: &str, response: AcmeResult<Authorization>) {
        self.polls
            .lock()
            .unwrap()
            .entry(location.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn script_order(&self, response: AcmeResult<CertificateOrder>) {
        self.orders.lock().unwrap().push_back(response);
    }

    pub fn script_cert_poll(&self, response: AcmeResult<CertificatePoll>) {
        self.cert_polls.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl AuthorityClient for ScriptedAuthority {
    async fn register(&self, account: &Account) -> AcmeResult<Account> {
        self.registers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(Account {
                    location: Some("https://authority.test/reg/default".into()),
                    ..account.clone()
                })
            })
    }

    async fn update_account(&self, location: &str, account: &Account) -> AcmeResult<Account> {
        self.update_calls.lock().unwrap().push(location.to_string());
        Ok(Account {
            location: Some(location.to_string()),
            ..account.clone()
        })
    }

    async fn authorization(&self, domain: &str) -> AcmeResult<Authorization> {
        match self
            .authorizations
            .lock()
            .unwrap()
            .get_mut(domain)
            .and_then(|queue| queue.pop_front())
        {
            Some(response) => response,
            None => Err(AcmeError::BadResponse(format!(
                "unscripted authorization for {domain}"
            ))),
        }
    }

    async fn accept(&self, challenge: &Challenge) -> AcmeResult<()> {
        self.accepts.lock().unwrap().push(challenge.token.clone());
        Ok(())
    }

    async fn poll_authorization(&self, location: &str) -> AcmeResult<Authorization> {
        match self
            .polls
            .lock()
            .unwrap()
            .get_mut(location)
            .and_then(|queue| queue.pop_front())
        {
            Some(response) => response,
            None => Ok(pending_authz(location, vec![])),
        }
    }

    async fn request_certificate(
        &self,
        _csr_der: &[u8],
        _not_after: Option<&str>,
    ) -> AcmeResult<CertificateOrder> {
        self.orders
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AcmeError::BadResponse("unscripted issuance request".into())))
    }

    async fn poll_certificate(&self, _location: &str) -> AcmeResult<CertificatePoll> {
        self.cert_polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AcmeError::BadResponse("unscripted certificate poll".into())))
    }

    fn key_authorization(&self, token: &str) -> AcmeResult<String> {
        Ok(format!("{token}.scripted-thumbprint"))
    }
}

pub fn http01(token: &str) -> Challenge {
    Challenge {
        kind: HTTP01.to_string(),
        uri: format!("https://authority.test/chal/{token}"),
        token: token.to_string(),
    }
}

pub fn pending_authz(location: &str, challenges: Vec<Challenge>) -> Authorization {
    Authorization {
        status: AuthorizationStatus::Pending,
        challenges,
        location: location.to_string(),
    }
}

pub fn valid_authz(location: &str) -> Authorization {
    Authorization {
        status: AuthorizationStatus::Valid,
        challenges: vec![],
        location: location.to_string(),
    }
}

pub fn invalid_authz(location: &str) -> Authorization {
    Authorization {
        status: AuthorizationStatus::Invalid,
        challenges: vec![],
        location: location.to_string(),
    }
}
