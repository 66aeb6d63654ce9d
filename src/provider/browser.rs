use async_trait::async_trait;

use crate::crypto;
use crate::error::Result;
use crate::provider::{
    AuthData, AuthOutcome, AuthProvider, DenyReason, ProviderKind,
};
use crate::user::UserLoginDto;

/// How the server asserted an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    BasicAuth,
    ProxyHeader,
}

/// Identity asserted by the web server or a reverse proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserIdentity {
    pub login: String,
    pub source: IdentitySource,
}

/// Trusts the identity the server already authenticated.
pub struct BrowserAuthProvider {
    identity: Option<BrowserIdentity>,
    domain: Option<String>,
    authoritative: bool,
}

impl BrowserAuthProvider {
    /// Create a new [`BrowserAuthProvider`] for the identity of the current
    /// request.
    pub fn new(
        identity: Option<BrowserIdentity>,
        domain: Option<String>,
        authoritative: bool,
    ) -> Self {
        Self {
            identity,
            domain,
            authoritative,
        }
    }

    fn qualify(&self, name: &str) -> String {
        match &self.domain {
            Some(domain) if !name.contains('@') => format!("{name}@{domain}"),
            _ => name.to_owned(),
        }
    }
}

#[async_trait]
impl AuthProvider for BrowserAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Browser
    }

    fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    async fn authenticate(&self, login: &UserLoginDto) -> Result<AuthOutcome> {
        let Some(identity) = &self.identity else {
            return Ok(AuthOutcome::Denied(DenyReason::NoServerIdentity));
        };

        if crypto::constant_time_eq(
            &self.qualify(&identity.login),
            &self.qualify(login.login()),
        ) {
            Ok(AuthOutcome::Granted(AuthData::Browser(identity.clone())))
        } else {
            Ok(AuthOutcome::Denied(DenyReason::IdentityMismatch))
        }
    }
}
