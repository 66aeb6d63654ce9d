//! Authentication providers.
//!
//! A provider answers one question: do these credentials belong to this
//! login? Wrong credentials are a normal [`AuthOutcome::Denied`], errors are
//! kept for unreachable backends.

mod browser;
mod database;
mod ldap;

pub use browser::*;
pub use database::*;
pub use ldap::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ldap::LdapEntry;
use crate::user::{UserDataDto, UserLoginDto};

/// Provider type. At most one provider of each type is registered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Browser,
    Ldap,
    Database,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Browser => "browser",
            ProviderKind::Ldap => "ldap",
            ProviderKind::Database => "database",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider specific data of a grant.
#[derive(Debug, Clone)]
pub enum AuthData {
    Database { user: UserDataDto, migrated: bool },
    Ldap(LdapEntry),
    Browser(BrowserIdentity),
}

/// Why a provider denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    UserNotFound,
    InvalidPassword,
    /// Server asserted another identity.
    IdentityMismatch,
    /// Server asserted no identity at all.
    NoServerIdentity,
    /// Backend failed or timed out.
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub enum AuthOutcome {
    Granted(AuthData),
    Denied(DenyReason),
}

/// Outcome of one provider for one attempt.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub provider: ProviderKind,
    pub authoritative: bool,
    pub outcome: AuthOutcome,
}

impl AuthResult {
    #[inline]
    pub fn granted(&self) -> bool {
        matches!(self.outcome, AuthOutcome::Granted(_))
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match &self.outcome {
            AuthOutcome::Granted(_) => None,
            AuthOutcome::Denied(reason) => Some(reason),
        }
    }
}

/// Pluggable authentication strategy.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Whether a grant from this provider is final.
    fn is_authoritative(&self) -> bool;

    /// Check credentials of `login`.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures; a refusal is `Ok(AuthOutcome::Denied)`.
    async fn authenticate(&self, login: &UserLoginDto) -> Result<AuthOutcome>;
}
