use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::ldap::LdapDirectory;
use crate::provider::{
    AuthData, AuthOutcome, AuthProvider, DenyReason, ProviderKind,
};
use crate::user::UserLoginDto;

/// Directory accounts.
///
/// Authoritative only when the directory is the sole source of truth;
/// otherwise a denial lets local accounts be tried.
pub struct LdapAuthProvider {
    directory: Arc<dyn LdapDirectory>,
    authoritative: bool,
}

impl LdapAuthProvider {
    /// Create a new [`LdapAuthProvider`].
    pub fn new(directory: Arc<dyn LdapDirectory>, authoritative: bool) -> Self {
        Self {
            directory,
            authoritative,
        }
    }
}

#[async_trait]
impl AuthProvider for LdapAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ldap
    }

    fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    async fn authenticate(&self, login: &UserLoginDto) -> Result<AuthOutcome> {
        let entry = self
            .directory
            .authenticate(login.login(), login.password())
            .await?;

        Ok(match entry {
            Some(entry) => AuthOutcome::Granted(AuthData::Ldap(entry)),
            None => AuthOutcome::Denied(DenyReason::InvalidPassword),
        })
    }
}
