use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto::{self, Hash};
use crate::error::{Result, ServerError};
use crate::provider::{
    AuthData, AuthOutcome, AuthProvider, DenyReason, ProviderKind,
};
use crate::user::{UserDataDto, UserLoginDto, UserPassService, UserService};

/// Local accounts. Always authoritative.
pub struct DatabaseAuthProvider {
    users: Arc<dyn UserService>,
    passwords: Arc<dyn UserPassService>,
    hash: Arc<Hash>,
}

impl DatabaseAuthProvider {
    /// Create a new [`DatabaseAuthProvider`].
    pub fn new(
        users: Arc<dyn UserService>,
        passwords: Arc<dyn UserPassService>,
        hash: Arc<Hash>,
    ) -> Self {
        Self {
            users,
            passwords,
            hash,
        }
    }

    /// Accept any known hash format, then upgrade to the keyed hash.
    async fn check_migrate_user(
        &self,
        user: UserDataDto,
        login: &UserLoginDto,
    ) -> AuthOutcome {
        let password = login.password();
        let valid = crypto::constant_time_eq(
            &user.pass,
            &crypto::legacy_sha1(&user.hash_salt, password),
        ) || crypto::constant_time_eq(&user.pass, &crypto::legacy_md5(password))
            || crypto::legacy_crypt_matches(password, &user.hash_salt, &user.pass)
            || self.hash.check_hash_key(password, &user.pass);

        if !valid {
            return AuthOutcome::Denied(DenyReason::InvalidPassword);
        }

        let migrated = match self
            .passwords
            .migrate_user_pass_by_id(user.id, password)
            .await
        {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    user_id = user.id,
                    error = %err,
                    "legacy password accepted but not migrated"
                );
                false
            },
        };

        AuthOutcome::Granted(AuthData::Database { user, migrated })
    }
}

#[async_trait]
impl AuthProvider for DatabaseAuthProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Database
    }

    fn is_authoritative(&self) -> bool {
        true
    }

    async fn authenticate(&self, login: &UserLoginDto) -> Result<AuthOutcome> {
        let user = match self.users.get_by_login(login.login()).await {
            Ok(user) => user,
            Err(ServerError::NotFound) => {
                // Unknown logins cost as much as a wrong password.
                self.hash.check_decoy(login.password());
                return Ok(AuthOutcome::Denied(DenyReason::UserNotFound));
            },
            Err(err) => return Err(err),
        };

        if user.is_migrate {
            return Ok(self.check_migrate_user(user, login).await);
        }

        if self.hash.check_hash_key(login.password(), &user.pass) {
            Ok(AuthOutcome::Granted(AuthData::Database {
                user,
                migrated: false,
            }))
        } else {
            Ok(AuthOutcome::Denied(DenyReason::InvalidPassword))
        }
    }
}
