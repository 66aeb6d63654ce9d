mod repository;
mod service;

pub use repository::*;
pub use service::*;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::error::Result;

/// Credentials of one login attempt.
///
/// Lives for a single request; the password is wiped on drop.
#[derive(Clone)]
pub struct UserLoginDto {
    login: String,
    password: Zeroizing<String>,
}

impl UserLoginDto {
    /// Create a new [`UserLoginDto`].
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    #[inline]
    pub fn login(&self) -> &str {
        &self.login
    }

    #[inline]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for UserLoginDto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserLoginDto")
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Snapshot of a stored user, as read for one login attempt.
#[derive(Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct UserDataDto {
    pub id: i64,
    pub login: String,
    /// Stored password hash (keyed hash or a legacy digest).
    pub pass: String,
    /// Salt of legacy digests, empty once migrated.
    pub hash_salt: String,
    /// Stored hash still uses a legacy format.
    pub is_migrate: bool,
}

impl std::fmt::Debug for UserDataDto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDataDto")
            .field("id", &self.id)
            .field("login", &self.login)
            .field("pass", &"[REDACTED]")
            .field("hash_salt", &"[REDACTED]")
            .field("is_migrate", &self.is_migrate)
            .finish()
    }
}

/// Read access to users.
#[async_trait]
pub trait UserService: Send + Sync {
    /// Find a user by login.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ServerError::NotFound`] if no user has this
    /// login.
    async fn get_by_login(&self, login: &str) -> Result<UserDataDto>;
}

/// Write access to user passwords.
#[async_trait]
pub trait UserPassService: Send + Sync {
    /// Rehash `plain` with the current keyed hash and persist it, clearing
    /// the migration flag.
    async fn migrate_user_pass_by_id(&self, id: i64, plain: &str) -> Result<()>;
}
