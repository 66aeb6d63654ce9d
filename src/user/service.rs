use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::crypto::Hash;
use crate::error::Result;
use crate::user::{UserPassService, UserRepository};

/// Password write path.
#[derive(Clone)]
pub struct UserPassManager {
    repo: UserRepository,
    hash: Arc<Hash>,
}

impl UserPassManager {
    /// Create a new [`UserPassManager`].
    pub fn new(pool: Pool<Postgres>, hash: Arc<Hash>) -> Self {
        Self {
            repo: UserRepository::new(pool),
            hash,
        }
    }
}

#[async_trait]
impl UserPassService for UserPassManager {
    async fn migrate_user_pass_by_id(&self, id: i64, plain: &str) -> Result<()> {
        let hash = self.hash.hash_key(plain)?;
        self.repo.update_pass(id, &hash).await?;

        tracing::info!(user_id = id, "password hash migrated");
        Ok(())
    }
}
