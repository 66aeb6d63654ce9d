//! Handle database requests.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::{Result, ServerError};
use crate::user::{UserDataDto, UserService};

#[derive(Clone)]
pub struct UserRepository {
    pool: Pool<Postgres>,
}

impl UserRepository {
    /// Create a new [`UserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Replace stored hash of a user and clear its legacy salt.
    pub async fn update_pass(&self, id: i64, hash: &str) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE users
                SET pass = $1, hash_salt = '', is_migrate = FALSE, last_update = NOW()
                WHERE id = $2"#,
        )
        .bind(hash)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(ServerError::NotFound);
        }

        Ok(())
    }
}

#[async_trait]
impl UserService for UserRepository {
    async fn get_by_login(&self, login: &str) -> Result<UserDataDto> {
        sqlx::query_as::<_, UserDataDto>(
            r#"SELECT id, login, pass, hash_salt, is_migrate
                FROM users
                WHERE login = $1"#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ServerError::NotFound)
    }
}
