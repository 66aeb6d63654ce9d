//! Handle tracking requests.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::Result;
use crate::track::{TrackRequest, TrackService};

#[derive(Clone)]
pub struct TrackRepository {
    pool: Pool<Postgres>,
}

impl TrackRepository {
    /// Create a new [`TrackRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrackService for TrackRepository {
    async fn add(&self, track: &TrackRequest) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO tracks (user_id, source, time, ipv4, ipv6)
                VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(track.user_id)
        .bind(&track.source)
        .bind(track.time)
        .bind(track.ipv4())
        .bind(track.ipv6())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_since(&self, track: &TrackRequest, since: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*)
                FROM tracks
                WHERE source = $1
                    AND time >= $2
                    AND (ipv4 = $3 OR ipv6 = $4)"#,
        )
        .bind(&track.source)
        .bind(since)
        .bind(track.ipv4())
        .bind(track.ipv6())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
