//! PostgreSQL connection pool.

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::Postgres;
use crate::error::{Result, ServerError};

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "keyward";
pub const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_PORT: u16 = 5432;

/// Shared pool behind every repository.
#[derive(Clone)]
pub struct Database {
    pub postgres: PgPool,
}

impl Database {
    /// Connect the pool described by the `postgres` section.
    ///
    /// Credentials are passed as options, never spliced into a URL, so they
    /// may contain any character.
    pub async fn connect(config: &Postgres) -> Result<Self> {
        let options = connect_options(config)?;
        let postgres = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .connect_with(options)
            .await?;

        tracing::info!(
            address = %config.address,
            database = config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME),
            "postgres connected"
        );

        Ok(Self { postgres })
    }
}

fn connect_options(config: &Postgres) -> Result<PgConnectOptions> {
    let (host, port) = split_address(&config.address)?;

    Ok(PgConnectOptions::new()
        .host(host)
        .port(port)
        .username(config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS))
        .password(config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS))
        .database(config.database.as_deref().unwrap_or(DEFAULT_DATABASE_NAME)))
}

/// Split `host[:port]`.
fn split_address(address: &str) -> Result<(&str, u16)> {
    let invalid = || {
        ServerError::Configuration(format!("invalid postgres address `{address}`"))
    };

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            Ok((host, port.parse().map_err(|_| invalid())?))
        },
        Some(_) => Err(invalid()),
        None if address.is_empty() => Err(invalid()),
        None => Ok((address, DEFAULT_PORT)),
    }
}
