//! PostgreSQL pool for the account directory
//!
//! The `accounts` schema belongs to the directory; this crate only reads it and never
//! migrates it.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::core::config::Config;

/// Pool sizing and connection settings
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl DbConfig {
    /// Directory pool for `config`; fails when no database is configured
    pub fn from_config(config: &Config) -> Result<Self, DbError> {
        let database_url = config
            .database_url
            .clone()
            .ok_or(DbError::MissingDatabaseUrl)?;

        Ok(Self {
            database_url,
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,

    #[error("Account database unreachable: {0}")]
    Unreachable(#[from] sqlx::Error),
}

/// Open the pool; connections are established lazily up to `max_connections`
pub async fn create_pool(config: &DbConfig) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.database_url)
        .await?;

    Ok(pool)
}

/// Round-trip a trivial query
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
