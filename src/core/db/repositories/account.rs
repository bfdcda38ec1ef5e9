//! Account repository backed by PostgreSQL
//!
//! Read-only view of the `accounts` table owned by the account directory, plus the
//! last-login touch performed after a successful login.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::auth::directory::{AccountDirectory, DirectoryError};
use crate::core::db::models::Account;

const ACCOUNT_COLUMNS: &str =
    "id, email, display_name, role, is_active, password_hash, last_login_at";

impl From<sqlx::Error> for DirectoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DirectoryError::MalformedRecord(err.to_string())
            }
            _ => DirectoryError::Unavailable(err.to_string()),
        }
    }
}

/// Account repository for database operations
#[derive(Clone)]
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    /// Create a new account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountDirectory for AccountRepository {
    /// Find an account by email (case-insensitive)
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, DirectoryError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE lower(email) = lower($1)");
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, DirectoryError> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<(), DirectoryError> {
        sqlx::query("UPDATE accounts SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_map_to_unavailable() {
        let err: DirectoryError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DirectoryError::Unavailable(_)));
    }

    #[test]
    fn test_decode_errors_map_to_malformed_record() {
        let err: DirectoryError = sqlx::Error::Decode("unknown role: janitor".into()).into();
        assert!(matches!(err, DirectoryError::MalformedRecord(_)));
    }

    // These tests require a database seeded with an `accounts` table

    #[tokio::test]
    #[ignore = "requires running PostgreSQL database"]
    async fn test_find_unknown_account() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("Failed to connect");
        let repo = AccountRepository::new(pool);

        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
        assert!(
            repo.find_by_email("nobody@hospital.test")
                .await
                .unwrap()
                .is_none()
        );
    }
}
