//! Account directory contract
//!
//! The directory owns account state. Authentication only reads accounts (by email
//! at login, by id on every request) and touches the last-login timestamp.
//! All lookups made by this crate go through [`lookup_by_id`] / [`lookup_by_email`],
//! which bound the call with a timeout so a stalled directory cannot hang a request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::core::db::models::Account;

/// Directory error types
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Account directory unavailable: {0}")]
    Unavailable(String),

    #[error("Account directory did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Malformed account record: {0}")]
    MalformedRecord(String),
}

/// Read access to accounts
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, DirectoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, DirectoryError>;

    async fn touch_last_login(&self, id: Uuid) -> Result<(), DirectoryError>;
}

/// Look up an account by id, giving up after `timeout`
pub async fn lookup_by_id(
    directory: &dyn AccountDirectory,
    id: Uuid,
    timeout: Duration,
) -> Result<Option<Account>, DirectoryError> {
    tokio::time::timeout(timeout, directory.find_by_id(id))
        .await
        .map_err(|_| DirectoryError::Timeout(timeout))?
}

/// Look up an account by email, giving up after `timeout`
pub async fn lookup_by_email(
    directory: &dyn AccountDirectory,
    email: &str,
    timeout: Duration,
) -> Result<Option<Account>, DirectoryError> {
    tokio::time::timeout(timeout, directory.find_by_email(email))
        .await
        .map_err(|_| DirectoryError::Timeout(timeout))?
}

/// In-process directory used for development and tests
#[derive(Clone, Default)]
pub struct InMemoryAccountDirectory {
    accounts: Arc<DashMap<Uuid, Account>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account
    pub fn upsert(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    /// Flip the active flag; returns false when the account is unknown
    pub fn set_active(&self, id: Uuid, is_active: bool) -> bool {
        match self.accounts.get_mut(&id) {
            Some(mut account) => {
                account.is_active = is_active;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: Uuid) -> Option<Account> {
        self.accounts.remove(&id).map(|(_, account)| account)
    }

    pub fn get(&self, id: Uuid) -> Option<Account> {
        self.accounts.get(&id).map(|account| account.clone())
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, DirectoryError> {
        Ok(self
            .accounts
            .iter()
            .find(|entry| entry.email.eq_ignore_ascii_case(email))
            .map(|entry| entry.value().clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, DirectoryError> {
        Ok(self.get(id))
    }

    async fn touch_last_login(&self, id: Uuid) -> Result<(), DirectoryError> {
        if let Some(mut account) = self.accounts.get_mut(&id) {
            account.last_login_at = Some(Utc::now());
        }
        Ok(())
    }
}
