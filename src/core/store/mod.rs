//! Key-value session store
//!
//! A TTL-capable key-value store shared by every request. Authentication keeps two
//! namespaces in it (refresh sessions and revocation markers) through the typed
//! [`SessionStore`] adapter. The store is an injected capability with an explicit
//! `open`/`close` lifecycle; nothing holds a process-wide client.
//!
//! Only single-key operations are assumed. [`KeyValueStore::compare_and_delete`] is the
//! primitive that makes refresh-token rotation single-use.

pub mod memory;
pub mod session;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::InMemoryStore;
pub use session::{RevocationMarker, SessionRecord, SessionStore, StoredSession};

/// Store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("TTL must be positive")]
    InvalidTtl,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the session layer needs from a backing cache
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Connect / start background maintenance. Calling twice is harmless.
    async fn open(&self) -> StoreResult<()>;

    /// Stop background maintenance; later operations fail with `Unavailable`
    async fn close(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    /// Remove a key; returns whether a live entry was removed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Remove `key` only if its current value equals `expected`.
    /// Exactly one of several concurrent callers with the same `expected` observes `true`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    /// Remove every live key starting with `prefix`; returns the removed keys
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}
