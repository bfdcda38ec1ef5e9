//! Typed access to the two authentication namespaces
//!
//! - `session:{subject_id}:{token_id}` holds a [`SessionRecord`]: the proof that the
//!   refresh token of that pair is still honorable. Its TTL is the refresh lifetime.
//! - `revoked:{token_id}` holds a [`RevocationMarker`] for a logged-out pair.
//!
//! Refresh tokens are stored as SHA-256 digests, never in the clear.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{KeyValueStore, StoreError, StoreResult};
use crate::core::auth::token_id::TokenId;

const SESSION_NAMESPACE: &str = "session";
const REVOCATION_NAMESPACE: &str = "revoked";

/// Server-side proof that a refresh token may still be exchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Hex SHA-256 of the refresh token issued for this pair
    pub refresh_token_digest: String,
    pub subject_id: Uuid,
    pub token_id: TokenId,
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(subject_id: Uuid, token_id: TokenId, refresh_token: &str) -> Self {
        Self {
            refresh_token_digest: Self::digest(refresh_token),
            subject_id,
            token_id,
            created_at: Utc::now(),
        }
    }

    /// Hash a token using SHA-256
    pub fn digest(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether `refresh_token` is exactly the token this record was created for
    pub fn matches(&self, refresh_token: &str) -> bool {
        self.refresh_token_digest == Self::digest(refresh_token)
    }
}

/// Marker rejecting every access token of a pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationMarker {
    pub subject_id: Uuid,
    pub token_id: TokenId,
    pub revoked_at: DateTime<Utc>,
}

impl RevocationMarker {
    pub fn new(subject_id: Uuid, token_id: TokenId) -> Self {
        Self {
            subject_id,
            token_id,
            revoked_at: Utc::now(),
        }
    }
}

/// A session record together with the exact stored value it was read from
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub record: SessionRecord,
    raw: String,
}

/// Session and revocation namespaces over a [`KeyValueStore`]
#[derive(Clone)]
pub struct SessionStore {
    backend: Arc<dyn KeyValueStore>,
}

impl SessionStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub async fn open(&self) -> StoreResult<()> {
        self.backend.open().await
    }

    pub async fn close(&self) -> StoreResult<()> {
        self.backend.close().await
    }

    fn session_key(subject_id: Uuid, token_id: &TokenId) -> String {
        format!("{SESSION_NAMESPACE}:{subject_id}:{token_id}")
    }

    fn subject_prefix(subject_id: Uuid) -> String {
        format!("{SESSION_NAMESPACE}:{subject_id}:")
    }

    fn revocation_key(token_id: &TokenId) -> String {
        format!("{REVOCATION_NAMESPACE}:{token_id}")
    }

    /// Write (or overwrite) the session for the record's pair
    pub async fn put_session(&self, record: &SessionRecord, ttl: Duration) -> StoreResult<()> {
        let key = Self::session_key(record.subject_id, &record.token_id);
        let value = serde_json::to_string(record)?;
        self.backend.set_with_ttl(&key, value, to_std(ttl)?).await
    }

    pub async fn get_session(
        &self,
        subject_id: Uuid,
        token_id: &TokenId,
    ) -> StoreResult<Option<StoredSession>> {
        let key = Self::session_key(subject_id, token_id);
        match self.backend.get(&key).await? {
            Some(raw) => {
                let record = serde_json::from_str(&raw)?;
                Ok(Some(StoredSession { record, raw }))
            }
            None => Ok(None),
        }
    }

    /// Delete `session` only if it is still stored unchanged.
    /// Returns false when another caller consumed or replaced it first.
    pub async fn consume_session(&self, session: &StoredSession) -> StoreResult<bool> {
        let key = Self::session_key(session.record.subject_id, &session.record.token_id);
        self.backend.compare_and_delete(&key, &session.raw).await
    }

    pub async fn delete_session(&self, subject_id: Uuid, token_id: &TokenId) -> StoreResult<bool> {
        self.backend
            .delete(&Self::session_key(subject_id, token_id))
            .await
    }

    /// Delete every session of `subject_id`; returns the pair ids that were live
    pub async fn delete_sessions_for(&self, subject_id: Uuid) -> StoreResult<Vec<TokenId>> {
        let prefix = Self::subject_prefix(subject_id);
        let removed = self.backend.delete_prefix(&prefix).await?;
        Ok(removed
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(|id| TokenId::from(id.to_string())))
            .collect())
    }

    pub async fn revoke(&self, marker: &RevocationMarker, ttl: Duration) -> StoreResult<()> {
        let value = serde_json::to_string(marker)?;
        self.backend
            .set_with_ttl(&Self::revocation_key(&marker.token_id), value, to_std(ttl)?)
            .await
    }

    pub async fn is_revoked(&self, token_id: &TokenId) -> StoreResult<bool> {
        self.backend.exists(&Self::revocation_key(token_id)).await
    }
}

fn to_std(ttl: Duration) -> StoreResult<std::time::Duration> {
    ttl.to_std().map_err(|_| StoreError::InvalidTtl)
}
