//! Session manager
//!
//! Owns the lifecycle of a token pair, keyed by `(subject_id, token_id)`:
//!
//! - **login** mints a pair identifier, issues access + refresh tokens sharing it and
//!   records the refresh session. No session record, no tokens.
//! - **refresh** exchanges a refresh token exactly once. The old record is removed with
//!   a compare-and-delete before the new pair is handed out, so of two concurrent
//!   exchanges of the same token only one can win.
//! - **logout** drops the session and writes a revocation marker for the pair, which the
//!   request authenticator honors until the access token would have expired anyway.
//!
//! Store mutations run on spawned tasks and are awaited from there, so a caller that
//! goes away mid-request cannot leave a half-rotated session behind.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::auth::audit::{AuditEvent, AuditNotifier};
use crate::core::auth::authenticator::IdentityContext;
use crate::core::auth::directory::{self, AccountDirectory};
use crate::core::auth::error::AuthError;
use crate::core::auth::jwt::{JwtService, TokenPair};
use crate::core::auth::password::{self, PasswordVerifier};
use crate::core::auth::token_id::TokenId;
use crate::core::config::SessionSettings;
use crate::core::db::models::{Account, IdentitySummary};
use crate::core::store::{RevocationMarker, SessionRecord, SessionStore, StoreError};

/// Login request data
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Authentication response with account data and tokens
#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub account: IdentitySummary,
    pub tokens: TokenPair,
}

/// Disposition of one logout step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    AlreadyAbsent,
    Failed,
}

/// What a logout actually achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogoutReceipt {
    /// Removal of the refresh session
    pub session: StepOutcome,
    /// Write of the revocation marker
    pub revocation: StepOutcome,
}

impl LogoutReceipt {
    fn failed() -> Self {
        Self {
            session: StepOutcome::Failed,
            revocation: StepOutcome::Failed,
        }
    }

    /// True when the pair is guaranteed unusable from now on
    pub fn is_complete(&self) -> bool {
        self.revocation == StepOutcome::Done && self.session != StepOutcome::Failed
    }
}

/// What a logout from every device achieved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoutAllReceipt {
    /// Sessions removed, or `None` if the store could not be reached
    pub sessions_removed: Option<usize>,
    /// Revocation markers written / attempted
    pub revoked: usize,
    pub failed: usize,
}

impl LogoutAllReceipt {
    pub fn is_complete(&self) -> bool {
        self.sessions_removed.is_some() && self.failed == 0
    }
}

enum Rotation {
    Rotated,
    /// Another exchange consumed the session first
    Superseded,
    ConsumeFailed(StoreError),
    WriteFailed(StoreError),
}

/// Run a store mutation to completion even if the caller is dropped
async fn run_detached<F, T>(task: F) -> Result<T, AuthError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(task).await.map_err(|err| {
        tracing::error!(error = %err, "detached session mutation panicked");
        AuthError::InternalError("session mutation aborted".to_string())
    })
}

/// Session manager
#[derive(Clone)]
pub struct SessionManager {
    jwt: JwtService,
    store: SessionStore,
    directory: Arc<dyn AccountDirectory>,
    passwords: Arc<dyn PasswordVerifier>,
    audit: AuditNotifier,
    settings: SessionSettings,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        jwt: JwtService,
        store: SessionStore,
        directory: Arc<dyn AccountDirectory>,
        passwords: Arc<dyn PasswordVerifier>,
        audit: AuditNotifier,
        settings: SessionSettings,
    ) -> Self {
        Self {
            jwt,
            store,
            directory,
            passwords,
            audit,
            settings,
        }
    }

    async fn reject_login(
        &self,
        subject_id: Option<Uuid>,
        client_ip: Option<IpAddr>,
        reason: &str,
    ) -> AuthError {
        tracing::info!(subject_id = ?subject_id, reason, "login rejected");
        self.audit
            .notify(AuditEvent::login_failed(subject_id, reason).with_ip(client_ip))
            .await;
        AuthError::InvalidCredentials
    }

    /// Login an existing account
    pub async fn login(
        &self,
        request: LoginRequest,
        client_ip: Option<IpAddr>,
    ) -> Result<AuthResponse, AuthError> {
        let lookup = directory::lookup_by_email(
            self.directory.as_ref(),
            request.email.trim(),
            self.settings.directory_timeout,
        )
        .await;

        let account = match lookup {
            Ok(Some(account)) => account,
            Ok(None) => {
                password::verify_absent_off_thread(self.passwords.clone(), request.password).await;
                return Err(self.reject_login(None, client_ip, "unknown_account").await);
            }
            Err(err) => {
                tracing::warn!(error = %err, "account directory failed during login");
                password::verify_absent_off_thread(self.passwords.clone(), request.password).await;
                return Err(self
                    .reject_login(None, client_ip, "directory_unavailable")
                    .await);
            }
        };

        let password_ok = password::verify_off_thread(
            self.passwords.clone(),
            request.password,
            account.password_hash.clone(),
        )
        .await;
        if !password_ok {
            return Err(self
                .reject_login(Some(account.id), client_ip, "wrong_password")
                .await);
        }
        if !account.is_active {
            return Err(self
                .reject_login(Some(account.id), client_ip, "account_inactive")
                .await);
        }

        let token_id = TokenId::generate();
        let tokens = self.jwt.issue_pair(&account, &token_id)?;
        let record = SessionRecord::new(account.id, token_id.clone(), &tokens.refresh_token);

        let store = self.store.clone();
        let ttl = self.jwt.refresh_token_ttl();
        let persisted = run_detached(async move { store.put_session(&record, ttl).await }).await?;
        if let Err(err) = persisted {
            tracing::error!(error = %err, subject_id = %account.id, "could not persist session; login aborted");
            self.audit
                .notify(
                    AuditEvent::login_failed(Some(account.id), "session_store_unavailable")
                        .with_ip(client_ip),
                )
                .await;
            return Err(AuthError::StoreUnavailable);
        }

        self.touch_last_login(account.id).await;
        self.audit
            .notify(AuditEvent::login_succeeded(account.id).with_ip(client_ip))
            .await;
        tracing::info!(subject_id = %account.id, token_id = %token_id, "session created");

        Ok(AuthResponse {
            account: account.into(),
            tokens,
        })
    }

    async fn touch_last_login(&self, id: Uuid) {
        let touch = tokio::time::timeout(
            self.settings.directory_timeout,
            self.directory.touch_last_login(id),
        )
        .await;

        match touch {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, subject_id = %id, "last login not recorded"),
            Err(_) => tracing::warn!(subject_id = %id, "last login update timed out"),
        }
    }

    async fn reject_refresh(&self, subject_id: Option<Uuid>, reason: &str) -> AuthError {
        tracing::debug!(subject_id = ?subject_id, reason, "refresh rejected");
        self.audit
            .notify(AuditEvent::refresh_failed(subject_id, reason))
            .await;
        AuthError::InvalidToken
    }

    /// Exchange a refresh token for a new pair; each refresh token works at most once
    pub async fn refresh(&self, request: RefreshRequest) -> Result<TokenPair, AuthError> {
        let presented = request.refresh_token;

        let claims = match self.jwt.verify(&presented) {
            Ok(claims) if claims.is_refresh_token() => claims,
            Ok(_) => return Err(self.reject_refresh(None, "wrong_token_kind").await),
            Err(_) => return Err(self.reject_refresh(None, "invalid_token").await),
        };
        let subject_id = claims.subject_id();

        // A store outage here is reported exactly like a missing session
        let stored = match self.store.get_session(subject_id, claims.token_id()).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                return Err(self.reject_refresh(Some(subject_id), "session_not_found").await);
            }
            Err(err) => {
                tracing::warn!(error = %err, subject_id = %subject_id, "session lookup failed during refresh");
                return Err(self.reject_refresh(Some(subject_id), "session_lookup_failed").await);
            }
        };

        if !stored.record.matches(&presented) {
            tracing::warn!(subject_id = %subject_id, token_id = %claims.token_id(), "refresh token does not match its session");
            return Err(self.reject_refresh(Some(subject_id), "token_mismatch").await);
        }

        let account = match self.load_active_account(subject_id).await {
            Some(account) => account,
            None => return Err(self.reject_refresh(Some(subject_id), "account_unavailable").await),
        };

        let new_token_id = TokenId::generate();
        let tokens = self.jwt.issue_pair(&account, &new_token_id)?;
        let new_record = SessionRecord::new(account.id, new_token_id.clone(), &tokens.refresh_token);

        let store = self.store.clone();
        let ttl = self.jwt.refresh_token_ttl();
        let rotation = run_detached(async move {
            match store.consume_session(&stored).await {
                Ok(true) => {}
                Ok(false) => return Rotation::Superseded,
                Err(err) => return Rotation::ConsumeFailed(err),
            }
            match store.put_session(&new_record, ttl).await {
                Ok(()) => Rotation::Rotated,
                Err(err) => Rotation::WriteFailed(err),
            }
        })
        .await?;

        match rotation {
            Rotation::Rotated => {
                tracing::info!(
                    subject_id = %subject_id,
                    old_token_id = %claims.token_id(),
                    token_id = %new_token_id,
                    "session rotated"
                );
                self.audit
                    .notify(AuditEvent::token_refreshed(subject_id))
                    .await;
                Ok(tokens)
            }
            Rotation::Superseded => {
                tracing::warn!(subject_id = %subject_id, token_id = %claims.token_id(), "refresh token already exchanged");
                Err(self.reject_refresh(Some(subject_id), "already_rotated").await)
            }
            Rotation::ConsumeFailed(err) => {
                tracing::warn!(error = %err, subject_id = %subject_id, "could not consume session during refresh");
                Err(self.reject_refresh(Some(subject_id), "session_consume_failed").await)
            }
            Rotation::WriteFailed(err) => {
                tracing::error!(error = %err, subject_id = %subject_id, "old session consumed but new session not persisted");
                self.audit
                    .notify(AuditEvent::refresh_failed(
                        Some(subject_id),
                        "session_store_unavailable",
                    ))
                    .await;
                Err(AuthError::StoreUnavailable)
            }
        }
    }

    async fn load_active_account(&self, id: Uuid) -> Option<Account> {
        match directory::lookup_by_id(self.directory.as_ref(), id, self.settings.directory_timeout)
            .await
        {
            Ok(Some(account)) if account.is_active => Some(account),
            Ok(Some(_)) => {
                tracing::debug!(subject_id = %id, "account inactive");
                None
            }
            Ok(None) => {
                tracing::debug!(subject_id = %id, "account not found");
                None
            }
            Err(err) => {
                tracing::warn!(error = %err, subject_id = %id, "account directory failed");
                None
            }
        }
    }

    /// Logout the pair behind `identity`. Never fails; the receipt reports what happened.
    pub async fn logout(&self, identity: &IdentityContext) -> LogoutReceipt {
        let store = self.store.clone();
        let subject_id = identity.account_id;
        let token_id = identity.token_id.clone();
        let retention = self.settings.revocation_retention;

        let receipt = run_detached(async move {
            let session = match store.delete_session(subject_id, &token_id).await {
                Ok(true) => StepOutcome::Done,
                Ok(false) => StepOutcome::AlreadyAbsent,
                Err(err) => {
                    tracing::warn!(error = %err, subject_id = %subject_id, "session delete failed during logout");
                    StepOutcome::Failed
                }
            };

            let marker = RevocationMarker::new(subject_id, token_id);
            let revocation = match store.revoke(&marker, retention).await {
                Ok(()) => StepOutcome::Done,
                Err(err) => {
                    tracing::error!(error = %err, subject_id = %subject_id, "revocation marker not written during logout");
                    StepOutcome::Failed
                }
            };

            LogoutReceipt {
                session,
                revocation,
            }
        })
        .await
        .unwrap_or_else(|_| LogoutReceipt::failed());

        tracing::info!(
            subject_id = %subject_id,
            token_id = %identity.token_id,
            session = ?receipt.session,
            revocation = ?receipt.revocation,
            "logout processed"
        );
        self.audit
            .notify(AuditEvent::logout(subject_id, receipt.is_complete()))
            .await;

        receipt
    }

    /// Logout every session of the account behind `identity`
    pub async fn logout_all(&self, identity: &IdentityContext) -> LogoutAllReceipt {
        let store = self.store.clone();
        let subject_id = identity.account_id;
        let current = identity.token_id.clone();
        let retention = self.settings.revocation_retention;

        let receipt = run_detached(async move {
            let removed = match store.delete_sessions_for(subject_id).await {
                Ok(ids) => Some(ids),
                Err(err) => {
                    tracing::warn!(error = %err, subject_id = %subject_id, "bulk session delete failed");
                    None
                }
            };
            let sessions_removed = removed.as_ref().map(Vec::len);

            let mut to_revoke = removed.unwrap_or_default();
            if !to_revoke.contains(&current) {
                to_revoke.push(current);
            }

            let mut failed = 0;
            for token_id in &to_revoke {
                let marker = RevocationMarker::new(subject_id, token_id.clone());
                if let Err(err) = store.revoke(&marker, retention).await {
                    tracing::error!(error = %err, subject_id = %subject_id, "revocation marker not written");
                    failed += 1;
                }
            }

            LogoutAllReceipt {
                sessions_removed,
                revoked: to_revoke.len(),
                failed,
            }
        })
        .await
        .unwrap_or(LogoutAllReceipt {
            sessions_removed: None,
            revoked: 0,
            failed: 1,
        });

        tracing::info!(subject_id = %subject_id, sessions_removed = ?receipt.sessions_removed, "logout from all devices processed");
        self.audit
            .notify(AuditEvent::logout_all(subject_id, receipt.is_complete()))
            .await;

        receipt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logout_receipt_completeness() {
        let done = LogoutReceipt {
            session: StepOutcome::Done,
            revocation: StepOutcome::Done,
        };
        let repeat = LogoutReceipt {
            session: StepOutcome::AlreadyAbsent,
            revocation: StepOutcome::Done,
        };
        let no_marker = LogoutReceipt {
            session: StepOutcome::Done,
            revocation: StepOutcome::Failed,
        };

        assert!(done.is_complete());
        assert!(repeat.is_complete());
        assert!(!no_marker.is_complete());
        assert!(!LogoutReceipt::failed().is_complete());
    }

    #[test]
    fn test_logout_receipt_serialization() {
        let receipt = LogoutReceipt {
            session: StepOutcome::AlreadyAbsent,
            revocation: StepOutcome::Done,
        };
        let json = serde_json::to_string(&receipt).unwrap();
        assert_eq!(json, r#"{"session":"already_absent","revocation":"done"}"#);
    }

    #[test]
    fn test_login_request_deserialization() {
        let json = r#"{
            "email": "doc@hospital.test",
            "password": "Sunshine!42"
        }"#;

        let request: LoginRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.email, "doc@hospital.test");
        assert_eq!(request.password, "Sunshine!42");
    }

    #[test]
    fn test_refresh_request_deserialization() {
        let json = r#"{ "refresh_token": "eyJhbGciOiJIUzI1NiJ9..." }"#;
        let request: RefreshRequest = serde_json::from_str(json).unwrap();
        assert!(request.refresh_token.starts_with("eyJ"));
    }

    #[tokio::test]
    async fn test_run_detached_survives_caller_drop() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let caller = tokio::spawn(async move {
            run_detached(async move {
                let _ = started_tx.send(());
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                let _ = done_tx.send(());
            })
            .await
        });

        started_rx.await.unwrap();
        caller.abort();

        assert!(caller.await.unwrap_err().is_cancelled());
        assert!(done_rx.await.is_ok());
    }
}
