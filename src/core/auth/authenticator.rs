//! Request authenticator
//!
//! Gate in front of every protected operation. Steps, each a possible rejection:
//!
//! 1. extract the bearer token from the `Authorization` header
//! 2. verify signature and expiry
//! 3. require an access token
//! 4. check the revocation namespace for the pair id
//! 5. load the account and require it to be active
//!
//! Callers only ever see [`AuthError::InvalidToken`]; the failing step is logged
//! and reported to the audit sink. The happy path performs no writes.

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::core::auth::audit::{AuditEvent, AuditNotifier};
use crate::core::auth::directory::{self, AccountDirectory};
use crate::core::auth::error::AuthError;
use crate::core::auth::jwt::JwtService;
use crate::core::auth::token_id::TokenId;
use crate::core::config::{RevocationCheckMode, SessionSettings};
use crate::core::db::models::{Account, IdentitySummary, Role};
use crate::core::store::SessionStore;

const BEARER_PREFIX: &str = "Bearer ";

/// Identity of an authenticated caller, attached to the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityContext {
    pub account_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
    /// Pair id of the access token that authenticated this request
    pub token_id: TokenId,
}

impl IdentityContext {
    pub fn new(account: &Account, token_id: TokenId) -> Self {
        Self {
            account_id: account.id,
            email: account.email.clone(),
            display_name: account.display_name.clone(),
            role: account.role,
            is_active: account.is_active,
            token_id,
        }
    }

    pub fn summary(&self) -> IdentitySummary {
        IdentitySummary {
            id: self.account_id,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
        }
    }

    /// Whether the caller holds one of `roles`
    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }
}

/// Result of validating an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<IdentitySummary>,
}

impl ValidationResult {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            account: None,
        }
    }
}

/// Pipeline step at which a request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RejectionStep {
    #[display("missing_bearer_token")]
    MissingBearer,
    #[display("invalid_token")]
    InvalidToken,
    #[display("wrong_token_kind")]
    WrongKind,
    #[display("token_revoked")]
    Revoked,
    #[display("revocation_check_unavailable")]
    RevocationUnavailable,
    #[display("account_not_found")]
    AccountNotFound,
    #[display("account_inactive")]
    AccountInactive,
    #[display("directory_unavailable")]
    DirectoryUnavailable,
}

impl RejectionStep {
    fn into_error(self) -> AuthError {
        match self {
            RejectionStep::Revoked => AuthError::RevokedToken,
            _ => AuthError::InvalidToken,
        }
    }
}

/// Extract the token from a `Bearer <token>` header value
pub fn extract_bearer_token(header: Option<&str>) -> Option<&str> {
    let token = header?.strip_prefix(BEARER_PREFIX)?.trim();
    if token.is_empty() { None } else { Some(token) }
}

/// Per-request authentication
#[derive(Clone)]
pub struct RequestAuthenticator {
    jwt: JwtService,
    store: SessionStore,
    directory: Arc<dyn AccountDirectory>,
    audit: AuditNotifier,
    settings: SessionSettings,
}

impl RequestAuthenticator {
    pub fn new(
        jwt: JwtService,
        store: SessionStore,
        directory: Arc<dyn AccountDirectory>,
        audit: AuditNotifier,
        settings: SessionSettings,
    ) -> Self {
        Self {
            jwt,
            store,
            directory,
            audit,
            settings,
        }
    }

    /// Authenticate a request from its raw `Authorization` header
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        client_ip: Option<IpAddr>,
    ) -> Result<IdentityContext, AuthError> {
        let token = match extract_bearer_token(authorization) {
            Some(token) => token,
            None => {
                return Err(self
                    .reject(RejectionStep::MissingBearer, None, client_ip)
                    .await);
            }
        };

        match self.resolve(token).await {
            Ok(identity) => Ok(identity),
            Err((step, subject_id)) => Err(self.reject(step, subject_id, client_ip).await),
        }
    }

    /// Check an access token without the surrounding request
    pub async fn validate(&self, token: &str) -> ValidationResult {
        match self.resolve(token).await {
            Ok(identity) => ValidationResult {
                valid: true,
                account: Some(identity.summary()),
            },
            Err((step, subject_id)) => {
                tracing::debug!(step = %step, subject_id = ?subject_id, "token validation failed");
                ValidationResult::invalid()
            }
        }
    }

    async fn reject(
        &self,
        step: RejectionStep,
        subject_id: Option<Uuid>,
        client_ip: Option<IpAddr>,
    ) -> AuthError {
        tracing::debug!(step = %step, subject_id = ?subject_id, "request rejected");
        self.audit
            .notify(AuditEvent::unauthorized(subject_id, &step.to_string()).with_ip(client_ip))
            .await;
        step.into_error()
    }

    async fn resolve(&self, token: &str) -> Result<IdentityContext, (RejectionStep, Option<Uuid>)> {
        let claims = self
            .jwt
            .verify(token)
            .map_err(|_| (RejectionStep::InvalidToken, None))?;
        let subject_id = claims.subject_id();

        if !claims.is_access_token() {
            return Err((RejectionStep::WrongKind, Some(subject_id)));
        }

        match self.store.is_revoked(claims.token_id()).await {
            Ok(false) => {}
            Ok(true) => return Err((RejectionStep::Revoked, Some(subject_id))),
            Err(err) => match self.settings.revocation_check_mode {
                RevocationCheckMode::FailOpen => {
                    tracing::warn!(
                        error = %err,
                        subject_id = %subject_id,
                        "revocation check unavailable; continuing without it"
                    );
                }
                RevocationCheckMode::FailClosed => {
                    tracing::warn!(error = %err, subject_id = %subject_id, "revocation check unavailable; rejecting");
                    return Err((RejectionStep::RevocationUnavailable, Some(subject_id)));
                }
            },
        }

        let account = match directory::lookup_by_id(
            self.directory.as_ref(),
            subject_id,
            self.settings.directory_timeout,
        )
        .await
        {
            Ok(Some(account)) => account,
            Ok(None) => return Err((RejectionStep::AccountNotFound, Some(subject_id))),
            Err(err) => {
                tracing::warn!(error = %err, subject_id = %subject_id, "account directory failed during authentication");
                return Err((RejectionStep::DirectoryUnavailable, Some(subject_id)));
            }
        };

        if !account.is_active {
            return Err((RejectionStep::AccountInactive, Some(subject_id)));
        }

        Ok(IdentityContext::new(&account, claims.token_id().clone()))
    }
}
