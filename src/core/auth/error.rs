//! Authentication error types
//!
//! Every failure inside the subsystem is recovered into one of these kinds before it
//! reaches a caller. Infrastructure detail (store outages, directory timeouts,
//! serialization problems) is logged where it happens and never carried here.

use crate::core::auth::jwt::JwtError;

/// Authentication service error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown account, wrong password or inactive account (never distinguished)
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Malformed, tampered, expired or wrong-kind token, or an unhonorable refresh token
    #[error("Invalid token")]
    InvalidToken,

    /// Access token whose pair identifier has been revoked.
    /// Displays exactly like [`AuthError::InvalidToken`].
    #[error("Invalid token")]
    RevokedToken,

    /// Session store could not persist a session
    #[error("Session store unavailable")]
    StoreUnavailable,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AuthError {
    /// Whether this error is an authentication rejection (as opposed to an outage)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials | AuthError::InvalidToken | AuthError::RevokedToken
        )
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Invalid => AuthError::InvalidToken,
            _ => AuthError::InternalError(err.to_string()),
        }
    }
}
