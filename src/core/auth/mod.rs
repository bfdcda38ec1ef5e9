//! Authentication module for Medgate
//!
//! This module provides the session-token lifecycle:
//! - JWT access/refresh token issuance and verification
//! - Login, single-use refresh rotation and logout with revocation
//! - Per-request authentication of bearer tokens
//! - REST API endpoints for auth operations

pub mod api;
pub mod audit;
pub mod authenticator;
pub mod directory;
pub mod error;
pub mod jwt;
pub mod password;
pub mod session;
pub mod token_id;

#[cfg(test)]
mod testutil;

pub use api::{AuthApiState, Authenticated, auth_api_router};
pub use audit::{AuditEvent, AuditNotifier, AuditSink, TracingAuditSink};
pub use authenticator::{IdentityContext, RequestAuthenticator, ValidationResult};
pub use directory::{AccountDirectory, DirectoryError, InMemoryAccountDirectory};
pub use error::AuthError;
pub use jwt::{Claims, JwtConfig, JwtError, JwtService, TokenKind, TokenPair};
pub use password::{BcryptPasswordVerifier, PasswordVerifier};
pub use session::{
    AuthResponse, LoginRequest, LogoutAllReceipt, LogoutReceipt, RefreshRequest, SessionManager,
    StepOutcome,
};
pub use token_id::TokenId;
