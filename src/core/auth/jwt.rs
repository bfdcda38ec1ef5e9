//! JWT token codec
//!
//! Encodes claim sets into HS256-signed tokens and verifies them back. The codec
//! holds no session knowledge; revocation and rotation live in the session layer.
//!
//! Access tokens are short-lived (15 minutes), refresh tokens are long-lived (7 days).
//! Verification fails closed: no leeway, and every failure (malformed, bad signature,
//! wrong issuer, expired) collapses into [`JwtError::Invalid`].

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::auth::token_id::TokenId;
use crate::core::db::models::{Account, Role};

/// Default access token expiration time (15 minutes)
const ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 15;

/// Default refresh token expiration time (7 days)
const REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 7;

/// HS256 keys shorter than the hash output are rejected
const MIN_SECRET_BYTES: usize = 32;

const DEFAULT_ISSUER: &str = "medgate";

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret key for signing tokens
    pub secret: String,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// Token issuer
    pub issuer: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl JwtConfig {
    /// Create a new JWT configuration with default lifetimes
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_token_ttl: Duration::minutes(ACCESS_TOKEN_EXPIRATION_MINUTES),
            refresh_token_ttl: Duration::days(REFRESH_TOKEN_EXPIRATION_DAYS),
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self, JwtError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Create config from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, JwtError> {
        let secret = lookup("JWT_SECRET").ok_or(JwtError::MissingSecret)?;

        let access_minutes = parse_or(
            &lookup,
            "JWT_ACCESS_TTL_MINUTES",
            ACCESS_TOKEN_EXPIRATION_MINUTES,
        )?;
        let refresh_days =
            parse_or(&lookup, "JWT_REFRESH_TTL_DAYS", REFRESH_TOKEN_EXPIRATION_DAYS)?;
        let issuer = lookup("JWT_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string());

        let config = Self {
            secret,
            access_token_ttl: Duration::minutes(access_minutes),
            refresh_token_ttl: Duration::days(refresh_days),
            issuer,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set access token lifetime
    pub fn access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    /// Set refresh token lifetime
    pub fn refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Reject weak secrets and non-positive lifetimes
    pub fn validate(&self) -> Result<(), JwtError> {
        if self.secret.len() < MIN_SECRET_BYTES {
            return Err(JwtError::WeakSecret(MIN_SECRET_BYTES));
        }
        if self.access_token_ttl <= Duration::zero() || self.refresh_token_ttl <= Duration::zero() {
            return Err(JwtError::InvalidTtl);
        }
        if self.refresh_token_ttl < self.access_token_ttl {
            return Err(JwtError::InvalidTtl);
        }
        Ok(())
    }
}

fn parse_or(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: i64,
) -> Result<i64, JwtError> {
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|_| JwtError::InvalidSetting { var, value: raw }),
        None => Ok(default),
    }
}

/// JWT errors
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT_SECRET environment variable not set")]
    MissingSecret,

    #[error("JWT secret must be at least {0} bytes")]
    WeakSecret(usize),

    #[error("Token lifetimes must be positive and refresh must outlive access")]
    InvalidTtl,

    #[error("Invalid value for {var}: {value}")]
    InvalidSetting { var: &'static str, value: String },

    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    #[error("Invalid token")]
    Invalid,
}

/// Token kind enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    #[display("access")]
    Access,
    #[display("refresh")]
    Refresh,
}

/// Claims carried by every token, independent of timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    /// Subject (account ID)
    #[serde(rename = "sub")]
    pub subject_id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(rename = "name")]
    pub display_name: String,
    /// Pair identifier shared by the access and refresh token
    #[serde(rename = "jti")]
    pub token_id: TokenId,
    #[serde(rename = "token_type")]
    pub kind: TokenKind,
}

impl ClaimSet {
    /// Claim set for one half of a pair issued to `account`
    pub fn for_account(account: &Account, token_id: &TokenId, kind: TokenKind) -> Self {
        Self {
            subject_id: account.id,
            email: account.email.clone(),
            role: account.role,
            display_name: account.display_name.clone(),
            token_id: token_id.clone(),
            kind,
        }
    }
}

/// Full JWT payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(flatten)]
    pub set: ClaimSet,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    pub fn is_access_token(&self) -> bool {
        self.set.kind == TokenKind::Access
    }

    pub fn is_refresh_token(&self) -> bool {
        self.set.kind == TokenKind::Refresh
    }

    pub fn subject_id(&self) -> Uuid {
        self.set.subject_id
    }

    pub fn token_id(&self) -> &TokenId {
        &self.set.token_id
    }
}

/// A signed token with its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Expiration (Unix timestamp)
    pub expires_at: i64,
}

/// Token pair (access + refresh)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    /// Access token (short-lived)
    pub access_token: String,
    /// Refresh token (long-lived)
    pub refresh_token: String,
    /// Access token expiration (Unix timestamp)
    pub access_expires_at: i64,
    /// Refresh token expiration (Unix timestamp)
    pub refresh_expires_at: i64,
    /// Token type (always "Bearer")
    pub token_type: String,
}

/// JWT service for token operations
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    /// Create a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        // Expiry is enforced in `verify_at` so the boundary is exclusive and testable
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            config,
            encoding_key,
            decoding_key,
            validation,
        }
    }

    /// Create JWT service from environment variables
    pub fn from_env() -> Result<Self, JwtError> {
        Ok(Self::new(JwtConfig::from_env()?))
    }

    pub fn access_token_ttl(&self) -> Duration {
        self.config.access_token_ttl
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        self.config.refresh_token_ttl
    }

    /// Sign `claims` with an expiry of now + `ttl`
    pub fn issue(&self, claims: &ClaimSet, ttl: Duration) -> Result<IssuedToken, JwtError> {
        self.issue_at(claims, ttl, Utc::now().timestamp())
    }

    /// Sign `claims` as if issued at `issued_at`
    pub fn issue_at(
        &self,
        claims: &ClaimSet,
        ttl: Duration,
        issued_at: i64,
    ) -> Result<IssuedToken, JwtError> {
        let expires_at = issued_at + ttl.num_seconds();
        let claims = Claims {
            set: claims.clone(),
            iat: issued_at,
            exp: expires_at,
            iss: self.config.issuer.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::EncodingError(e.to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Issue an access/refresh pair for `account`, both carrying `token_id`
    pub fn issue_pair(&self, account: &Account, token_id: &TokenId) -> Result<TokenPair, JwtError> {
        let issued_at = Utc::now().timestamp();

        let access = self.issue_at(
            &ClaimSet::for_account(account, token_id, TokenKind::Access),
            self.config.access_token_ttl,
            issued_at,
        )?;
        let refresh = self.issue_at(
            &ClaimSet::for_account(account, token_id, TokenKind::Refresh),
            self.config.refresh_token_ttl,
            issued_at,
        )?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            access_expires_at: access.expires_at,
            refresh_expires_at: refresh.expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    /// Verify a token against the current clock
    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify_at(token, Utc::now().timestamp())
    }

    /// Verify a token as of `now` (Unix timestamp)
    ///
    /// A token is valid strictly before its `exp`; at or after it, it is rejected.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, JwtError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| {
                tracing::debug!(error = %err, "token failed signature or structure checks");
                JwtError::Invalid
            })?;

        let claims = token_data.claims;
        if now >= claims.exp {
            tracing::debug!(token_id = %claims.set.token_id, "token expired");
            return Err(JwtError::Invalid);
        }

        Ok(claims)
    }
}
