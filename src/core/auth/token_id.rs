//! Token pair identifiers
//!
//! Every issued access/refresh pair shares one identifier (the JWT `jti` claim).
//! It keys both the refresh session and the revocation marker, so it is only ever
//! compared for equality and never parsed.

use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};

/// Number of random bytes behind each identifier (hex encoded to 64 characters)
const TOKEN_ID_BYTES: usize = 32;

/// Identifier shared by an access token and the refresh token issued with it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    /// Mint a fresh identifier from the operating system CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TokenId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
