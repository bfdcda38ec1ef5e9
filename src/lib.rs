//! Medgate - Authentication and Session Gateway
//!
//! Issues short-lived access tokens and single-use refresh tokens for hospital
//! platform accounts, revokes them on logout and authenticates every protected
//! request, built on Axum with a TTL key-value session store.

pub mod core;
