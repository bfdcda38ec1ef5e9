//! Database module for Medgate
//!
//! This module provides database connectivity, models, and the account
//! repository backing the account directory, using PostgreSQL and SQLx.

pub mod models;
pub mod pool;
pub mod repositories;

// Re-export commonly used items
pub use models::*;
pub use pool::{DbConfig, DbError, create_pool, health_check};
pub use repositories::AccountRepository;

// Re-export sqlx types that might be needed
pub use sqlx::PgPool;
