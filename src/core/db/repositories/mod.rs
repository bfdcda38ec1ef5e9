//! Database repositories for Medgate
//!
//! Repositories encapsulate data access logic. The account repository is the
//! PostgreSQL implementation of the account directory contract.

pub mod account;

pub use account::AccountRepository;
