//! Core authentication and session lifecycle

pub mod auth;
pub mod config;
pub mod db;
pub mod store;
