//! Data models for the geo API.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod row;

// Re-export commonly used types
pub use connection::{DatabaseType, PoolConfig};
pub use query::{DEFAULT_QUERY_TIMEOUT_SECS, QueryParam, QueryParams, WriteOutcome};
pub use row::Row;
