//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management per logical database
//! - Named parameter binding
//! - Query execution with guaranteed connection release
//! - Type mappings from driver rows to JSON rows
//! - The gateway that routes statements to General or Secondary

pub mod executor;
pub mod gateway;
pub mod params;
pub mod pool;
pub mod target;
pub mod types;

pub use executor::QueryExecutor;
pub use gateway::DatabaseGateway;
pub use pool::{ConnectionPool, DbConnection, DbPool, PoolStats, PooledConnection};
pub use target::DatabaseTarget;
