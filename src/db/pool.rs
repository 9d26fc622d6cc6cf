//! Connection pool management.
//!
//! One `ConnectionPool` exists per logical database. Connections handed out by
//! a pool are tagged with its `DatabaseTarget` and always go back to the pool
//! that produced them.

use crate::db::DatabaseTarget;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, PoolConfig};
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::{
    PgPool, Postgres, Sqlite, SqlitePool, postgres::PgPoolOptions, sqlite::SqliteConnectOptions,
    sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::SQLite(pool) => pool.is_closed(),
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    fn size(&self) -> u32 {
        match self {
            DbPool::Postgres(pool) => pool.size(),
            DbPool::SQLite(pool) => pool.size(),
        }
    }

    fn num_idle(&self) -> usize {
        match self {
            DbPool::Postgres(pool) => pool.num_idle(),
            DbPool::SQLite(pool) => pool.num_idle(),
        }
    }

    async fn acquire(&self) -> Result<DbConnection, sqlx::Error> {
        match self {
            DbPool::Postgres(pool) => pool.acquire().await.map(DbConnection::Postgres),
            DbPool::SQLite(pool) => pool.acquire().await.map(DbConnection::SQLite),
        }
    }
}

/// A live session checked out of a `DbPool`.
#[derive(Debug)]
pub enum DbConnection {
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl DbConnection {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Lifetime acquire/release counters for one pool.
#[derive(Debug, Default)]
struct PoolCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

#[derive(Debug)]
enum PoolState {
    Ready {
        pool: DbPool,
        server_version: Option<String>,
    },
    Unavailable {
        reason: String,
    },
}

/// Snapshot of a pool's state, served by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub target: DatabaseTarget,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_type: Option<DatabaseType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Open connections, idle or in use
    pub size: u32,
    pub idle: usize,
    pub acquired: u64,
    pub released: u64,
}

impl PoolStats {
    /// Connections currently checked out by callers.
    pub fn in_use(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Bounded pool of connections to one logical database.
///
/// Cloning is cheap and clones share the underlying pool and counters.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    target: DatabaseTarget,
    state: Arc<PoolState>,
    counters: Arc<PoolCounters>,
}

impl ConnectionPool {
    /// Connect a pool, falling back to the unavailable state on failure.
    ///
    /// The failure is logged; requests routed to this pool then fail with
    /// `PoolUnavailable` while the other pool keeps serving.
    pub async fn initialize(config: PoolConfig) -> Self {
        let target = config.target;
        match Self::try_initialize(config).await {
            Ok(pool) => pool,
            Err(e) => {
                error!(
                    target = %target,
                    error = %e,
                    suggestion = e.suggestion().unwrap_or_default(),
                    "Database pool initialization failed, continuing without it"
                );
                Self::unavailable(target, e.to_string())
            }
        }
    }

    /// Connect a pool, returning the `PoolInit` error on failure.
    pub async fn try_initialize(config: PoolConfig) -> DbResult<Self> {
        let target = config.target;
        let db_type = config.db_type().ok_or_else(|| {
            DbError::pool_init(
                target,
                format!(
                    "Unsupported connection string: {}",
                    config.masked_connection_string()
                ),
                "Use a postgres:// or sqlite: URL",
            )
        })?;

        info!(
            target = %target,
            db_type = %db_type,
            url = %config.masked_connection_string(),
            "Connecting to database"
        );

        let pool = create_pool(&config, db_type).await?;
        let server_version = get_server_version(&pool).await;

        info!(
            target = %target,
            server_version = ?server_version,
            "Connected successfully"
        );

        Ok(Self {
            target,
            state: Arc::new(PoolState::Ready {
                pool,
                server_version,
            }),
            counters: Arc::default(),
        })
    }

    /// Build a pool that rejects every acquire.
    pub fn unavailable(target: DatabaseTarget, reason: impl Into<String>) -> Self {
        Self {
            target,
            state: Arc::new(PoolState::Unavailable {
                reason: reason.into(),
            }),
            counters: Arc::default(),
        }
    }

    pub fn target(&self) -> DatabaseTarget {
        self.target
    }

    /// Whether `acquire` can currently succeed, ignoring capacity.
    pub fn is_available(&self) -> bool {
        match self.state.as_ref() {
            PoolState::Ready { pool, .. } => !pool.is_closed(),
            PoolState::Unavailable { .. } => false,
        }
    }

    /// Check out a connection, waiting up to the acquire timeout.
    ///
    /// Never retries. Unavailable, drained and exhausted pools all fail with
    /// `PoolUnavailable`.
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        let pool = match self.state.as_ref() {
            PoolState::Ready { pool, .. } => pool,
            PoolState::Unavailable { reason } => {
                return Err(DbError::pool_unavailable(self.target, reason.clone()));
            }
        };

        if pool.is_closed() {
            return Err(DbError::pool_unavailable(self.target, "pool has been drained"));
        }

        let connection = pool
            .acquire()
            .await
            .map_err(|e| DbError::acquire_failed(self.target, e))?;

        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        debug!(target = %self.target, "Connection acquired");

        Ok(PooledConnection {
            target: self.target,
            connection: Some(connection),
            counters: Arc::clone(&self.counters),
        })
    }

    /// Return a connection.
    ///
    /// A connection always goes back to the pool it came from; handing one to
    /// the wrong pool is logged and otherwise has no effect on this pool.
    pub fn release(&self, connection: PooledConnection) {
        if connection.target != self.target {
            warn!(
                pool = %self.target,
                origin = %connection.target,
                "Connection released through the wrong pool, returning it to its origin"
            );
        }
        connection.release();
    }

    /// Close every connection. Later acquires fail. Idempotent.
    pub async fn drain(&self) {
        if let PoolState::Ready { pool, .. } = self.state.as_ref() {
            if !pool.is_closed() {
                info!(target = %self.target, "Draining connection pool");
                pool.close().await;
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let acquired = self.counters.acquired.load(Ordering::SeqCst);
        let released = self.counters.released.load(Ordering::SeqCst);
        match self.state.as_ref() {
            PoolState::Ready {
                pool,
                server_version,
            } => PoolStats {
                target: self.target,
                available: !pool.is_closed(),
                database_type: Some(pool.db_type()),
                server_version: server_version.clone(),
                reason: pool.is_closed().then(|| "pool has been drained".to_string()),
                size: pool.size(),
                idle: pool.num_idle(),
                acquired,
                released,
            },
            PoolState::Unavailable { reason } => PoolStats {
                target: self.target,
                available: false,
                database_type: None,
                server_version: None,
                reason: Some(reason.clone()),
                size: 0,
                idle: 0,
                acquired,
                released,
            },
        }
    }
}

/// A connection checked out of a `ConnectionPool`.
///
/// Returned to its origin pool exactly once: by `release()` or, if the owner
/// is dropped early (error, panic, cancelled request), by `Drop`.
#[derive(Debug)]
pub struct PooledConnection {
    target: DatabaseTarget,
    connection: Option<DbConnection>,
    counters: Arc<PoolCounters>,
}

impl PooledConnection {
    /// Target of the pool this connection came from.
    pub fn target(&self) -> DatabaseTarget {
        self.target
    }

    /// Borrow the live session.
    pub(crate) fn connection_mut(&mut self) -> DbResult<&mut DbConnection> {
        self.connection
            .as_mut()
            .ok_or_else(|| DbError::internal("Connection used after release"))
    }

    /// Return the connection to its origin pool.
    pub fn release(mut self) {
        self.return_to_origin();
    }

    fn return_to_origin(&mut self) -> bool {
        // Dropping the sqlx handle hands the session back to its own pool
        match self.connection.take() {
            Some(connection) => {
                drop(connection);
                self.counters.released.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.return_to_origin() {
            debug!(target = %self.target, "Connection released via Drop");
        }
    }
}

/// Create the driver pool for a configuration.
async fn create_pool(config: &PoolConfig, db_type: DatabaseType) -> DbResult<DbPool> {
    let pool_opts = &config.pool_options;
    let acquire_timeout = Duration::from_secs(pool_opts.acquire_timeout_or_default());
    let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));

    match db_type {
        DatabaseType::PostgreSQL => {
            let pool = PgPoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default())
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect(&config.connection_string)
                .await
                .map_err(|e| {
                    DbError::pool_init(
                        config.target,
                        format!("Failed to connect: {}", e),
                        connection_suggestion(db_type, &e),
                    )
                })?;
            Ok(DbPool::Postgres(pool))
        }
        DatabaseType::SQLite => {
            let options = SqliteConnectOptions::from_str(&config.connection_string).map_err(
                |e| {
                    DbError::pool_init(
                        config.target,
                        format!("Invalid SQLite connection string: {}", e),
                        "Check the connection URL format: sqlite:path/to/db.sqlite",
                    )
                },
            )?;

            let pool = SqlitePoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default())
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect_with(options)
                .await
                .map_err(|e| {
                    DbError::pool_init(
                        config.target,
                        format!("Failed to connect: {}", e),
                        connection_suggestion(db_type, &e),
                    )
                })?;
            Ok(DbPool::SQLite(pool))
        }
    }
}

/// Get the server version from the connected database.
async fn get_server_version(pool: &DbPool) -> Option<String> {
    let result = match pool {
        DbPool::Postgres(pool) => {
            sqlx::query_scalar::<_, String>("SELECT version()")
                .fetch_one(pool)
                .await
        }
        DbPool::SQLite(pool) => {
            sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                .fetch_one(pool)
                .await
        }
    };

    match result {
        Ok(version) => {
            debug!(version = %version, "Got server version");
            Some(version)
        }
        Err(e) => {
            warn!(error = %e, "Failed to get server version");
            None
        }
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify DB_USER and DB_PASSWORD".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that DB_NAME and DB_NAME_2 name existing databases".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL => "Verify DB_HOST and DB_PORT".to_string(),
        DatabaseType::SQLite => {
            "Verify the file path exists and is accessible: sqlite:path/to/db.sqlite".to_string()
        }
    }
}
