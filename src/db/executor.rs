//! Query execution engine.
//!
//! Every operation checks a connection out of the given pool, runs one
//! statement bounded by the query timeout, and hands the connection back
//! exactly once whatever the outcome.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `postgres`: PostgreSQL/PostGIS reads and transactional writes
//! - `sqlite`: SQLite reads and transactional writes
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use crate::db::params::{PreparedStatement, prepare_statement};
use crate::db::pool::{ConnectionPool, DbConnection, PooledConnection};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, QueryParam, QueryParams, Row, WriteOutcome};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use sqlx::{Database, Transaction};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Query executor that handles database query execution.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    default_timeout: Duration,
}

impl QueryExecutor {
    /// Create a new query executor with default settings.
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Create a query executor with a custom statement timeout.
    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run a query and return every row.
    pub async fn execute_read(
        &self,
        pool: &ConnectionPool,
        sql: &str,
        params: &QueryParams,
    ) -> DbResult<Vec<Row>> {
        self.read(pool, sql, params, None).await
    }

    /// Run a query and return its first row, or `None` when nothing matches.
    pub async fn execute_read_one(
        &self,
        pool: &ConnectionPool,
        sql: &str,
        params: &QueryParams,
    ) -> DbResult<Option<Row>> {
        let rows = self.read(pool, sql, params, Some(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Run a data-modifying statement inside a transaction.
    ///
    /// Returns the first column of the first row when the statement produces
    /// rows (`RETURNING`), otherwise the number of affected rows. On any
    /// failure the transaction is rolled back and the error returned.
    pub async fn execute_write(
        &self,
        pool: &ConnectionPool,
        sql: &str,
        params: &QueryParams,
    ) -> DbResult<WriteOutcome> {
        let start = Instant::now();
        let mut conn = pool.acquire().await?;
        let result = self.write_on(&mut conn, sql, params).await;
        pool.release(conn);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => debug!(
                target = %pool.target(),
                outcome = ?outcome,
                elapsed_ms,
                "Write committed"
            ),
            Err(e) => warn!(
                target = %pool.target(),
                error = %e,
                elapsed_ms,
                "Write rolled back"
            ),
        }
        result
    }

    async fn read(
        &self,
        pool: &ConnectionPool,
        sql: &str,
        params: &QueryParams,
        limit: Option<usize>,
    ) -> DbResult<Vec<Row>> {
        let start = Instant::now();
        let mut conn = pool.acquire().await?;
        let result = self.read_on(&mut conn, sql, params, limit).await;
        pool.release(conn);

        if let Ok(rows) = &result {
            debug!(
                target = %pool.target(),
                rows = rows.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Query completed"
            );
        }
        result
    }

    async fn read_on(
        &self,
        conn: &mut PooledConnection,
        sql: &str,
        params: &QueryParams,
        limit: Option<usize>,
    ) -> DbResult<Vec<Row>> {
        let connection = conn.connection_mut()?;
        let stmt = prepare_statement(sql, params, connection.db_type())?;

        debug!(
            sql = %stmt.sql,
            params = ?param_types(&stmt),
            timeout_ms = self.default_timeout.as_millis() as u64,
            "Executing query"
        );

        match connection {
            DbConnection::Postgres(c) => {
                postgres::fetch_rows(c, &stmt, limit, self.default_timeout).await
            }
            DbConnection::SQLite(c) => {
                sqlite::fetch_rows(c, &stmt, limit, self.default_timeout).await
            }
        }
    }

    async fn write_on(
        &self,
        conn: &mut PooledConnection,
        sql: &str,
        params: &QueryParams,
    ) -> DbResult<WriteOutcome> {
        let connection = conn.connection_mut()?;
        let stmt = prepare_statement(sql, params, connection.db_type())?;

        debug!(
            sql = %stmt.sql,
            params = ?param_types(&stmt),
            timeout_ms = self.default_timeout.as_millis() as u64,
            "Executing write operation"
        );

        match connection {
            DbConnection::Postgres(c) => {
                postgres::execute_write(c, &stmt, self.default_timeout).await
            }
            DbConnection::SQLite(c) => sqlite::execute_write(c, &stmt, self.default_timeout).await,
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Common Helper Functions
// =============================================================================

async fn collect_rows<R: RowToJson>(
    mut stream: BoxStream<'_, Result<R, sqlx::Error>>,
    limit: Option<usize>,
) -> DbResult<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await? {
        rows.push(row.to_json_row());
        if limit.is_some_and(|l| rows.len() >= l) {
            break;
        }
    }
    Ok(rows)
}

fn first_column<R: RowToJson>(row: &R) -> serde_json::Value {
    row.to_json_row()
        .into_map()
        .into_iter()
        .next()
        .map(|(_, v)| v)
        .unwrap_or(serde_json::Value::Null)
}

/// Commit a successful write, roll back a failed one.
async fn finish<DB: Database>(
    tx: Transaction<'_, DB>,
    outcome: DbResult<WriteOutcome>,
) -> DbResult<WriteOutcome> {
    match outcome {
        Ok(outcome) => {
            tx.commit().await?;
            Ok(outcome)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

fn param_types(stmt: &PreparedStatement) -> Vec<&'static str> {
    stmt.args.iter().map(QueryParam::type_name).collect()
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout)
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::pool::PoolConnection;
    use sqlx::{Connection, Either, Executor, Postgres};

    pub async fn fetch_rows(
        conn: &mut PoolConnection<Postgres>,
        stmt: &PreparedStatement,
        limit: Option<usize>,
        query_timeout: Duration,
    ) -> DbResult<Vec<Row>> {
        // When there are no args, use raw SQL to avoid prepared statement issues
        let stream = if stmt.args.is_empty() {
            (&mut **conn).fetch(stmt.sql.as_str())
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.args {
                query = bind_postgres_param(query, param);
            }
            query.fetch(&mut **conn)
        };

        match timeout(query_timeout, collect_rows(stream, limit)).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute_write(
        conn: &mut PoolConnection<Postgres>,
        stmt: &PreparedStatement,
        query_timeout: Duration,
    ) -> DbResult<WriteOutcome> {
        let mut tx = (&mut **conn).begin().await?;

        let outcome = timeout(query_timeout, async {
            let mut stream = if stmt.args.is_empty() {
                (&mut *tx).fetch_many(stmt.sql.as_str())
            } else {
                let mut query = sqlx::query(&stmt.sql);
                for param in &stmt.args {
                    query = bind_postgres_param(query, param);
                }
                (&mut *tx).fetch_many(query)
            };

            let mut returned = None;
            let mut rows_affected = 0;
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(result) => rows_affected += result.rows_affected(),
                    Either::Right(row) => {
                        if returned.is_none() {
                            returned = Some(first_column(&row));
                        }
                    }
                }
            }
            Ok::<_, DbError>(match returned {
                Some(value) => WriteOutcome::Returned(value),
                None => WriteOutcome::RowsAffected(rows_affected),
            })
        })
        .await
        .unwrap_or_else(|_| Err(timeout_error("write operation", query_timeout)));

        finish(tx, outcome).await
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::pool::PoolConnection;
    use sqlx::{Connection, Either, Executor, Sqlite};

    pub async fn fetch_rows(
        conn: &mut PoolConnection<Sqlite>,
        stmt: &PreparedStatement,
        limit: Option<usize>,
        query_timeout: Duration,
    ) -> DbResult<Vec<Row>> {
        let stream = if stmt.args.is_empty() {
            (&mut **conn).fetch(stmt.sql.as_str())
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.args {
                query = bind_sqlite_param(query, param);
            }
            query.fetch(&mut **conn)
        };

        match timeout(query_timeout, collect_rows(stream, limit)).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }

    pub async fn execute_write(
        conn: &mut PoolConnection<Sqlite>,
        stmt: &PreparedStatement,
        query_timeout: Duration,
    ) -> DbResult<WriteOutcome> {
        let mut tx = (&mut **conn).begin().await?;

        let outcome = timeout(query_timeout, async {
            let mut stream = if stmt.args.is_empty() {
                (&mut *tx).fetch_many(stmt.sql.as_str())
            } else {
                let mut query = sqlx::query(&stmt.sql);
                for param in &stmt.args {
                    query = bind_sqlite_param(query, param);
                }
                (&mut *tx).fetch_many(query)
            };

            let mut returned = None;
            let mut rows_affected = 0;
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(result) => rows_affected += result.rows_affected(),
                    Either::Right(row) => {
                        if returned.is_none() {
                            returned = Some(first_column(&row));
                        }
                    }
                }
            }
            Ok::<_, DbError>(match returned {
                Some(value) => WriteOutcome::Returned(value),
                None => WriteOutcome::RowsAffected(rows_affected),
            })
        })
        .await
        .unwrap_or_else(|_| Err(timeout_error("write operation", query_timeout)));

        finish(tx, outcome).await
    }
}
