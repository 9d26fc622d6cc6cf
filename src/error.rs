//! Error types for the geo API.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each variant maps to one HTTP status so route handlers can return `DbResult`
//! directly and let the error render itself.

use crate::db::DatabaseTarget;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Pool initialization failed for {target} database: {message}")]
    PoolInit {
        target: DatabaseTarget,
        message: String,
        suggestion: String,
    },

    #[error("The {target} database pool is unavailable: {reason}")]
    PoolUnavailable {
        target: DatabaseTarget,
        reason: String,
    },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Geometry error: {message}")]
    Codec { message: String },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String, suggestion: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a pool initialization error.
    pub fn pool_init(
        target: DatabaseTarget,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::PoolInit {
            target,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a pool unavailable error.
    pub fn pool_unavailable(target: DatabaseTarget, reason: impl Into<String>) -> Self {
        Self::PoolUnavailable {
            target,
            reason: reason.into(),
        }
    }

    /// Create a query error with optional SQL state.
    pub fn query(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a geometry codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Map a failed checkout from the `target` pool.
    pub fn acquire_failed(target: DatabaseTarget, err: sqlx::Error) -> Self {
        let reason = match err {
            sqlx::Error::PoolTimedOut => "timed out waiting for a free connection".to_string(),
            sqlx::Error::PoolClosed => "pool has been drained".to_string(),
            other => other.to_string(),
        };
        Self::pool_unavailable(target, reason)
    }

    /// Create a timeout error for an operation bounded by `limit`.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn unauthorized(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::PoolInit { suggestion, .. } => Some(suggestion),
            Self::Query { suggestion, .. } => Some(suggestion),
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Unauthorized { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolUnavailable { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Whether a read endpoint may answer with less data instead of failing.
    ///
    /// Only statement-level failures degrade; an unavailable pool is always
    /// reported to the client.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Self::Query { .. } | Self::Timeout { .. })
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PoolInit { .. } | Self::PoolUnavailable { .. } | Self::Connection { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Codec { .. } | Self::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Query { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PoolInit { .. } | Self::PoolUnavailable { .. } => "database_unavailable",
            Self::Query { .. } => "query_failed",
            Self::Connection { .. } => "connection_failed",
            Self::Codec { .. } => "invalid_geometry",
            Self::Timeout { .. } => "timeout",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Internal { .. } => "internal_error",
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection settings and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::query(
                    db_err.message(),
                    code,
                    "Check the SQL syntax, referenced objects and constraints",
                )
            }
            sqlx::Error::RowNotFound => DbError::query(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // Checkouts go through `acquire_failed`, which knows the target
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => DbError::connection(
                format!("Connection pool unavailable: {}", err),
                "Retry later or raise the pool size",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::query(
                format!("Type not found: {}", type_name),
                None,
                "Check that the PostGIS extension is installed",
            ),
            sqlx::Error::ColumnNotFound(col) => DbError::query(
                format!("Column not found: {}", col),
                None,
                "Check the selected column names",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
}

/// Render errors as JSON bodies.
///
/// Server-side failures are logged in full but answered with a generic
/// message so SQL text and driver details stay out of responses.
impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!(
                error = %self,
                code = self.code(),
                retryable = self.is_retryable(),
                "Request failed"
            );
            match &self {
                Self::PoolInit { target, .. } | Self::PoolUnavailable { target, .. } => {
                    format!("The {} database is currently unavailable", target)
                }
                Self::Timeout { .. } => "The database did not answer in time".to_string(),
                _ => "An internal error occurred".to_string(),
            }
        } else {
            self.to_string()
        };

        let suggestion = if status.is_server_error() {
            None
        } else {
            self.suggestion()
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message,
                suggestion,
            },
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::pool_unavailable(DatabaseTarget::Secondary, "never initialized");
        assert!(err.to_string().contains("secondary"));
        assert!(err.to_string().contains("never initialized"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::query(
            "duplicate key",
            Some("23505".to_string()),
            "Check constraints",
        );
        assert_eq!(err.suggestion(), Some("Check constraints"));
        assert_eq!(DbError::codec("bad").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", Duration::from_secs(30)).is_retryable());
        assert!(DbError::pool_unavailable(DatabaseTarget::General, "busy").is_retryable());
        assert!(!DbError::invalid_input("bad bbox").is_retryable());
    }

    #[test]
    fn test_only_statement_failures_degrade() {
        assert!(DbError::query("boom", None, "").is_degradable());
        assert!(DbError::timeout("query execution", Duration::from_secs(30)).is_degradable());
        assert!(!DbError::pool_unavailable(DatabaseTarget::General, "x").is_degradable());
        assert!(!DbError::internal("x").is_degradable());
    }

    #[test]
    fn test_pool_errors_map_to_service_unavailable() {
        let err = DbError::pool_unavailable(DatabaseTarget::General, "drained");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let err = DbError::pool_init(DatabaseTarget::Secondary, "refused", "start it");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_client_errors_map_to_bad_request() {
        assert_eq!(
            DbError::codec("not a geometry").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DbError::invalid_input("bad bbox").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_query_maps_to_internal_error() {
        let err = DbError::query("syntax error", Some("42601".to_string()), "check syntax");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "query_failed");
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        assert_eq!(
            DbError::timeout("write operation", Duration::from_secs(30)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_sub_second_timeout_reports_millis() {
        let err = DbError::timeout("read operation", Duration::from_millis(250));
        assert!(matches!(err, DbError::Timeout { elapsed_ms: 250, .. }));
        assert_eq!(err.to_string(), "Timeout: read operation exceeded 250ms");
    }

    #[test]
    fn test_acquire_failures_are_pool_unavailable() {
        for (source, reason) in [
            (sqlx::Error::PoolTimedOut, "timed out waiting for a free connection"),
            (sqlx::Error::PoolClosed, "pool has been drained"),
        ] {
            let err = DbError::acquire_failed(DatabaseTarget::Secondary, source);
            assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(err.code(), "database_unavailable");
            match err {
                DbError::PoolUnavailable { target, reason: got } => {
                    assert_eq!(target, DatabaseTarget::Secondary);
                    assert_eq!(got, reason);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        // Without a target the same failures are still a 503, never a timeout
        let err = DbError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unauthorized_body() {
        let response = DbError::unauthorized("Invalid Bearer token", "Use a configured token")
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "unauthorized");
        assert_eq!(body["error"]["message"], "Unauthorized: Invalid Bearer token");
        assert_eq!(body["error"]["suggestion"], "Use a configured token");
    }

    #[test]
    fn test_into_response_keeps_status() {
        let response = DbError::invalid_input("bad").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = DbError::query("relation missing", None, "x").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
