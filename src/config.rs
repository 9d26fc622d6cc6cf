//! Configuration handling for the geo API.
//!
//! This module provides configuration management via CLI arguments and environment variables.
//! Both logical databases share one host and credential pair and differ by database name.

use crate::db::DatabaseTarget;
use crate::models::{DEFAULT_QUERY_TIMEOUT_SECS, PoolConfig};
use clap::Parser;
use std::time::Duration;
use url::Url;

pub const DEFAULT_DB_HOST: &str = "localhost";
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub const DEFAULT_HTTP_PORT: u16 = 8000;
pub const DEFAULT_API_PREFIX: &str = "/api";

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 40;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 40)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 10)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value.
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if min > self.max_connections_or_default() {
                return Err(format!(
                    "min_connections ({}) cannot exceed max_connections ({})",
                    min,
                    self.max_connections_or_default()
                ));
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Endpoint settings shared by the General and Secondary databases.
#[derive(Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Sensitive - never log
    pub password: String,
    pub general_database: String,
    pub secondary_database: String,
}

impl std::fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"****")
            .field("general_database", &self.general_database)
            .field("secondary_database", &self.secondary_database)
            .finish()
    }
}

impl DatabaseSettings {
    /// Database name bound to a target.
    pub fn database_name(&self, target: DatabaseTarget) -> &str {
        match target {
            DatabaseTarget::General => &self.general_database,
            DatabaseTarget::Secondary => &self.secondary_database,
        }
    }

    /// Build the PostgreSQL connection URL for a target.
    ///
    /// Credentials are percent-encoded by `Url`, so passwords may contain
    /// reserved characters.
    pub fn connection_string(&self, target: DatabaseTarget) -> Result<String, String> {
        let database = self.database_name(target);
        if database.trim().is_empty() {
            return Err(format!("Database name for the {} target is empty", target));
        }

        let mut url = Url::parse("postgres://localhost").map_err(|e| format!("Invalid URL: {e}"))?;
        url.set_host(Some(&self.host))
            .map_err(|e| format!("Invalid database host '{}': {e}", self.host))?;
        url.set_port(Some(self.port))
            .map_err(|_| "Database URL cannot carry a port".to_string())?;
        url.set_username(&self.user)
            .map_err(|_| "Database URL cannot carry a username".to_string())?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| "Database URL cannot carry a password".to_string())?;
        }
        url.set_path(database);

        Ok(url.to_string())
    }

    /// Pool configuration for a target.
    pub fn pool_config(
        &self,
        target: DatabaseTarget,
        pool_options: &PoolOptions,
    ) -> Result<PoolConfig, String> {
        Ok(PoolConfig::new(target, self.connection_string(target)?).with_options(pool_options.clone()))
    }
}

/// Configuration for the geo API.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "geo-api",
    about = "GeoJSON API over municipal census, street-network, business-registry and public-works databases",
    version,
    author
)]
pub struct Config {
    /// Database host shared by both databases
    #[arg(long, default_value = DEFAULT_DB_HOST, env = "DB_HOST")]
    pub db_host: String,

    /// Database port shared by both databases
    #[arg(long, default_value_t = DEFAULT_DB_PORT, env = "DB_PORT")]
    pub db_port: u16,

    /// General database name (census, streets, business registry, zones, comments)
    #[arg(long, env = "DB_NAME")]
    pub db_name: String,

    /// Secondary database name (public works)
    #[arg(long = "db-name-2", env = "DB_NAME_2")]
    pub db_name_2: String,

    /// Database user shared by both databases
    #[arg(long, env = "DB_USER")]
    pub db_user: String,

    /// Database password shared by both databases
    #[arg(long, default_value = "", env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: String,

    /// Minimum connections kept per pool
    #[arg(long, default_value_t = DEFAULT_MIN_CONNECTIONS, env = "POOL_MIN")]
    pub pool_min: u32,

    /// Maximum connections per pool
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS, env = "POOL_MAX")]
    pub pool_max: u32,

    /// Seconds to wait for a free connection before failing the request
    #[arg(long, default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS, env = "POOL_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: u64,

    /// Seconds an idle connection is kept before being closed
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS, env = "POOL_IDLE_TIMEOUT")]
    pub idle_timeout: u64,

    /// Query timeout in seconds
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS, env = "QUERY_TIMEOUT")]
    pub query_timeout: u64,

    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "HTTP_PORT")]
    pub http_port: u16,

    /// Path prefix all routes are mounted under
    #[arg(long, default_value = DEFAULT_API_PREFIX, env = "API_PREFIX")]
    pub api_prefix: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    /// Bearer tokens accepted on write endpoints.
    /// Can be specified multiple times or as comma-separated values.
    /// When unset, write endpoints are open.
    #[arg(
        long = "auth-token",
        value_name = "TOKEN",
        env = "API_AUTH_TOKENS",
        value_delimiter = ',',
        hide_env_values = true
    )]
    pub auth_tokens: Vec<String>,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            db_host: DEFAULT_DB_HOST.to_string(),
            db_port: DEFAULT_DB_PORT,
            db_name: String::new(),
            db_name_2: String::new(),
            db_user: String::new(),
            db_password: String::new(),
            pool_min: DEFAULT_MIN_CONNECTIONS,
            pool_max: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_SECS,
            query_timeout: DEFAULT_QUERY_TIMEOUT_SECS,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            auth_tokens: Vec::new(),
        }
    }

    /// Pool options applied to both pools.
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: Some(self.pool_max),
            min_connections: Some(self.pool_min),
            idle_timeout_secs: Some(self.idle_timeout),
            acquire_timeout_secs: Some(self.acquire_timeout),
            test_before_acquire: None,
        }
    }

    /// Endpoint settings for both databases.
    pub fn database_settings(&self) -> DatabaseSettings {
        DatabaseSettings {
            host: self.db_host.clone(),
            port: self.db_port,
            user: self.db_user.clone(),
            password: self.db_password.clone(),
            general_database: self.db_name.clone(),
            secondary_database: self.db_name_2.clone(),
        }
    }

    /// Check values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), String> {
        self.pool_options().validate()?;
        if self.query_timeout == 0 {
            return Err("query_timeout must be greater than 0".to_string());
        }
        if !self.api_prefix.starts_with('/') {
            return Err(format!(
                "api_prefix must start with '/', got '{}'",
                self.api_prefix
            ));
        }
        Ok(())
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the query timeout as a Duration.
    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
