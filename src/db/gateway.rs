//! Routing of statements to the General and Secondary databases.

use crate::config::{DatabaseSettings, PoolOptions};
use crate::db::executor::QueryExecutor;
use crate::db::pool::{ConnectionPool, PoolStats};
use crate::db::DatabaseTarget;
use crate::error::DbResult;
use crate::models::{QueryParams, Row, WriteOutcome};
use tracing::{error, info};

/// Owner of both connection pools and the executor.
///
/// Shared by `Arc` through the HTTP application state; there is no global
/// pool. Every call names the database it is meant for.
#[derive(Debug, Clone)]
pub struct DatabaseGateway {
    general: ConnectionPool,
    secondary: ConnectionPool,
    executor: QueryExecutor,
}

impl DatabaseGateway {
    /// Connect both pools concurrently.
    ///
    /// A pool that fails to connect is kept in the unavailable state so the
    /// other database keeps serving.
    pub async fn initialize(
        settings: &DatabaseSettings,
        pool_options: &PoolOptions,
        executor: QueryExecutor,
    ) -> Self {
        let (general, secondary) = tokio::join!(
            initialize_pool(settings, pool_options, DatabaseTarget::General),
            initialize_pool(settings, pool_options, DatabaseTarget::Secondary),
        );

        let gateway = Self::new(general, secondary, executor);
        info!(
            general = gateway.general.is_available(),
            secondary = gateway.secondary.is_available(),
            "Database gateway ready"
        );
        gateway
    }

    /// Assemble a gateway from already built pools.
    pub fn new(general: ConnectionPool, secondary: ConnectionPool, executor: QueryExecutor) -> Self {
        Self {
            general,
            secondary,
            executor,
        }
    }

    pub fn pool(&self, target: DatabaseTarget) -> &ConnectionPool {
        match target {
            DatabaseTarget::General => &self.general,
            DatabaseTarget::Secondary => &self.secondary,
        }
    }

    pub async fn execute_read(
        &self,
        target: DatabaseTarget,
        sql: &str,
        params: &QueryParams,
    ) -> DbResult<Vec<Row>> {
        self.executor
            .execute_read(self.pool(target), sql, params)
            .await
    }

    pub async fn execute_read_one(
        &self,
        target: DatabaseTarget,
        sql: &str,
        params: &QueryParams,
    ) -> DbResult<Option<Row>> {
        self.executor
            .execute_read_one(self.pool(target), sql, params)
            .await
    }

    pub async fn execute_write(
        &self,
        target: DatabaseTarget,
        sql: &str,
        params: &QueryParams,
    ) -> DbResult<WriteOutcome> {
        self.executor
            .execute_write(self.pool(target), sql, params)
            .await
    }

    /// Stats for both pools, General first.
    pub fn stats(&self) -> Vec<PoolStats> {
        DatabaseTarget::ALL
            .iter()
            .map(|target| self.pool(*target).stats())
            .collect()
    }

    /// Whether both pools can serve requests.
    pub fn is_available(&self) -> bool {
        self.general.is_available() && self.secondary.is_available()
    }

    /// Close both pools.
    pub async fn drain(&self) {
        tokio::join!(self.general.drain(), self.secondary.drain());
        info!("All connection pools drained");
    }
}

async fn initialize_pool(
    settings: &DatabaseSettings,
    pool_options: &PoolOptions,
    target: DatabaseTarget,
) -> ConnectionPool {
    match settings.pool_config(target, pool_options) {
        Ok(config) => ConnectionPool::initialize(config).await,
        Err(reason) => {
            error!(target = %target, error = %reason, "Invalid database settings");
            ConnectionPool::unavailable(target, reason)
        }
    }
}
