//! Process-wide state.
//!
//! Builds the one shared pool manager and its executor from a config, and
//! exposes the operations a request layer needs.

use crate::error::{OperationFailure, ReservoirError};
use crate::models::{ConnectionConfig, HealthReport, NamedParams, PoolSnapshot, QueryOutcome};
use crate::services::{ConnectionPool, Connector, PgConnector, QueryExecutor};

/// Central state for a process using one database.
///
/// Clones share the same pool.
pub struct ReservoirState<C: Connector = PgConnector> {
    pool: ConnectionPool<C>,
    executor: QueryExecutor<C>,
}

impl<C: Connector> Clone for ReservoirState<C> {
    fn clone(&self) -> Self {
        Self { pool: self.pool.clone(), executor: self.executor.clone() }
    }
}

impl ReservoirState<PgConnector> {
    /// Create state backed by PostgreSQL. No connection is made yet.
    pub fn new(config: ConnectionConfig) -> Result<Self, ReservoirError> {
        Self::with_connector(config, PgConnector)
    }
}

impl<C: Connector> ReservoirState<C> {
    /// Create state with a custom connector.
    pub fn with_connector(config: ConnectionConfig, connector: C) -> Result<Self, ReservoirError> {
        config.validate()?;
        tracing::info!(url = %config.display_url(), "Reservoir state initialized");

        let pool = ConnectionPool::new(config, connector);
        let executor = QueryExecutor::new(pool.clone());
        Ok(Self { pool, executor })
    }

    // ========== Accessors ==========

    /// Get the shared pool manager.
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Get the statement executor.
    pub fn executor(&self) -> &QueryExecutor<C> {
        &self.executor
    }

    /// Get a snapshot of the pool manager.
    pub fn status(&self) -> PoolSnapshot {
        self.pool.status()
    }

    // ========== Operations ==========

    /// Check database health.
    pub async fn health(&self) -> HealthReport {
        self.pool.check_health_report().await
    }

    /// Run a statement for a request handler.
    ///
    /// Every error class is downgraded to an [`OperationFailure`]; the
    /// original error is logged and kept in its `detail`.
    pub async fn execute(
        &self,
        sql: &str,
        params: &NamedParams,
    ) -> Result<QueryOutcome, OperationFailure> {
        self.executor.execute(sql, params).await.map_err(|err| {
            tracing::error!(category = err.category(), error = %err, "Operation failed");
            err.to_operation_failure()
        })
    }

    /// Close the shared pool. Further operations fail fast.
    pub async fn shutdown(&self) -> Result<(), ReservoirError> {
        tracing::info!("Shutting down");
        self.pool.close().await
    }
}
