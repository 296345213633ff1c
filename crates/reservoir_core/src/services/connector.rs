//! Seams between the pool manager and a concrete database driver.
//!
//! A [`Connector`] is the connect primitive: given the immutable config it
//! produces a [`PoolHandle`], a live pool that multiplexes statements.

use crate::error::ReservoirError;
use crate::models::{ConnectionConfig, ParamValue, PoolStatus, RowMap};

use async_trait::async_trait;

/// An established connection pool to the database.
#[async_trait]
pub trait PoolHandle: Send + Sync + 'static {
    /// Cheap liveness flag. Must not perform I/O.
    fn is_connected(&self) -> bool;

    /// Run a trivial statement to prove the handle works.
    async fn ping(&self) -> Result<(), ReservoirError>;

    /// Run a statement that returns rows. Placeholders are positional (`$1..$n`).
    async fn query(&self, sql: &str, params: &[ParamValue]) -> Result<Vec<RowMap>, ReservoirError>;

    /// Run a statement and return the affected-row count.
    async fn execute(&self, sql: &str, params: &[ParamValue]) -> Result<u64, ReservoirError>;

    /// Underlying pool status, if the driver reports one.
    fn status(&self) -> Option<PoolStatus> {
        None
    }

    /// Release every connection held by this handle.
    async fn close(&self) -> Result<(), ReservoirError>;
}

/// Creates pool handles from a configuration.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Handle type produced by this connector.
    type Handle: PoolHandle;

    /// Establish and validate a new handle.
    ///
    /// Failures that should be retried must be transient
    /// (see [`ReservoirError::is_transient`]).
    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Handle, ReservoirError>;
}
