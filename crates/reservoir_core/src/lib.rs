//! Shared database connection pool manager.
//!
//! One lazily created pool per process, handed to concurrent callers:
//!
//! - **error**: Error taxonomy (transient, query, closed) with PostgreSQL details
//! - **models**: Configuration, parameters, results and status snapshots
//! - **services**: Pool manager, executor, backoff and the PostgreSQL connector
//! - **state**: Composition root for request handlers
//! - **logging**: Structured logging setup

pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ErrorInfo, ErrorKind, OperationFailure, ReservoirError};
pub use models::{
    ConnectionConfig, HealthReport, NamedParams, ParamValue, PoolSnapshot, PoolState, PoolStatus,
    QueryOutcome, QueryType, RowMap,
};
pub use services::{ConnectionPool, Connector, PgConnector, PoolHandle, QueryExecutor};
pub use state::ReservoirState;
