//! Data models for Reservoir.
//!
//! This module contains all core data structures:
//! - `config` - ConnectionConfig, PoolOptions, RetryPolicy
//! - `query` - ParamValue, NamedParams, QueryOutcome, QueryType
//! - `status` - PoolState, PoolStatus, PoolSnapshot, HealthReport

pub mod config;
pub mod query;
pub mod status;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, PoolOptions, RetryPolicy};
pub use query::{BoundStatement, NamedParams, ParamValue, QueryOutcome, QueryType, RowMap};
pub use status::{HealthReport, PoolSnapshot, PoolState, PoolStatus};
