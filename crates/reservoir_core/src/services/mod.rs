//! Backend services for Reservoir.
//!
//! - `backoff` - Linear retry delays and the sleep clock
//! - `connector` - Driver seams (`Connector`, `PoolHandle`)
//! - `pool` - The shared pool manager with single-flight connects
//! - `executor` - Named-parameter statement execution
//! - `postgres` - deadpool-postgres implementation of the seams

pub mod backoff;
pub mod connector;
pub mod executor;
pub mod pool;
pub mod postgres;

pub use backoff::{Clock, LinearBackoff, TokioClock};
pub use connector::{Connector, PoolHandle};
pub use executor::{bind_named, QueryExecutor};
pub use pool::ConnectionPool;
pub use postgres::{PgConnector, PgPoolHandle};
