//! Error types for the pool manager.
//!
//! Errors fall into three classes that drive the retry and invalidation logic:
//! transient connection failures, semantic query failures, and pool shutdown.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Shared, cloneable error source.
///
/// Sources are reference counted so one connect outcome can be handed to every
/// caller waiting on it.
pub type SharedSource = Arc<dyn std::error::Error + Send + Sync>;

/// Main error type for Reservoir.
#[derive(Debug, Clone, Error)]
pub enum ReservoirError {
    /// Network or transport failure talking to the database.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<SharedSource>,
    },

    /// Authentication rejected while connecting.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the operator.
        hint: Option<String>,
    },

    /// A connect attempt or statement exceeded its time budget.
    #[error("Timeout: {message}")]
    Timeout {
        /// Human-readable error message.
        message: String,
    },

    /// Statement rejected by the database.
    #[error("{message}")]
    Query {
        /// Database error message.
        message: String,
        /// Additional detail from the server.
        detail: Option<String>,
        /// Server hint.
        hint: Option<String>,
        /// Position in the statement (1-indexed).
        position: Option<usize>,
        /// SQLSTATE code (e.g., "23505").
        code: Option<String>,
    },

    /// Every pooled connection stayed busy past the wait budget.
    #[error("Pool exhausted: {message}")]
    PoolExhausted {
        /// Human-readable error message.
        message: String,
    },

    /// The pool has been shut down.
    #[error("Pool closed")]
    PoolClosed,

    /// Invalid or unreadable configuration.
    #[error("Config error: {message}")]
    Config {
        /// Human-readable error message.
        message: String,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
    },
}

/// Coarse classification used for retry and invalidation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection-level failure: retried at connect, invalidates a ready pool.
    Transient,
    /// Statement-level failure: returned as-is, never retried.
    Query,
    /// Pool saturated: the link is healthy, so it is kept.
    Busy,
    /// Pool shut down: never retried.
    Closed,
    /// Configuration or internal failure.
    Other,
}

impl ReservoirError {
    // ========== Constructors ==========

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Create a new authentication error with a custom hint.
    pub fn authentication_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Authentication { message: message.into(), hint: Some(hint.into()) }
    }

    /// Create a new timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout { message: message.into() }
    }

    /// Create a new query error with full server details.
    pub fn query(
        message: impl Into<String>,
        detail: Option<String>,
        hint: Option<String>,
        position: Option<usize>,
        code: Option<String>,
    ) -> Self {
        Self::Query { message: message.into(), detail, hint, position, code }
    }

    /// Create a query error that carries only a message.
    pub fn query_message(message: impl Into<String>) -> Self {
        Self::query(message, None, None, None, None)
    }

    /// Create a new pool-exhausted error.
    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted { message: message.into() }
    }

    /// Create a new config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Re-express any failure seen while establishing a pool as transport-class.
    ///
    /// Authentication and timeouts keep their variant; everything else becomes a
    /// connection error wrapping the original.
    pub fn into_connect_failure(self) -> Self {
        if self.is_transient() {
            return self;
        }
        match self {
            Self::PoolClosed
            | Self::PoolExhausted { .. }
            | Self::Config { .. }
            | Self::Internal { .. } => self,
            other => Self::Connection { message: other.to_string(), source: Some(Arc::new(other)) },
        }
    }

    // ========== Methods ==========

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } | Self::Authentication { .. } | Self::Timeout { .. } => {
                ErrorKind::Transient
            }
            Self::Query { .. } => ErrorKind::Query,
            Self::PoolExhausted { .. } => ErrorKind::Busy,
            Self::PoolClosed => ErrorKind::Closed,
            Self::Config { .. } | Self::Internal { .. } => ErrorKind::Other,
        }
    }

    /// Check if this error carries a transport or timeout signature.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Check if this error reports a shut-down pool.
    pub fn is_pool_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "Connection",
            Self::Authentication { .. } => "Authentication",
            Self::Timeout { .. } => "Timeout",
            Self::Query { .. } => "Query",
            Self::PoolExhausted { .. } => "Busy",
            Self::PoolClosed => "Pool",
            Self::Config { .. } => "Config",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the operator.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Connection { .. } => Some("Check that the database server is reachable"),
            Self::Authentication { hint, .. } => hint.as_deref(),
            Self::Timeout { .. } => Some("The server may be overloaded or unreachable"),
            Self::Query { hint, .. } => hint.as_deref(),
            Self::PoolExhausted { .. } => {
                Some("All pooled connections are in use; retry later or raise the pool max size")
            }
            Self::PoolClosed => Some("The service is shutting down"),
            Self::Config { .. } => Some("Check the RESERVOIR_DB_* settings"),
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get the SQLSTATE code (if applicable).
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Convert to displayable error info.
    pub fn to_error_info(&self) -> ErrorInfo {
        let error_type = format!("{} Error", self.category());
        let message = self.to_string();
        let hint = self.hint().map(String::from);

        let technical_detail = match self {
            Self::Query { detail, code, position, .. } => {
                let mut parts = Vec::new();
                if let Some(code) = code {
                    parts.push(format!("Code: {code}"));
                }
                if let Some(pos) = position {
                    parts.push(format!("Position: {pos}"));
                }
                if let Some(detail) = detail {
                    parts.push(format!("Detail: {detail}"));
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            Self::Connection { source: Some(source), .. } => Some(source.to_string()),
            _ => None,
        };

        ErrorInfo { error_type, message, hint, technical_detail }
    }

    /// Downgrade to the generic response handed to request handlers.
    pub fn to_operation_failure(&self) -> OperationFailure {
        OperationFailure {
            error: "Operation failed".to_string(),
            kind: self.kind(),
            detail: self.to_error_info(),
        }
    }
}

/// Displayable error information.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    /// Category name (e.g., "Connection Error").
    pub error_type: String,
    /// User-friendly message.
    pub message: String,
    /// Actionable suggestion.
    pub hint: Option<String>,
    /// Technical detail for diagnostics.
    pub technical_detail: Option<String>,
}

/// Generic failure payload returned at the request boundary.
///
/// Every error class collapses to the same `error` text; the original message
/// travels in `detail` for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct OperationFailure {
    /// Always "Operation failed".
    pub error: String,
    /// Class of the underlying error.
    pub kind: ErrorKind,
    /// Underlying error for diagnostics.
    pub detail: ErrorInfo,
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.detail.message)
    }
}

// ========== Error Conversions ==========

/// Classify a SQLSTATE code into a transport-class error, if it is one.
fn transport_error_for_code(code: &str, message: &str) -> Option<ReservoirError> {
    match code {
        // invalid_password / invalid_authorization_specification
        "28P01" => Some(ReservoirError::authentication_with_hint(
            message,
            "Invalid password - check your credentials",
        )),
        _ if code.starts_with("28") => Some(ReservoirError::authentication_with_hint(
            message,
            "Authentication failed - check username and permissions",
        )),
        // query_canceled, raised by statement_timeout
        "57014" => Some(ReservoirError::timeout(message)),
        // admin_shutdown, crash_shutdown, cannot_connect_now, too_many_connections
        "57P01" | "57P02" | "57P03" | "53300" => Some(ReservoirError::connection(message)),
        // connection_exception class
        _ if code.starts_with("08") => Some(ReservoirError::connection(message)),
        _ => None,
    }
}

/// Convert from tokio_postgres::Error to ReservoirError.
impl From<tokio_postgres::Error> for ReservoirError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let code_str = db_err.code().code();

            if let Some(transport) = transport_error_for_code(code_str, &message) {
                return transport;
            }

            let detail = db_err.detail().map(String::from);
            let hint = db_err.hint().map(String::from);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos as usize),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            return ReservoirError::Query {
                message,
                detail,
                hint,
                position,
                code: Some(code_str.to_string()),
            };
        }

        if err.is_closed() {
            return ReservoirError::connection_with_source("Connection closed", err);
        }

        // Socket and TLS failures surface as the error's source
        let transport_source = std::error::Error::source(&err).is_some_and(|source| {
            source.is::<std::io::Error>() || source.is::<native_tls::Error>()
        });
        if transport_source {
            return ReservoirError::connection_with_source(err.to_string(), err);
        }

        // Encoding, decoding and protocol misuse are statement-level
        ReservoirError::query_message(err.to_string())
    }
}

/// Convert from deadpool's pool error to ReservoirError.
impl From<deadpool_postgres::PoolError> for ReservoirError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            // Waiting for a free slot says nothing about the server
            deadpool_postgres::PoolError::Timeout(deadpool_postgres::TimeoutType::Wait) => {
                ReservoirError::pool_exhausted("Timed out waiting for a free connection")
            }
            deadpool_postgres::PoolError::Timeout(kind) => {
                ReservoirError::timeout(format!("Timed out opening a connection ({kind:?})"))
            }
            deadpool_postgres::PoolError::Backend(err) => ReservoirError::from(err),
            deadpool_postgres::PoolError::Closed => ReservoirError::connection("Pool was closed"),
            other => ReservoirError::connection(other.to_string()),
        }
    }
}

/// Convert from std::io::Error to ReservoirError.
impl From<std::io::Error> for ReservoirError {
    fn from(err: std::io::Error) -> Self {
        ReservoirError::config(format!("I/O error: {err}"))
    }
}

/// Convert from serde_json::Error to ReservoirError.
impl From<serde_json::Error> for ReservoirError {
    fn from(err: serde_json::Error) -> Self {
        ReservoirError::config(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(ReservoirError::connection("reset").kind(), ErrorKind::Transient);
        assert_eq!(ReservoirError::timeout("slow").kind(), ErrorKind::Transient);
        assert_eq!(
            ReservoirError::authentication_with_hint("denied", "check it").kind(),
            ErrorKind::Transient
        );
        assert_eq!(ReservoirError::query_message("syntax").kind(), ErrorKind::Query);
        assert_eq!(ReservoirError::PoolClosed.kind(), ErrorKind::Closed);
        assert_eq!(ReservoirError::config("bad").kind(), ErrorKind::Other);
        assert!(ReservoirError::PoolClosed.is_pool_closed());
        assert!(!ReservoirError::query_message("x").is_transient());
    }

    #[test]
    fn test_sqlstate_classes() {
        assert!(matches!(
            transport_error_for_code("28P01", "bad password"),
            Some(ReservoirError::Authentication { .. })
        ));
        assert!(matches!(
            transport_error_for_code("28000", "no such role"),
            Some(ReservoirError::Authentication { .. })
        ));
        assert!(matches!(
            transport_error_for_code("08006", "connection failure"),
            Some(ReservoirError::Connection { .. })
        ));
        assert!(matches!(
            transport_error_for_code("57P01", "terminating connection"),
            Some(ReservoirError::Connection { .. })
        ));
        assert!(matches!(
            transport_error_for_code("57014", "canceling statement"),
            Some(ReservoirError::Timeout { .. })
        ));
        // Constraint violations and syntax errors are semantic
        assert!(transport_error_for_code("23505", "duplicate key").is_none());
        assert!(transport_error_for_code("42601", "syntax error").is_none());
    }

    #[test]
    fn test_into_connect_failure() {
        let err = ReservoirError::query_message("database \"nope\" does not exist");
        let converted = err.into_connect_failure();
        assert!(converted.is_transient());
        assert!(converted.to_string().contains("does not exist"));

        let timeout = ReservoirError::timeout("slow").into_connect_failure();
        assert!(matches!(timeout, ReservoirError::Timeout { .. }));

        assert!(ReservoirError::PoolClosed.into_connect_failure().is_pool_closed());
    }

    #[test]
    fn test_error_info_for_query() {
        let err = ReservoirError::query(
            "duplicate key value violates unique constraint",
            Some("Key (id)=(1) already exists.".to_string()),
            None,
            None,
            Some("23505".to_string()),
        );
        let info = err.to_error_info();
        assert_eq!(info.error_type, "Query Error");
        let detail = info.technical_detail.expect("detail");
        assert!(detail.contains("Code: 23505"));
        assert!(detail.contains("Detail: Key (id)=(1) already exists."));
        assert_eq!(err.sql_state(), Some("23505"));
    }

    #[test]
    fn test_operation_failure_downgrade() {
        for err in [
            ReservoirError::connection("refused"),
            ReservoirError::query_message("syntax error at or near \"SELEC\""),
            ReservoirError::PoolClosed,
        ] {
            let failure = err.to_operation_failure();
            assert_eq!(failure.error, "Operation failed");
            assert_eq!(failure.kind, err.kind());
            assert_eq!(failure.detail.message, err.to_string());
        }
    }

    #[test]
    fn test_pool_wait_timeout_is_not_transient() {
        use deadpool_postgres::{PoolError, TimeoutType};

        let busy = ReservoirError::from(PoolError::Timeout(TimeoutType::Wait));
        assert!(matches!(busy, ReservoirError::PoolExhausted { .. }));
        assert_eq!(busy.kind(), ErrorKind::Busy);
        assert!(!busy.is_transient());
        assert_eq!(busy.category(), "Busy");
        assert!(busy.hint().is_some_and(|h| h.contains("max size")));
        assert!(busy.clone().into_connect_failure().kind() == ErrorKind::Busy);

        for kind in [TimeoutType::Create, TimeoutType::Recycle] {
            let err = ReservoirError::from(PoolError::Timeout(kind));
            assert!(matches!(err, ReservoirError::Timeout { .. }));
            assert!(err.is_transient());
        }
    }

    #[test]
    fn test_errors_clone_with_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ReservoirError::connection_with_source("connect failed", io);
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
        assert!(std::error::Error::source(&copy).is_some());
    }
}
