//! Structured logging setup with console and file output.
//!
//! Interactive terminals get console-only output. Otherwise logs go to stderr
//! and to a daily rotating file, falling back to console-only when the log
//! directory cannot be used. `RESERVOIR_LOG` (then `RUST_LOG`) overrides the
//! build-type default filter.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive.
pub const LOG_ENV_VAR: &str = "RESERVOIR_LOG";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Whether stdout is a terminal
    pub is_pty: bool,
    /// Optional custom log filter
    pub log_filter: Option<String>,
}

impl LogConfig {
    /// Create a new logging configuration.
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir, is_pty: atty::is(atty::Stream::Stdout), log_filter: None }
    }

    /// Set custom log filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Force console-only output.
    pub fn console_only(mut self) -> Self {
        self.is_pty = true;
        self
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(log_dir())
    }
}

/// Guard that must be held for the lifetime of the process.
///
/// Dropping this guard flushes pending log entries.
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// Check whether file output is active.
    pub fn writes_file(&self) -> bool {
        self._worker_guard.is_some()
    }
}

/// Install the global subscriber.
///
/// If file logging cannot be set up, falls back to console-only output.
/// A second call leaves the first subscriber in place.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    if config.is_pty {
        return init_stdout_logging(config.log_filter.as_deref());
    }

    match init_file_logging(&config) {
        Ok(guard) => LoggingGuard { _worker_guard: Some(guard) },
        Err(e) => {
            eprintln!("Warning: Failed to initialize file logging: {}. Using console only.", e);
            init_stdout_logging(config.log_filter.as_deref())
        }
    }
}

fn init_stdout_logging(filter: Option<&str>) -> LoggingGuard {
    let result = tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }

    LoggingGuard { _worker_guard: None }
}

fn init_file_logging(config: &LogConfig) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("reservoir")
        .filename_suffix("log")
        .build(&config.log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Command output owns stdout; console logs go to stderr
    let console = std::io::stderr.with_max_level(tracing::Level::INFO);
    let combined = console.and(non_blocking);

    tracing_subscriber::fmt()
        .with_writer(combined)
        .with_env_filter(build_env_filter(config.log_filter.as_deref()))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(guard)
}

/// Build the filter. Priority: custom > `RESERVOIR_LOG` > `RUST_LOG` > default.
fn build_env_filter(custom_filter: Option<&str>) -> EnvFilter {
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    }

    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Get the default log filter based on build type.
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "info,reservoir=debug,reservoir_core=debug,tokio_postgres=warn,deadpool=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "warn,reservoir=info,reservoir_core=info,tokio_postgres=warn,deadpool=warn"
    }
}

/// Get the default log directory.
///
/// Debug builds log to `./reservoir_data/logs`.
pub fn log_dir() -> PathBuf {
    #[cfg(debug_assertions)]
    {
        PathBuf::from("./reservoir_data/logs")
    }

    #[cfg(not(debug_assertions))]
    {
        dirs::data_local_dir()
            .map(|d| d.join("reservoir").join("logs"))
            .unwrap_or_else(|| PathBuf::from("./reservoir_data/logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(default_log_filter()).is_ok());
    }

    #[test]
    fn test_invalid_custom_filter_falls_back() {
        let filter = build_env_filter(Some("reservoir_core=notalevel=="));
        assert!(filter.to_string().contains("reservoir_core"));
    }

    #[test]
    fn test_log_config_builder() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig::new(dir.path().to_path_buf()).with_filter("trace").console_only();
        assert!(config.is_pty);
        assert_eq!(config.log_filter.as_deref(), Some("trace"));
        assert_eq!(config.log_dir, dir.path());
    }

    #[test]
    fn test_log_dir_ends_in_logs() {
        assert!(log_dir().ends_with("logs"));
    }
}
