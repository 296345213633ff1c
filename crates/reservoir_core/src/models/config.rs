//! Connection configuration, read once at startup.

use crate::error::ReservoirError;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pool size bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Connections opened eagerly once the pool is established
    pub min_idle: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self { max_size: 10, min_idle: 0 }
    }
}

/// Connect retry policy.
///
/// After failed attempt `n` the pool sleeps `n * base_delay` before the next
/// attempt (linear backoff).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total connect attempts, including the first
    pub max_attempts: u32,
    /// Backoff base interval in milliseconds
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    /// Get the backoff base interval.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 500 }
    }
}

/// Configuration for the shared database pool.
///
/// Immutable once the pool is constructed. The password is never logged:
/// the `Debug` impl redacts it.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Server hostname or IP
    pub host: String,
    /// Server port (default 5432)
    pub port: u16,
    /// Database name (1-63 chars)
    pub database: String,
    /// Login username
    pub username: String,
    /// Login password
    #[serde(skip_serializing)]
    pub password: String,
    /// Require an encrypted connection
    pub encrypt: bool,
    /// Accept any server certificate when encrypting
    pub trust_server_certificate: bool,
    /// Application name sent to the server
    pub application_name: String,
    /// Pool size bounds
    pub pool: PoolOptions,
    /// Per-attempt connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Per-statement timeout in seconds (0 = no timeout)
    pub request_timeout_secs: u64,
    /// Connect retry policy
    pub retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            encrypt: false,
            trust_server_certificate: false,
            application_name: "Reservoir".to_string(),
            pool: PoolOptions::default(),
            connect_timeout_secs: 30,
            request_timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("application_name", &self.application_name)
            .field("pool", &self.pool)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Environment variable prefix for [`ConnectionConfig::from_env`].
pub const ENV_PREFIX: &str = "RESERVOIR_DB_";

impl ConnectionConfig {
    /// Create a configuration with required fields and defaults elsewhere.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Create a builder for complex configurations.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Load and validate a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ReservoirError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReservoirError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration from `RESERVOIR_DB_*` variables.
    pub fn from_env() -> Result<Self, ReservoirError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load a configuration from an arbitrary key lookup.
    ///
    /// Keys are the `RESERVOIR_DB_*` variable names. Unset keys keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ReservoirError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let mut config = Self::default();

        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = parse_var("PORT", &port)?;
        }
        if let Some(database) = get("NAME") {
            config.database = database;
        }
        if let Some(username) = get("USER") {
            config.username = username;
        }
        if let Some(password) = get("PASSWORD") {
            config.password = password;
        }
        if let Some(encrypt) = get("ENCRYPT") {
            config.encrypt = parse_flag("ENCRYPT", &encrypt)?;
        }
        if let Some(trust) = get("TRUST_CERT") {
            config.trust_server_certificate = parse_flag("TRUST_CERT", &trust)?;
        }
        if let Some(name) = get("APPLICATION_NAME") {
            config.application_name = name;
        }
        if let Some(max) = get("POOL_MAX") {
            config.pool.max_size = parse_var("POOL_MAX", &max)?;
        }
        if let Some(min) = get("POOL_MIN") {
            config.pool.min_idle = parse_var("POOL_MIN", &min)?;
        }
        if let Some(secs) = get("CONNECT_TIMEOUT_SECS") {
            config.connect_timeout_secs = parse_var("CONNECT_TIMEOUT_SECS", &secs)?;
        }
        if let Some(secs) = get("REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = parse_var("REQUEST_TIMEOUT_SECS", &secs)?;
        }
        if let Some(attempts) = get("RETRY_ATTEMPTS") {
            config.retry.max_attempts = parse_var("RETRY_ATTEMPTS", &attempts)?;
        }
        if let Some(ms) = get("RETRY_BASE_DELAY_MS") {
            config.retry.base_delay_ms = parse_var("RETRY_BASE_DELAY_MS", &ms)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ReservoirError> {
        if self.host.is_empty() {
            return Err(ReservoirError::config("Host is required"));
        }
        if self.database.is_empty() || self.database.len() > 63 {
            return Err(ReservoirError::config("Database name must be 1-63 characters"));
        }
        if self.username.is_empty() {
            return Err(ReservoirError::config("Username is required"));
        }
        if self.pool.max_size == 0 {
            return Err(ReservoirError::config("Pool max size must be at least 1"));
        }
        if self.pool.min_idle > self.pool.max_size {
            return Err(ReservoirError::config("Pool min size cannot exceed max size"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ReservoirError::config("Connect timeout must be at least 1 second"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ReservoirError::config("Retry count must be at least 1"));
        }
        Ok(())
    }

    /// Get the per-attempt connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get the per-statement timeout, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        format!("postgresql://{}@{}:{}/{}", self.username, self.host, self.port, self.database)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ReservoirError> {
    value.trim().parse().map_err(|_| {
        ReservoirError::config(format!("{ENV_PREFIX}{name} has an invalid value: {value:?}"))
    })
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ReservoirError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ReservoirError::config(format!(
            "{ENV_PREFIX}{name} must be a boolean, got {value:?}"
        ))),
    }
}

/// Builder for ConnectionConfig.
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    encrypt: bool,
    trust_server_certificate: bool,
    application_name: Option<String>,
    pool: PoolOptions,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    retry: RetryPolicy,
}

impl ConnectionConfigBuilder {
    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Require an encrypted connection.
    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    /// Accept any server certificate.
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Set the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// Set pool size bounds.
    pub fn pool_size(mut self, min_idle: usize, max_size: usize) -> Self {
        self.pool = PoolOptions { max_size, min_idle };
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = Some(secs);
        self
    }

    /// Set the statement timeout.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    /// Set the connect retry policy.
    pub fn retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.retry = RetryPolicy { max_attempts, base_delay_ms };
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ConnectionConfig, ReservoirError> {
        let defaults = ConnectionConfig::default();
        let config = ConnectionConfig {
            host: self.host.ok_or_else(|| ReservoirError::config("Host is required"))?,
            port: self.port.unwrap_or(defaults.port),
            database: self.database.ok_or_else(|| ReservoirError::config("Database is required"))?,
            username: self.username.ok_or_else(|| ReservoirError::config("Username is required"))?,
            password: self.password.unwrap_or_default(),
            encrypt: self.encrypt,
            trust_server_certificate: self.trust_server_certificate,
            application_name: self.application_name.unwrap_or(defaults.application_name),
            pool: self.pool,
            connect_timeout_secs: self.connect_timeout_secs.unwrap_or(defaults.connect_timeout_secs),
            request_timeout_secs: self.request_timeout_secs.unwrap_or(defaults.request_timeout_secs),
            retry: self.retry,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("db.internal", "app", "svc", "secret");
        assert_eq!(config.port, 5432);
        assert_eq!(config.pool, PoolOptions { max_size: 10, min_idle: 0 });
        assert_eq!(config.retry, RetryPolicy { max_attempts: 3, base_delay_ms: 500 });
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new("db.internal", "app", "svc", "hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
        assert!(!config.display_url().contains("hunter2"));
    }

    #[test]
    fn test_builder_validation() {
        let err = ConnectionConfig::builder().database("app").username("svc").build();
        assert!(err.is_err());

        let err = ConnectionConfig::builder()
            .host("localhost")
            .database("app")
            .username("svc")
            .pool_size(5, 2)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("min size"));

        let err = ConnectionConfig::builder()
            .host("localhost")
            .database("app")
            .username("svc")
            .retry(0, 500)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Retry count"));

        let config = ConnectionConfig::builder()
            .host("localhost")
            .port(6432)
            .database("app")
            .username("svc")
            .password("pw")
            .encrypt(true)
            .retry(5, 250)
            .request_timeout_secs(0)
            .build()
            .unwrap();
        assert_eq!(config.port, 6432);
        assert!(config.encrypt);
        assert_eq!(config.retry.base_delay(), Duration::from_millis(250));
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_from_lookup() {
        let config = ConnectionConfig::from_lookup(lookup_from(&[
            ("RESERVOIR_DB_HOST", "pg.example.com"),
            ("RESERVOIR_DB_PORT", "5433"),
            ("RESERVOIR_DB_NAME", "crm"),
            ("RESERVOIR_DB_USER", "crm_app"),
            ("RESERVOIR_DB_PASSWORD", "pw"),
            ("RESERVOIR_DB_ENCRYPT", "true"),
            ("RESERVOIR_DB_POOL_MAX", "20"),
            ("RESERVOIR_DB_POOL_MIN", "2"),
            ("RESERVOIR_DB_RETRY_ATTEMPTS", "4"),
            ("RESERVOIR_DB_RETRY_BASE_DELAY_MS", "100"),
        ]))
        .unwrap();

        assert_eq!(config.host, "pg.example.com");
        assert_eq!(config.port, 5433);
        assert_eq!(config.database, "crm");
        assert!(config.encrypt);
        assert_eq!(config.pool, PoolOptions { max_size: 20, min_idle: 2 });
        assert_eq!(config.retry, RetryPolicy { max_attempts: 4, base_delay_ms: 100 });
        assert_eq!(config.connect_timeout_secs, 30);
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = ConnectionConfig::from_lookup(lookup_from(&[
            ("RESERVOIR_DB_HOST", "localhost"),
            ("RESERVOIR_DB_NAME", "app"),
            ("RESERVOIR_DB_USER", "svc"),
            ("RESERVOIR_DB_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RESERVOIR_DB_PORT"));

        let err = ConnectionConfig::from_lookup(lookup_from(&[
            ("RESERVOIR_DB_HOST", "localhost"),
            ("RESERVOIR_DB_NAME", "app"),
            ("RESERVOIR_DB_USER", "svc"),
            ("RESERVOIR_DB_ENCRYPT", "maybe"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("boolean"));

        let err = ConnectionConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("Host is required"));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "host": "localhost",
                "database": "app",
                "username": "svc",
                "password": "pw",
                "pool": {{ "max_size": 4 }},
                "retry": {{ "max_attempts": 2 }}
            }}"#
        )
        .unwrap();

        let config = ConnectionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.pool.max_size, 4);
        assert_eq!(config.pool.min_idle, 0);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.password, "pw");

        // Password is never written back out
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("\"pw\""));
    }

    #[test]
    fn test_from_json_file_missing() {
        let err = ConnectionConfig::from_json_file("/nonexistent/reservoir.json").unwrap_err();
        assert!(matches!(err, ReservoirError::Config { .. }));
    }
}
