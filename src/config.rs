//! Configuration loading and types for the IdP.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, resource persistence, the identity-provider
//! behaviour itself, logging and metrics.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Resource store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Identity-provider settings (sessions, credentials, certificate).
    #[serde(default)]
    pub idp: IdpConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public base URL of the IdP.  Metadata is served at `<base>/metadata`
    /// and single sign-on at `<base>/sso`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request deadline in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// URL of the IdP metadata document; doubles as the IdP entity ID.
    pub fn metadata_url(&self) -> String {
        format!("{}/metadata", self.base())
    }

    pub fn sso_url(&self) -> String {
        format!("{}/sso", self.base())
    }

    /// Whether cookies issued by the IdP should carry `Secure`.
    pub fn is_https(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend type: `sqlite`, `memory` or `local`.
    #[serde(default = "default_store_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// JSONL file store configuration.
    #[serde(default)]
    pub local: LocalStoreConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            engine: default_store_engine(),
            sqlite: SqliteConfig::default(),
            local: LocalStoreConfig::default(),
        }
    }
}

/// SQLite-specific store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_sqlite_path(),
        }
    }
}

/// Local JSONL store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStoreConfig {
    /// Directory holding `entries.jsonl`.
    #[serde(default = "default_local_root")]
    pub root_dir: String,

    /// Rewrite the log without tombstones when the store is opened.
    #[serde(default = "default_true")]
    pub compact_on_startup: bool,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            root_dir: default_local_root(),
            compact_on_startup: true,
        }
    }
}

/// Identity-provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdpConfig {
    /// Lifetime of a login session in seconds.
    #[serde(default = "default_session_max_age")]
    pub session_max_age: u64,

    /// PEM certificate advertised as the IdP signing key in metadata.
    #[serde(default)]
    pub certificate_path: Option<String>,

    /// Argon2id cost parameters for stored credentials.
    #[serde(default)]
    pub password_hash: PasswordHashConfig,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            session_max_age: default_session_max_age(),
            certificate_path: None,
            password_hash: PasswordHashConfig::default(),
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordHashConfig {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,

    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_store_engine() -> String {
    "sqlite".to_string()
}

fn default_sqlite_path() -> String {
    "./data/idp.db".to_string()
}

fn default_local_root() -> String {
    "./data/store".to_string()
}

fn default_session_max_age() -> u64 {
    24 * 60 * 60
}

fn default_memory_kib() -> u32 {
    19 * 1024
}

fn default_iterations() -> u32 {
    2
}

fn default_parallelism() -> u32 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
