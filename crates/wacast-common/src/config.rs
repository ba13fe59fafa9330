//! Configuration for Wacast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "WACAST_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Media storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// WhatsApp gateway client configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// CRM client configuration
    #[serde(default)]
    pub crm: CrmConfig,

    /// Campaign worker tuning
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Settings cache configuration
    #[serde(default)]
    pub settings: SettingsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body (spreadsheet + media upload)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for a TCP listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: "postgres" or "memory"
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL (for postgres)
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

impl DatabaseConfig {
    /// Whether the in-memory repositories should be used
    pub fn is_memory(&self) -> bool {
        self.backend.eq_ignore_ascii_case("memory")
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Media storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for uploaded media
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/media")
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
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

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// WhatsApp gateway client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL used when the stored settings carry none
    #[serde(default = "default_gateway_base_url")]
    pub default_base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// Value of the `async` flag sent with every message
    #[serde(default)]
    pub async_send: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_base_url: default_gateway_base_url(),
            timeout_secs: default_gateway_timeout(),
            async_send: false,
        }
    }
}

/// Default WhatsApp gateway endpoint
pub const DEFAULT_GATEWAY_BASE_URL: &str = "https://whatsgate.ru/api/v1";

fn default_gateway_base_url() -> String {
    DEFAULT_GATEWAY_BASE_URL.to_string()
}

fn default_gateway_timeout() -> u64 {
    30
}

/// CRM client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Per-request timeout in seconds
    #[serde(default = "default_crm_timeout")]
    pub timeout_secs: u64,

    /// Global admission rate shared by every CRM call
    #[serde(default = "default_crm_rps")]
    pub requests_per_second: u32,

    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_crm_timeout(),
            requests_per_second: default_crm_rps(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_crm_timeout() -> u64 {
    60
}

fn default_crm_rps() -> u32 {
    8
}

fn default_user_agent() -> String {
    format!("wacast/{}", env!("CARGO_PKG_VERSION"))
}

/// Campaign worker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Back-off before the single in-place retry of a transient send failure
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Consecutive unauthorized responses that fail the whole campaign
    #[serde(default = "default_unauthorized_threshold")]
    pub unauthorized_threshold: u32,

    /// How long a cancel request waits for the worker to finish
    #[serde(default = "default_cancel_wait_secs")]
    pub cancel_wait_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
            unauthorized_threshold: default_unauthorized_threshold(),
            cancel_wait_secs: default_cancel_wait_secs(),
        }
    }
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_unauthorized_threshold() -> u32 {
    3
}

fn default_cancel_wait_secs() -> u64 {
    10
}

/// Settings cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Lifetime of cached credentials
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Extra attempts after a CRM credential failure
    #[serde(default = "default_crm_retry_attempts")]
    pub crm_retry_attempts: u32,

    /// Pause between those attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub crm_retry_backoff_ms: u64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            crm_retry_attempts: default_crm_retry_attempts(),
            crm_retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_crm_retry_attempts() -> u32 {
    2
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Configuration(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from the first config file found, overlaid with
    /// `WACAST_*` environment variables (`WACAST_DATABASE__URL`, ...).
    pub fn load() -> crate::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = Self::locate_file() {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix("WACAST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::Configuration(format!("Failed to load config: {}", e)))
    }

    fn locate_file() -> Option<PathBuf> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(explicit));
        }

        [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/wacast/config.toml"),
        ]
        .into_iter()
        .find(|path| path.exists())
    }
}
