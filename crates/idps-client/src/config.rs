//! Client configuration
//!
//! Settings come from a TOML file or from `IDPS_*` environment variables,
//! falling back to defaults for anything not provided.
//!
//! ```toml
//! endpoint = "idps.internal:443"
//! request_timeout_ms = 2000
//!
//! [tls]
//! ca_cert_path = "/etc/idps/cert.pem"
//! domain_name = "idps.internal"
//!
//! [pool]
//! capacity = 8
//! idle_timeout_ms = 30000
//! ```

use crate::pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service endpoint, either `host:port` or a full `http(s)://` URI
    pub endpoint: String,

    /// Transport security
    pub tls: TlsConfig,

    /// Dial timeout in milliseconds (0 = no limit)
    pub connect_timeout_ms: u64,

    /// Per-request deadline in milliseconds (0 = no deadline)
    pub request_timeout_ms: u64,

    /// Connection pool settings
    pub pool: PoolConfig,

    /// Emit JSON formatted logs
    pub json_logging: bool,
}

/// TLS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Use TLS for the channel
    pub enabled: bool,

    /// PEM file holding the CA certificate used to verify the server.
    /// `None` resolves to `keys/cert.pem` next to the working directory.
    pub ca_cert_path: Option<PathBuf>,

    /// Override for the server name checked against the certificate
    pub domain_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:50051".to_string(),
            tls: TlsConfig::default(),
            connect_timeout_ms: 5000,
            request_timeout_ms: 0,
            pool: PoolConfig::default(),
            json_logging: false,
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_cert_path: None,
            domain_name: None,
        }
    }
}

impl TlsConfig {
    /// Path of the CA certificate, resolving the default location if unset
    ///
    /// The default is `<parent of cwd>/keys/cert.pem`.
    pub fn resolved_ca_cert_path(&self) -> std::io::Result<PathBuf> {
        if let Some(ref path) = self.ca_cert_path {
            return Ok(path.clone());
        }
        let cwd = std::env::current_dir()?;
        let parent = cwd.parent().unwrap_or(&cwd);
        Ok(parent.join("keys").join("cert.pem"))
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: ClientConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = ClientConfig::default();

        if let Some(endpoint) = lookup("IDPS_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Some(v) = lookup("IDPS_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.connect_timeout_ms = v;
        }
        if let Some(v) = lookup("IDPS_REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.request_timeout_ms = v;
        }
        if let Some(v) = lookup("IDPS_JSON_LOGGING").and_then(|v| parse_bool(&v)) {
            config.json_logging = v;
        }

        // TLS
        if let Some(v) = lookup("IDPS_TLS").and_then(|v| parse_bool(&v)) {
            config.tls.enabled = v;
        }
        if let Some(path) = lookup("IDPS_CA_CERT") {
            config.tls.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Some(domain) = lookup("IDPS_TLS_DOMAIN") {
            if !domain.is_empty() {
                config.tls.domain_name = Some(domain);
            }
        }

        // Pool
        if let Some(v) = lookup("IDPS_POOL_CAPACITY").and_then(|v| v.parse().ok()) {
            config.pool.capacity = v;
        }
        if let Some(v) = lookup("IDPS_POOL_INITIAL").and_then(|v| v.parse().ok()) {
            config.pool.initial = v;
        }
        if let Some(v) = lookup("IDPS_POOL_IDLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.pool.idle_timeout_ms = v;
        }
        if let Some(v) = lookup("IDPS_POOL_MAX_LIFETIME_MS").and_then(|v| v.parse().ok()) {
            config.pool.max_lifetime_ms = v;
        }
        if let Some(v) = lookup("IDPS_POOL_ACQUIRE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.pool.acquire_timeout_ms = v;
        }

        config
    }

    /// Check the configuration for values that can never work
    pub fn validate(&self) -> crate::Result<()> {
        self.validate_endpoint()?;
        if self.pool.capacity == 0 {
            return Err(crate::Error::InvalidConfig(
                "pool capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Check only what a single channel needs; pool settings are ignored
    pub fn validate_endpoint(&self) -> crate::Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(crate::Error::InvalidConfig(
                "endpoint cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Dial timeout, `None` when disabled
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.connect_timeout_ms)
    }

    /// Per-request deadline, `None` when disabled
    pub fn request_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.request_timeout_ms)
    }
}

pub(crate) fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::InvalidConfig(err.to_string())
    }
}
