//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via OXIDB_CONFIG or --config)
//! 3. Environment variables

use crate::connection::{ConnectionConfig, Credentials, TlsClientConfig};
use oxidb_protocol::{DEFAULT_HOST, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "OXIDB_CONFIG";

/// Client configuration as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-request read timeout in milliseconds. Unset means wait forever.
    pub read_timeout_ms: Option<u64>,
    /// Credentials sent with `auth_simple` right after connecting.
    pub auth: Option<Credentials>,
    /// TLS configuration.
    pub tls: TlsConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5_000,
            read_timeout_ms: None,
            auth: None,
            tls: TlsConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the file named by `OXIDB_CONFIG` (if set),
    /// then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Like [`ClientConfig::load`], with an explicit config file.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies `OXIDB_*` overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("OXIDB_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("OXIDB_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(ms) = lookup("OXIDB_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = lookup("OXIDB_READ_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.read_timeout_ms = Some(ms);
        }

        if let Some(username) = lookup("OXIDB_USER") {
            let password = lookup("OXIDB_PASSWORD")
                .or_else(|| self.auth.as_ref().map(|a| a.password.clone()))
                .unwrap_or_default();
            self.auth = Some(Credentials::new(username, password));
        } else if let (Some(auth), Some(password)) = (self.auth.as_mut(), lookup("OXIDB_PASSWORD"))
        {
            auth.password = password;
        }

        self.tls.apply_overrides(&lookup);
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError("port must be non-zero".to_string()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be non-zero".to_string(),
            ));
        }
        if let Some(auth) = &self.auth {
            if auth.username.is_empty() {
                return Err(ConfigError::ValidationError(
                    "auth configured but username is empty".to_string(),
                ));
            }
        }
        self.tls.validate()
    }

    /// Validates and converts into the runtime connection configuration.
    pub fn into_connection_config(self) -> Result<ConnectionConfig, ConfigError> {
        self.validate()?;

        let mut config = ConnectionConfig::new(self.host, self.port)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms));
        if let Some(ms) = self.read_timeout_ms {
            config = config.with_read_timeout(Duration::from_millis(ms));
        }
        if let Some(auth) = self.auth {
            config = config.with_credentials(auth.username, auth.password);
        }
        if let Some(tls) = self.tls.into_client_config() {
            config = config.with_tls(tls);
        }
        Ok(config)
    }
}

/// TLS section of the client configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Enable TLS.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s). System roots are used when unset.
    pub ca_cert: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (mTLS).
    pub client_cert: Option<PathBuf>,
    /// Path to PEM-encoded client private key (mTLS).
    pub client_key: Option<PathBuf>,
    /// Skip server certificate verification (development only).
    pub insecure: bool,
    /// Server name for SNI. Defaults to the configured host.
    pub server_name: Option<String>,
}

impl TlsConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("OXIDB_TLS") {
            self.enabled = parse_flag(&enabled);
        }
        if let Some(path) = lookup("OXIDB_CA_CERT") {
            self.ca_cert = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("OXIDB_CLIENT_CERT") {
            self.client_cert = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("OXIDB_CLIENT_KEY") {
            self.client_key = Some(PathBuf::from(path));
        }
        if let Some(insecure) = lookup("OXIDB_TLS_INSECURE") {
            self.insecure = parse_flag(&insecure);
        }
        if let Some(name) = lookup("OXIDB_SERVER_NAME") {
            self.server_name = Some(name);
        }
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.client_cert.is_some() != self.client_key.is_some() {
            return Err(ConfigError::ValidationError(
                "client_cert and client_key must be set together".to_string(),
            ));
        }
        Ok(())
    }

    fn into_client_config(self) -> Option<TlsClientConfig> {
        if !self.enabled {
            return None;
        }
        Some(TlsClientConfig {
            enabled: true,
            ca_cert_path: self.ca_cert,
            client_cert_path: self.client_cert,
            client_key_path: self.client_key,
            insecure: self.insecure,
            server_name: self.server_name,
        })
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    ParseError(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}
