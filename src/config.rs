//! # Configuration Module
//!
//! Service configuration loaded from a YAML or JSON file, plus runtime settings
//! read from the environment.
//!
//! ```yaml
//! host: { address: 0.0.0.0, port: 8080 }
//! routing:
//!   api: { location: api, path: /api }
//!   static: public
//! authentication:
//!   login: { api: auth/login, path: login }
//!   logout: { api: auth/logout }
//! session: { key: sid }
//! socket:
//!   port: 8081
//!   connect: { api: socket/connect }
//!   disconnect: { api: socket/disconnect }
//! limits: { maxBodyBytes: 8388608 }
//! ```
//!
//! Relative paths resolve against the directory holding the config file.
//!
//! ## Environment Variables
//!
//! - `WAYPOST_PORT`: overrides `host.port`
//! - `WAYPOST_SOCKET_PORT`: overrides `socket.port`
//! - `WAYPOST_API_LOCATION`: overrides `routing.api.location`
//! - `WAYPOST_STACK_SIZE`: coroutine stack size, decimal or `0x` hex (default `0x8000`)

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STACK_SIZE: usize = 0x8000;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        message: String,
    },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, message } => {
                write!(f, "invalid config {}: {message}", path.display())
            }
            ConfigError::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Directory holding handler descriptors
    pub location: PathBuf,
    /// URL prefix API handlers are mounted under
    pub path: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            location: PathBuf::from("api"),
            path: "/api".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub api: ApiConfig,
    #[serde(rename = "static")]
    pub static_dir: PathBuf,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            static_dir: PathBuf::from("public"),
        }
    }
}

/// A login or logout endpoint: the handler routing path and an optional mount path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub api: Option<String>,
    pub path: Option<String>,
}

impl EndpointConfig {
    /// Mount path relative to the API prefix: `path`, else `api`.
    #[must_use]
    pub fn mount_path(&self) -> Option<&str> {
        self.path.as_deref().or(self.api.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticationSection {
    pub login: EndpointConfig,
    pub logout: EndpointConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session cookie name
    pub key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: "sid".to_string(),
        }
    }
}

/// Lifecycle handler reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub api: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Port of the event transport; no transport is started when absent
    pub port: Option<u16>,
    pub connect: LifecycleConfig,
    pub disconnect: LifecycleConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitsConfig {
    pub max_body_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: crate::server::DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: HostConfig,
    pub routing: RoutingSection,
    /// Present when login and logout routes should be mounted
    pub authentication: Option<AuthenticationSection>,
    pub session: SessionConfig,
    pub socket: SocketConfig,
    pub limits: LimitsConfig,
}

impl ServiceConfig {
    /// Load a config file; `.json` is read as JSON, anything else as YAML.
    ///
    /// Relative directories are resolved against the file's directory and
    /// environment overrides are applied.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let mut config: ServiceConfig = if text.trim().is_empty() {
            ServiceConfig::default()
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?
        } else {
            serde_yaml::from_str(&text).map_err(|e| parse_err(e.to_string()))?
        };

        config.apply_overrides(|name| env::var(name).ok())?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Apply `WAYPOST_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = |name: &str, value: String| {
            value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid(format!("{name} must be a port, got {value:?}")))
        };
        if let Some(value) = lookup("WAYPOST_PORT") {
            self.host.port = port("WAYPOST_PORT", value)?;
        }
        if let Some(value) = lookup("WAYPOST_SOCKET_PORT") {
            self.socket.port = Some(port("WAYPOST_SOCKET_PORT", value)?);
        }
        if let Some(value) = lookup("WAYPOST_API_LOCATION") {
            self.routing.api.location = PathBuf::from(value);
        }
        Ok(())
    }

    /// Resolve relative API and static directories against `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        if self.routing.api.location.is_relative() {
            self.routing.api.location = base.join(&self.routing.api.location);
        }
        if self.routing.static_dir.is_relative() {
            self.routing.static_dir = base.join(&self.routing.static_dir);
        }
    }

    #[must_use]
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host.address, self.host.port)
    }

    #[must_use]
    pub fn socket_addr(&self) -> Option<String> {
        self.socket
            .port
            .map(|port| format!("{}:{port}", self.host.address))
    }
}

/// Coroutine runtime settings loaded from the environment.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes
    pub stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

fn parse_stack_size(value: &str) -> Option<usize> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let stack_size = env::var("WAYPOST_STACK_SIZE")
            .ok()
            .and_then(|v| parse_stack_size(&v))
            .unwrap_or(DEFAULT_STACK_SIZE);
        RuntimeConfig { stack_size }
    }

    /// Configure the global `may` scheduler.
    pub fn apply(&self) {
        may::config().set_stack_size(self.stack_size);
    }
}
