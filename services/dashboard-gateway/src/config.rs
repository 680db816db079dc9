//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `BACKEND_URL` overrides `backend.base_url` so one file can serve
//! several environments.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dashboard_auth::{
    DEFAULT_CREDENTIALS_FILE, DEFAULT_HEALTH_PATH, DEFAULT_LOGIN_PATH, DEFAULT_REFRESH_PATH,
};
use dashboard_client::ClientConfig;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Dashboard backend settings
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_maintenance_window")]
    pub maintenance_window_secs: u64,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Additional endpoints exempt from refresh-and-retry
    #[serde(default)]
    pub auth_paths: Vec<String>,
}

/// Where the session credential lives between restarts
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_timeout() -> u64 {
    10
}

fn default_maintenance_window() -> u64 {
    60
}

fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.to_string()
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_string()
}

fn default_health_path() -> String {
    DEFAULT_HEALTH_PATH.to_string()
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from(DEFAULT_CREDENTIALS_FILE)
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(url) = std::env::var("BACKEND_URL") {
            config.backend.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let backend = &self.backend;
        if !backend.base_url.starts_with("http://") && !backend.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                backend.base_url
            )));
        }
        if backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if backend.maintenance_window_secs == 0 {
            return Err(common::Error::Config(
                "maintenance_window_secs must be greater than 0".into(),
            ));
        }
        if self.gateway.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        for path in [
            &backend.login_path,
            &backend.refresh_path,
            &backend.health_path,
        ]
        .into_iter()
        .chain(&backend.auth_paths)
        {
            if !path.starts_with('/') {
                return Err(common::Error::invalid(
                    "backend paths",
                    &format!("must start with '/', got: {path}"),
                ));
            }
        }
        Ok(())
    }

    /// Pipeline settings derived from `[backend]`.
    pub fn client_config(&self) -> ClientConfig {
        let backend = &self.backend;
        let mut config = ClientConfig::new(backend.base_url.clone());
        config.request_timeout = Duration::from_secs(backend.timeout_secs);
        config.maintenance_window = Duration::from_secs(backend.maintenance_window_secs);
        config.login_path = backend.login_path.clone();
        config.refresh_path = backend.refresh_path.clone();
        config.health_path = backend.health_path.clone();
        config.auth_paths = backend.auth_paths.clone();
        config
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("dashboard-gateway.toml")
    }
}
