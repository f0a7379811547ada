use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// How long SQLite waits on a locked database before giving up
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
    /// Upper bound on any single request to the store thread
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Scanned OS version strings are cut to this many characters before storage
    #[serde(default = "default_os_version_max_chars")]
    pub os_version_max_chars: usize,
    #[serde(default = "default_discovery_type")]
    pub default_discovery_type: String,
}

/// Values filled in when an operator registers a record without them.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_server_environment")]
    pub server_environment: String,
    #[serde(default = "default_application_criticality")]
    pub application_criticality: String,
    #[serde(default = "default_service_protocol")]
    pub service_protocol: String,
    #[serde(default = "default_service_status")]
    pub service_status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/cmdb/cmdb.db")
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_os_version_max_chars() -> usize {
    50
}

fn default_discovery_type() -> String {
    shared::protocol::DEFAULT_DISCOVERY_TYPE.to_string()
}

fn default_server_environment() -> String {
    "production".to_string()
}

fn default_application_criticality() -> String {
    "medium".to_string()
}

fn default_service_protocol() -> String {
    "tcp".to_string()
}

fn default_service_status() -> String {
    shared::protocol::SERVICE_STATUS_RUNNING.to_string()
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            os_version_max_chars: default_os_version_max_chars(),
            default_discovery_type: default_discovery_type(),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            server_environment: default_server_environment(),
            application_criticality: default_application_criticality(),
            service_protocol: default_service_protocol(),
            service_status: default_service_status(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.discovery.os_version_max_chars, 50);
        assert_eq!(config.discovery.default_discovery_type, "local_discovery");
        assert_eq!(config.defaults.server_environment, "production");
        assert_eq!(config.api.listen, "[::]:8080");
    }

    #[test]
    fn test_partial_sections_keep_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
            [store]
            db_path = "/tmp/cmdb-test.db"
            request_timeout_ms = 250

            [defaults]
            application_criticality = "low"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.db_path, PathBuf::from("/tmp/cmdb-test.db"));
        assert_eq!(config.store.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.store.busy_timeout_ms, 5000);
        assert_eq!(config.defaults.application_criticality, "low");
        assert_eq!(config.defaults.service_protocol, "tcp");
    }
}
