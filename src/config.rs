//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

use crate::store::StoreLimits;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed to post events; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data/analytics.json")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,
    #[serde(default = "default_max_window_days")]
    pub max_window_days: u32,
    /// Click records returned per day
    #[serde(default = "default_click_detail_limit")]
    pub click_detail_limit: usize,
    /// Click records returned per button
    #[serde(default = "default_recent_clicks_limit")]
    pub recent_clicks_limit: usize,
    /// Buckets older than this many days are pruned; 0 keeps everything
    #[serde(default)]
    pub retention_days: u32,
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
            max_window_days: default_max_window_days(),
            click_detail_limit: default_click_detail_limit(),
            recent_clicks_limit: default_recent_clicks_limit(),
            retention_days: 0,
            prune_interval_secs: default_prune_interval_secs(),
        }
    }
}

impl AnalyticsConfig {
    pub fn limits(&self) -> StoreLimits {
        StoreLimits {
            click_detail_limit: self.click_detail_limit,
            recent_clicks_limit: self.recent_clicks_limit,
        }
    }
}

fn default_window_days() -> u32 {
    30
}

fn default_max_window_days() -> u32 {
    366
}

fn default_click_detail_limit() -> usize {
    100
}

fn default_recent_clicks_limit() -> usize {
    10
}

fn default_prune_interval_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer password for dashboard endpoints; empty leaves them open
    #[serde(default)]
    pub password: String,
}

impl AdminConfig {
    pub fn password(&self) -> Option<&str> {
        Some(self.password.as_str()).filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty`, `json` or `gcp`
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
    "pretty".to_string()
}

impl Config {
    /// Load from an optional TOML file layered with `SITE_ANALYTICS_*` env vars
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path.unwrap_or("config.toml");

        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix("SITE_ANALYTICS")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .try_parsing(true),
            );

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Invalid port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        if self.storage.data_file.as_os_str().is_empty() {
            anyhow::bail!("Storage data_file cannot be empty");
        }

        let analytics = &self.analytics;
        if analytics.click_detail_limit == 0 {
            anyhow::bail!("click_detail_limit must be at least 1");
        }
        if analytics.default_window_days == 0 || analytics.default_window_days > analytics.max_window_days {
            anyhow::bail!(
                "default_window_days must be between 1 and max_window_days ({})",
                analytics.max_window_days
            );
        }
        if analytics.retention_days > 0 && analytics.prune_interval_secs == 0 {
            anyhow::bail!("prune_interval_secs must be positive when retention is enabled");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }
        let valid_formats = ["pretty", "json", "gcp"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!("Invalid logging format '{}'. Must be one of: {:?}", self.logging.format, valid_formats);
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.analytics.limits().click_detail_limit, 100);
        assert!(config.admin.password().is_none());
    }

    #[test]
    fn loads_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 8081

[storage]
data_file = "/tmp/site/analytics.json"

[analytics]
default_window_days = 7
retention_days = 400

[admin]
password = "s3cret"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.data_file, PathBuf::from("/tmp/site/analytics.json"));
        assert_eq!(config.analytics.default_window_days, 7);
        assert_eq!(config.analytics.max_window_days, 366);
        assert_eq!(config.admin.password(), Some("s3cret"));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = Config::default();
        config.analytics.default_window_days = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analytics.click_detail_limit = 0;
        assert!(config.validate().is_err());
    }
}
