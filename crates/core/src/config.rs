use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChromeConfig {
    #[serde(default = "default_chrome_host")]
    pub host: String,
    #[serde(default = "default_chrome_port")]
    pub port: u16,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_chrome_host() -> String {
    "127.0.0.1".to_string()
}

fn default_chrome_port() -> u16 {
    9222
}

fn default_command_timeout_secs() -> u64 {
    30
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            host: default_chrome_host(),
            port: default_chrome_port(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OutputConfig {
    /// Record directory. Falls back to `~/.tabscope/records`.
    #[serde(default)]
    pub dir: Option<String>,
}

/// Thresholds for the network monitor's stack-capture decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default = "default_stack_cache_capacity")]
    pub stack_cache_capacity: usize,
    #[serde(default = "default_in_flight_capacity")]
    pub in_flight_capacity: usize,
    #[serde(default = "default_large_transfer_bytes")]
    pub large_upload_bytes: u64,
    #[serde(default = "default_large_transfer_bytes")]
    pub large_download_bytes: u64,
    #[serde(default = "default_repeated_resource_min_bytes")]
    pub repeated_resource_min_bytes: u64,
    #[serde(default = "default_high_frequency_api_threshold")]
    pub high_frequency_api_threshold: u64,
    #[serde(default = "default_repeated_resource_threshold")]
    pub repeated_resource_threshold: u64,
    #[serde(default = "default_large_response_alert_bytes")]
    pub large_response_alert_bytes: u64,
    #[serde(default = "default_max_frames_per_level")]
    pub max_frames_per_level: usize,
    #[serde(default = "default_max_async_levels")]
    pub max_async_levels: usize,
    #[serde(default = "default_max_function_name_chars")]
    pub max_function_name_chars: usize,
    #[serde(default = "default_max_url_chars")]
    pub max_url_chars: usize,
}

fn default_stack_cache_capacity() -> usize {
    300
}

fn default_in_flight_capacity() -> usize {
    2000
}

fn default_large_transfer_bytes() -> u64 {
    100 * 1024
}

fn default_repeated_resource_min_bytes() -> u64 {
    10 * 1024
}

fn default_high_frequency_api_threshold() -> u64 {
    10
}

fn default_repeated_resource_threshold() -> u64 {
    3
}

fn default_large_response_alert_bytes() -> u64 {
    1024 * 1024
}

fn default_max_frames_per_level() -> usize {
    30
}

fn default_max_async_levels() -> usize {
    15
}

fn default_max_function_name_chars() -> usize {
    150
}

fn default_max_url_chars() -> usize {
    300
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            stack_cache_capacity: default_stack_cache_capacity(),
            in_flight_capacity: default_in_flight_capacity(),
            large_upload_bytes: default_large_transfer_bytes(),
            large_download_bytes: default_large_transfer_bytes(),
            repeated_resource_min_bytes: default_repeated_resource_min_bytes(),
            high_frequency_api_threshold: default_high_frequency_api_threshold(),
            repeated_resource_threshold: default_repeated_resource_threshold(),
            large_response_alert_bytes: default_large_response_alert_bytes(),
            max_frames_per_level: default_max_frames_per_level(),
            max_async_levels: default_max_async_levels(),
            max_function_name_chars: default_max_function_name_chars(),
            max_url_chars: default_max_url_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
    #[serde(default = "default_max_reported")]
    pub max_reported: usize,
}

fn default_window_size() -> usize {
    20
}

fn default_window_seconds() -> f64 {
    15.0
}

fn default_max_reported() -> usize {
    2
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_seconds: default_window_seconds(),
            max_reported: default_max_reported(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfig {
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    /// Fraction of used heap that must disappear between two samples before a
    /// `gc` event is emitted.
    #[serde(default = "default_gc_drop_ratio")]
    pub gc_drop_ratio: f64,
}

fn default_sample_interval_secs() -> u64 {
    5
}

fn default_gc_drop_ratio() -> f64 {
    0.1
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            gc_drop_ratio: default_gc_drop_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    2
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub chrome: ChromeConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would make the bounded caches unbounded or empty.
    pub fn validate(&self) -> Result<()> {
        if self.network.stack_cache_capacity == 0 {
            return Err(Error::Config("network.stackCacheCapacity must be > 0".into()));
        }
        if self.network.in_flight_capacity == 0 {
            return Err(Error::Config("network.inFlightCapacity must be > 0".into()));
        }
        if self.correlation.window_size == 0 {
            return Err(Error::Config("correlation.windowSize must be > 0".into()));
        }
        if self.correlation.window_seconds.is_nan() || self.correlation.window_seconds <= 0.0 {
            return Err(Error::Config("correlation.windowSeconds must be > 0".into()));
        }
        if self.queue.capacity == 0 {
            return Err(Error::Config("queue.capacity must be > 0".into()));
        }
        Ok(())
    }

    pub fn records_dir(&self, paths: &Paths) -> PathBuf {
        match self.output.dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => paths.records_dir(),
        }
    }

    pub fn devtools_base_url(&self) -> String {
        format!("http://{}:{}", self.chrome.host, self.chrome.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_documented_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.network.stack_cache_capacity, 300);
        assert_eq!(cfg.network.large_upload_bytes, 102_400);
        assert_eq!(cfg.network.large_download_bytes, 102_400);
        assert_eq!(cfg.network.repeated_resource_min_bytes, 10_240);
        assert_eq!(cfg.network.high_frequency_api_threshold, 10);
        assert_eq!(cfg.network.repeated_resource_threshold, 3);
        assert_eq!(cfg.correlation.window_size, 20);
        assert_eq!(cfg.correlation.window_seconds, 15.0);
        assert_eq!(cfg.correlation.max_reported, 2);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let raw = r#"{ "chrome": { "port": 9333 }, "network": { "stackCacheCapacity": 50 } }"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.chrome.port, 9333);
        assert_eq!(cfg.chrome.host, "127.0.0.1");
        assert_eq!(cfg.network.stack_cache_capacity, 50);
        assert_eq!(cfg.network.max_async_levels, 15);
        assert_eq!(cfg.devtools_base_url(), "http://127.0.0.1:9333");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let mut cfg = Config::default();
        cfg.output.dir = Some("/var/tmp/records".into());
        cfg.save(&paths.config_file()).unwrap();

        let loaded = Config::load_or_default(&paths).unwrap();
        assert_eq!(loaded.records_dir(&paths), PathBuf::from("/var/tmp/records"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "correlation": { "windowSize": 0 } }"#).unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_records_dir_default() {
        let paths = Paths::with_base(PathBuf::from("/tmp/ts"));
        let cfg = Config::default();
        assert_eq!(cfg.records_dir(&paths), PathBuf::from("/tmp/ts/records"));
    }
}
