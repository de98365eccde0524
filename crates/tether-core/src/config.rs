//! Centralized configuration for Tether.
//!
//! Constant groups hold the built-in defaults; [`TetherSettings`] is the
//! serde-loadable form used by front ends that read settings from a file.

use crate::cache::CacheConfig;
use crate::error::{Result, TetherError};
use crate::network::{CircuitBreakerConfig, ConnectivityConfig, RetryPolicy};
use crate::queue::QueueConfig;
use crate::store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Network-related defaults.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const TIMEOUT_EXCELLENT: Duration = Duration::from_secs(10);
    pub const TIMEOUT_GOOD: Duration = Duration::from_secs(20);
    pub const TIMEOUT_FAIR: Duration = Duration::from_secs(30);
    pub const TIMEOUT_POOR: Duration = Duration::from_secs(45);
    /// Fast-fail budget while the device reports itself offline.
    pub const TIMEOUT_OFFLINE: Duration = Duration::from_secs(5);

    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(1000);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

    pub const CIRCUIT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_BREAKER_SUCCESS_THRESHOLD: u32 = 2;
    pub const CIRCUIT_BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const OFFLINE_RECHECK_INTERVAL: Duration = Duration::from_secs(30);
    pub const ONLINE_VERIFY_INTERVAL: Duration = Duration::from_secs(300);

    pub const USER_AGENT: &'static str = "Tether/0.1";
}

/// Response cache defaults.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const TTL: Duration = Duration::from_secs(86_400);
    /// Usage fraction of quota above which eviction runs.
    pub const EVICTION_THRESHOLD: f64 = 0.9;
    /// Fraction of entries removed per eviction pass.
    pub const EVICTION_FRACTION: f64 = 0.1;
}

/// Mutation queue defaults.
pub struct QueueDefaults;

impl QueueDefaults {
    pub const MAX_RETRIES: u32 = 5;
    pub const EVENT_CHANNEL_CAPACITY: usize = 64;
}

/// Persistent store defaults.
pub struct StoreDefaults;

impl StoreDefaults {
    /// 50 MB, roughly what a mobile browser grants an origin up front.
    pub const QUOTA_BYTES: u64 = 52_428_800;
    pub const DB_FILE_NAME: &'static str = "tether.sqlite";
    pub const DATA_DIR_NAME: &'static str = "tether";
}

/// File-loadable settings covering every tunable component.
///
/// Durations are expressed in plain milliseconds or seconds so the file
/// stays readable; [`TetherSettings`] converts them into component configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TetherSettings {
    pub quota_bytes: u64,
    pub cache_ttl_secs: u64,
    pub queue_max_retries: u32,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown_secs: u64,
    pub probe_urls: Vec<String>,
}

impl Default for TetherSettings {
    fn default() -> Self {
        Self {
            quota_bytes: StoreDefaults::QUOTA_BYTES,
            cache_ttl_secs: CacheDefaults::TTL.as_secs(),
            queue_max_retries: QueueDefaults::MAX_RETRIES,
            max_retries: NetworkConfig::MAX_RETRIES,
            retry_base_delay_ms: NetworkConfig::RETRY_BASE_DELAY.as_millis() as u64,
            retry_max_delay_ms: NetworkConfig::RETRY_MAX_DELAY.as_millis() as u64,
            failure_threshold: NetworkConfig::CIRCUIT_BREAKER_FAILURE_THRESHOLD,
            success_threshold: NetworkConfig::CIRCUIT_BREAKER_SUCCESS_THRESHOLD,
            cooldown_secs: NetworkConfig::CIRCUIT_BREAKER_COOLDOWN.as_secs(),
            probe_urls: Vec::new(),
        }
    }
}

impl TetherSettings {
    /// Load settings from a JSON file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TetherError::Io {
            message: format!("Failed to read settings file: {}", e),
            path: Some(path.to_path_buf()),
            source: Some(e),
        })?;

        let settings: TetherSettings =
            serde_json::from_str(&contents).map_err(|e| TetherError::Config {
                message: format!("Failed to parse {}: {}", path.display(), e),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(TetherError::Config {
                message: "circuit breaker thresholds must be at least 1".to_string(),
            });
        }
        if self.quota_bytes == 0 {
            return Err(TetherError::Config {
                message: "quota_bytes must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            quota_bytes: self.quota_bytes,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_secs(self.cache_ttl_secs),
            ..CacheConfig::default()
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.queue_max_retries,
            ..QueueConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    pub fn connectivity_config(&self) -> ConnectivityConfig {
        let mut config = ConnectivityConfig::default();
        if !self.probe_urls.is_empty() {
            config.probe_urls = self.probe_urls.clone();
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_ordered() {
        assert!(NetworkConfig::TIMEOUT_EXCELLENT < NetworkConfig::TIMEOUT_GOOD);
        assert!(NetworkConfig::TIMEOUT_GOOD < NetworkConfig::TIMEOUT_FAIR);
        assert!(NetworkConfig::TIMEOUT_FAIR < NetworkConfig::TIMEOUT_POOR);
        assert!(NetworkConfig::TIMEOUT_OFFLINE < NetworkConfig::TIMEOUT_EXCELLENT);
    }

    #[test]
    fn test_partial_settings_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        std::fs::write(&path, r#"{ "cooldown_secs": 10, "queue_max_retries": 2 }"#).unwrap();

        let settings = TetherSettings::load(&path).unwrap();
        assert_eq!(settings.breaker_config().cooldown, Duration::from_secs(10));
        assert_eq!(settings.queue_config().max_retries, 2);
        assert_eq!(settings.quota_bytes, StoreDefaults::QUOTA_BYTES);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = TetherSettings {
            failure_threshold: 0,
            ..TetherSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(TetherError::Config { .. })
        ));
    }
}
