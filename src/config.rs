use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Alarm persister configuration
    #[serde(default)]
    #[validate(nested)]
    pub persister: PersisterConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ALARMD_CONFIG_PATH")
            .unwrap_or_else(|_| "config/alarmd.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load configuration, overriding the defaults with the file at `path` if it exists
    pub fn load_from(path: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(path).required(false))
            // Override with environment variables (prefix: ALARMD_)
            .add_source(
                config::Environment::with_prefix("ALARMD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Serialization(format!("Failed to render configuration: {}", e)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            persister: PersisterConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PersisterConfig {
    /// Expected number of concurrent workers feeding the persister
    #[serde(default = "default_worker_threads")]
    #[validate(range(min = 1, max = 1024))]
    pub worker_threads: usize,

    /// Lock stripes allocated per worker
    #[serde(default = "default_stripes_per_worker")]
    #[validate(range(min = 1, max = 64))]
    pub stripes_per_worker: usize,

    /// Archive a cleared alarm and start a fresh one when the problem returns
    #[serde(default)]
    pub create_new_if_cleared: bool,

    /// Legacy alarm state: reduction key only, never archive
    #[serde(default)]
    pub legacy_alarm_state: bool,

    /// Parameter name prefix marking situation membership
    #[serde(default = "default_related_prefix")]
    #[validate(length(min = 1))]
    pub related_reduction_key_prefix: String,

    /// Depth bound for the situation cycle search
    #[serde(default = "default_max_situation_depth")]
    #[validate(range(min = 1))]
    pub max_situation_depth: usize,

    /// Warn when a lock acquisition takes longer than this (0 disables)
    #[serde(default = "default_lock_wait_warn_ms")]
    pub lock_wait_warn_ms: u64,
}

impl PersisterConfig {
    /// Total number of lock stripes
    pub fn stripe_count(&self) -> usize {
        self.worker_threads.saturating_mul(self.stripes_per_worker)
    }

    /// Whether cleared alarms are archived on re-trigger.
    ///
    /// Legacy alarm state always wins over `create_new_if_cleared`.
    pub fn effective_create_new_if_cleared(&self) -> bool {
        !self.legacy_alarm_state && self.create_new_if_cleared
    }
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            stripes_per_worker: default_stripes_per_worker(),
            create_new_if_cleared: false,
            legacy_alarm_state: false,
            related_reduction_key_prefix: default_related_prefix(),
            max_situation_depth: default_max_situation_depth(),
            lock_wait_warn_ms: default_lock_wait_warn_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

// Default value functions
fn default_worker_threads() -> usize {
    4
}

fn default_stripes_per_worker() -> usize {
    4
}

fn default_related_prefix() -> String {
    "related-reductionKey".to_string()
}

fn default_max_situation_depth() -> usize {
    64
}

fn default_lock_wait_warn_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.persister.stripe_count(), 16);
        assert!(!config.persister.create_new_if_cleared);
        assert_eq!(
            config.persister.related_reduction_key_prefix,
            "related-reductionKey"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_legacy_state_disables_new_if_cleared() {
        let config = PersisterConfig {
            create_new_if_cleared: true,
            legacy_alarm_state: true,
            ..Default::default()
        };
        assert!(!config.effective_create_new_if_cleared());

        let config = PersisterConfig {
            create_new_if_cleared: true,
            ..Default::default()
        };
        assert!(config.effective_create_new_if_cleared());
    }

    #[test]
    fn test_invalid_worker_threads_rejected() {
        let config = Config {
            persister: PersisterConfig {
                worker_threads: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_stripe_settings_rejected() {
        let config = PersisterConfig {
            worker_threads: usize::MAX,
            stripes_per_worker: usize::MAX,
            ..Default::default()
        };
        assert_eq!(config.stripe_count(), usize::MAX);
        assert!(config.validate().is_err());

        let config = PersisterConfig {
            worker_threads: 1024,
            stripes_per_worker: 64,
            ..Default::default()
        };
        assert_eq!(config.stripe_count(), 65536);
        assert!(config.validate().is_ok());

        let config = PersisterConfig {
            stripes_per_worker: 65,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[persister]\nworker_threads = 8\ncreate_new_if_cleared = true\n"
        )
        .unwrap();

        let config = Config::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.persister.worker_threads, 8);
        assert_eq!(config.persister.stripes_per_worker, 4);
        assert!(config.persister.create_new_if_cleared);
    }

    #[test]
    fn test_rendered_config_loads_back() {
        let mut config = Config::default();
        config.persister.max_situation_depth = 7;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", config.to_toml_string().unwrap()).unwrap();

        let loaded = Config::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(loaded.persister.max_situation_depth, 7);
    }

    #[test]
    fn test_load_without_file_uses_embedded_defaults() {
        let config = Config::load_from("does/not/exist/alarmd").unwrap();
        assert_eq!(config.persister.worker_threads, 4);
        assert_eq!(config.observability.log_level, "info");
    }
}
