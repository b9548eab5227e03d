//! Configuration knobs (§6), loaded the way the teacher's
//! `common::utils::config::get_config` loads `AppConfig`: an optional
//! `config.toml` file layered under environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::filter::AggregationType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_aggregation")]
    pub aggregation_default: AggregationType,
    #[serde(default = "default_cache_ttl_patient")]
    pub cache_ttl_patient_secs: u64,
    #[serde(default = "default_cache_ttl_population")]
    pub cache_ttl_population_secs: u64,
    #[serde(default = "default_cohort_min_samples")]
    pub cohort_min_samples: usize,
    #[serde(default = "default_change_fallback_ratio")]
    pub change_fallback_ratio: f64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_aggregation() -> AggregationType {
    AggregationType::MedianIqr
}

fn default_cache_ttl_patient() -> u64 {
    300
}

fn default_cache_ttl_population() -> u64 {
    3600
}

fn default_cohort_min_samples() -> usize {
    8
}

fn default_change_fallback_ratio() -> f64 {
    0.10
}

fn default_read_timeout_ms() -> u64 {
    2_000
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            aggregation_default: default_aggregation(),
            cache_ttl_patient_secs: default_cache_ttl_patient(),
            cache_ttl_population_secs: default_cache_ttl_population(),
            cohort_min_samples: default_cohort_min_samples(),
            change_fallback_ratio: default_change_fallback_ratio(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

/// Loads config.toml (if present) layered under `PRO_CORE_*` environment
/// overrides, falling back to documented defaults for anything absent.
pub fn get_config() -> Result<CoreConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::with_prefix("PRO_CORE").separator("__"))
        .build()?;

    match config.try_deserialize() {
        Ok(cfg) => Ok(cfg),
        Err(ConfigError::NotFound(_)) => Ok(CoreConfig::default()),
        Err(e) => Err(e),
    }
}
