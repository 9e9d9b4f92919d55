//! Engine tuning knobs.
//!
//! Defaults match the field-tested capture settings. Each knob can be overridden
//! from a JSON document or from `PHARMA_GUARD_*` environment variables.

use crate::core_modules::alerts::DEFAULT_ALERT_CAPACITY;
use crate::core_modules::sticker_classifier::{
    DEFAULT_CLUSTER_COUNT, DEFAULT_LOW_SIGNAL_FLOOR, DEFAULT_MAX_ITERATIONS,
};
use crate::core_modules::temperature_policy::DEFAULT_TOLERANCE_CELSIUS;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "PHARMA_GUARD_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("invalid config document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of k-means clusters per classification.
    pub k: usize,
    pub max_iterations: usize,
    /// Pixels drawn from each frame.
    pub sample_count: usize,
    /// Side of the sampled centre square, as a fraction of the shorter frame side.
    pub region_fraction: f64,
    pub low_signal_floor: f32,
    pub tolerance_celsius: f64,
    pub default_route_length: usize,
    pub store_timeout_ms: u64,
    /// Worker lanes of the scan dispatcher.
    pub dispatcher_lanes: usize,
    /// Fixes every random draw of the engine when set.
    pub rng_seed: Option<u64>,
    pub alert_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_CLUSTER_COUNT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            sample_count: 4000,
            region_fraction: 0.5,
            low_signal_floor: DEFAULT_LOW_SIGNAL_FLOOR,
            tolerance_celsius: DEFAULT_TOLERANCE_CELSIUS,
            default_route_length: 5,
            store_timeout_ms: 5_000,
            dispatcher_lanes: num_cpus::get().max(1),
            rng_seed: None,
            alert_capacity: DEFAULT_ALERT_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(document)?)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each
    /// `PHARMA_GUARD_<FIELD>` key. Unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        override_with(&lookup, "K", &mut config.k)?;
        override_with(&lookup, "MAX_ITERATIONS", &mut config.max_iterations)?;
        override_with(&lookup, "SAMPLE_COUNT", &mut config.sample_count)?;
        override_with(&lookup, "REGION_FRACTION", &mut config.region_fraction)?;
        override_with(&lookup, "LOW_SIGNAL_FLOOR", &mut config.low_signal_floor)?;
        override_with(&lookup, "TOLERANCE_CELSIUS", &mut config.tolerance_celsius)?;
        override_with(&lookup, "DEFAULT_ROUTE_LENGTH", &mut config.default_route_length)?;
        override_with(&lookup, "STORE_TIMEOUT_MS", &mut config.store_timeout_ms)?;
        override_with(&lookup, "DISPATCHER_LANES", &mut config.dispatcher_lanes)?;
        override_with(&lookup, "ALERT_CAPACITY", &mut config.alert_capacity)?;

        let seed_key = format!("{ENV_PREFIX}RNG_SEED");
        if let Some(raw) = lookup(&seed_key) {
            config.rng_seed = Some(parse_value(&seed_key, &raw)?);
        }
        Ok(config)
    }
}

fn override_with<F, T>(lookup: &F, field: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let key = format!("{ENV_PREFIX}{field}");
    if let Some(raw) = lookup(&key) {
        *slot = parse_value(&key, &raw)?;
    }
    Ok(())
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_capture_settings() {
        let config = EngineConfig::default();
        assert_eq!(config.k, 5);
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.sample_count, 4000);
        assert_eq!(config.tolerance_celsius, 5.0);
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert!(config.dispatcher_lanes >= 1);
        assert!(config.rng_seed.is_none());
    }

    #[test]
    fn lookup_overrides_selected_fields() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PHARMA_GUARD_K", "3"),
            ("PHARMA_GUARD_TOLERANCE_CELSIUS", " 2.5 "),
            ("PHARMA_GUARD_RNG_SEED", "7"),
        ]);
        let config =
            EngineConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).expect("valid");
        assert_eq!(config.k, 3);
        assert_eq!(config.tolerance_celsius, 2.5);
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.max_iterations, 5);
    }

    #[test]
    fn malformed_values_name_their_key() {
        let err = EngineConfig::from_lookup(|key| {
            (key == "PHARMA_GUARD_SAMPLE_COUNT").then(|| "lots".to_string())
        })
        .expect_err("not a number");
        assert!(err.to_string().contains("PHARMA_GUARD_SAMPLE_COUNT"));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_json(r#"{"k": 4, "rng_seed": 9}"#).expect("valid json");
        assert_eq!(config.k, 4);
        assert_eq!(config.rng_seed, Some(9));
        assert_eq!(config.sample_count, 4000);
        assert!(EngineConfig::from_json("{\"k\": \"many\"}").is_err());
    }
}
