//! Engine configuration.
//!
//! Loaded from a TOML file when present; every field has a default so an
//! absent or empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rank: RankConfig,
    pub forecast: ForecastConfig,
    pub review: ReviewConfig,
}

/// Rank key space tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankConfig {
    /// Keys longer than this mark a column as fragmented.
    #[serde(default = "default_max_key_len")]
    pub max_key_len: usize,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            max_key_len: default_max_key_len(),
        }
    }
}

/// Which velocity statistic seeds the next-sprint forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForecastPolicy {
    Avg,
    Median,
    Last5Avg,
    Last5Median,
}

/// Velocity forecast tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_forecast_policy")]
    pub policy: ForecastPolicy,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            policy: default_forecast_policy(),
        }
    }
}

/// Review workflow tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Used when a review request does not specify a threshold.
    #[serde(default = "default_required_approvals")]
    pub default_required_approvals: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            default_required_approvals: default_required_approvals(),
        }
    }
}

const fn default_max_key_len() -> usize {
    crate::rank::DEFAULT_MAX_KEY_LEN
}

const fn default_forecast_policy() -> ForecastPolicy {
    ForecastPolicy::Last5Median
}

const fn default_required_approvals() -> u32 {
    1
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist.
///
/// # Errors
///
/// Returns [`Error::Validation`] when the file exists but cannot be read
/// or parsed.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let raw = std::fs::read_to_string(path).map_err(|error| {
        Error::Validation(format!("cannot read config {}: {error}", path.display()))
    })?;
    toml::from_str(&raw).map_err(|error| {
        Error::Validation(format!("cannot parse config {}: {error}", path.display()))
    })
}
