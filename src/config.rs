//! Service configuration.
//!
//! Values come from built-in defaults, then an optional TOML file
//! (`$RIVRFLOW_CONFIG`, else `./rivrflow.toml`), then `RIVRFLOW_*`
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::constants::{
    COMPLETE_TIMEOUT_SECS, DEFAULT_CACHE_MAX_AGE_DAYS, GEOCODE_API_BASE, NWPS_API_BASE,
    OVERVIEW_TIMEOUT_SECS, RETURN_PERIOD_API_BASE, SUPPLEMENTARY_TIMEOUT_SECS, USER_AGENT,
};
use crate::units::FlowUnit;

const ENV_CONFIG_PATH: &str = "RIVRFLOW_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "rivrflow.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub timeouts: TimeoutConfig,
    pub cache: CacheConfig,
    pub units: UnitsConfig,
    pub geocoding: GeocodingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub return_period_url: String,
    pub return_period_api_key: Option<String>,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: NWPS_API_BASE.to_string(),
            return_period_url: RETURN_PERIOD_API_BASE.to_string(),
            return_period_api_key: None,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

/// Timeout tiers, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub overview_secs: f64,
    pub supplementary_secs: f64,
    pub complete_secs: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            overview_secs: OVERVIEW_TIMEOUT_SECS as f64,
            supplementary_secs: SUPPLEMENTARY_TIMEOUT_SECS as f64,
            complete_secs: COMPLETE_TIMEOUT_SECS as f64,
        }
    }
}

impl TimeoutConfig {
    pub fn overview(&self) -> Duration {
        tier(self.overview_secs, OVERVIEW_TIMEOUT_SECS)
    }

    pub fn supplementary(&self) -> Duration {
        tier(self.supplementary_secs, SUPPLEMENTARY_TIMEOUT_SECS)
    }

    pub fn complete(&self) -> Duration {
        tier(self.complete_secs, COMPLETE_TIMEOUT_SECS)
    }

    fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("overview_secs", self.overview_secs),
            ("supplementary_secs", self.supplementary_secs),
            ("complete_secs", self.complete_secs),
        ] {
            if secs.is_nan() || secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                bail!("timeouts.{} must be a positive number of seconds, got {}", name, secs);
            }
        }
        Ok(())
    }
}

/// Out-of-range values fall back to the built-in tier; `Config::validate`
/// rejects them before they get here.
fn tier(secs: f64, default_secs: u64) -> Duration {
    match Duration::try_from_secs_f64(secs) {
        Ok(timeout) if !timeout.is_zero() => timeout,
        _ => Duration::from_secs(default_secs),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory for persisted reach metadata. In-memory only when unset.
    pub dir: Option<PathBuf>,
    pub max_age_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_age_days: DEFAULT_CACHE_MAX_AGE_DAYS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UnitsConfig {
    pub default: FlowUnit,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    pub enabled: bool,
    pub base_url: String,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: GEOCODE_API_BASE.to_string(),
        }
    }
}

impl Config {
    /// Load from the default locations and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot be turned into timeouts or a cache age.
    pub fn validate(&self) -> Result<()> {
        self.timeouts.validate()?;
        if self.cache.max_age_days <= 0
            || chrono::Duration::try_days(self.cache.max_age_days).is_none()
        {
            bail!(
                "cache.max_age_days must be a positive number of days, got {}",
                self.cache.max_age_days
            );
        }
        for (name, url) in [
            ("api.base_url", &self.api.base_url),
            ("api.return_period_url", &self.api.return_period_url),
            ("geocoding.base_url", &self.geocoding.base_url),
        ] {
            reqwest::Url::parse(url).with_context(|| format!("{} is not a valid URL: {}", name, url))?;
        }
        Ok(())
    }

    /// Apply `RIVRFLOW_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RIVRFLOW_API_BASE") {
            self.api.base_url = v;
        }
        if let Some(v) = lookup("RIVRFLOW_RETURN_PERIOD_BASE") {
            self.api.return_period_url = v;
        }
        if let Some(v) = lookup("RIVRFLOW_RETURN_PERIOD_API_KEY") {
            self.api.return_period_api_key = Some(v);
        }
        if let Some(v) = lookup("RIVRFLOW_GEOCODE_BASE") {
            self.geocoding.base_url = v;
        }
        if let Some(v) = lookup("RIVRFLOW_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("RIVRFLOW_FLOW_UNIT") {
            match FlowUnit::parse(&v) {
                Some(unit) => self.units.default = unit,
                None => tracing::warn!("Ignoring invalid RIVRFLOW_FLOW_UNIT '{}'", v),
            }
        }
    }

    pub fn cache_max_age(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.cache.max_age_days)
            .filter(|age| *age > chrono::Duration::zero())
            .unwrap_or_else(|| chrono::Duration::days(DEFAULT_CACHE_MAX_AGE_DAYS))
    }
}
