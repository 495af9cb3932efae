use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::batch::BatchConfig;
use crate::cache::CacheConfig;
use crate::error::{ConfigError, PacelineError};
use crate::fitness::SnapshotConfig;
use crate::injury::RiskConfig;
use crate::logging::LogConfig;
use crate::models::AthleteProfile;
use crate::periodization::PeriodizationConfig;
use crate::pmc::PmcConfig;
use crate::prediction::PredictorConfig;
use crate::tss::TssConfig;

/// Main application configuration
///
/// Every section defaults to the pinned constants, so a config file only
/// needs the values it overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Athlete used when the command line names no profile file
    pub athlete: AthleteProfile,

    /// Training stress score calculation
    pub tss: TssConfig,

    /// CTL/ATL/TSB timeline
    pub load: PmcConfig,

    /// Fitness snapshot window and qualification
    pub snapshot: SnapshotConfig,

    /// Race-time estimators
    pub predictor: PredictorConfig,

    /// Race-day projection
    pub periodization: PeriodizationConfig,

    /// Injury risk features, rules and model artifact
    pub risk: RiskConfig,

    /// Prediction cache
    pub cache: CacheConfig,

    /// Parallel batch runs
    pub batch: BatchConfig,

    pub logging: LogConfig,
}

fn invalid(key: &str, reason: &str) -> PacelineError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Configuration management implementation
impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            PacelineError::from(ConfigError::Read {
                path: path.as_ref().to_path_buf(),
                reason: e.to_string(),
            })
        })?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| PacelineError::from(ConfigError::Parse(e.message().to_string())))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// `~/.paceline/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".paceline")
            .join("config.toml")
    }

    /// Configuration from the default path, or defaults when it is missing or unreadable
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();
        if !config_path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                // Runs before logging is installed
                eprintln!("Ignoring config file {}: {:#}", config_path.display(), e);
                Self::default()
            }
        }
    }

    /// An explicit path must load; otherwise fall back to [`AppConfig::load_or_default`]
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Check cross-field constraints the types cannot express
    pub fn validate(&self) -> crate::error::Result<()> {
        self.tss.validate()?;
        self.load.validate()?;

        if self.snapshot.window_days == 0 {
            return Err(invalid("snapshot.window_days", "must be at least 1"));
        }
        if self.snapshot.min_activities == 0 {
            return Err(invalid("snapshot.min_activities", "must be at least 1"));
        }
        if self.predictor.riegel_exponent.is_nan() || self.predictor.riegel_exponent <= 0.0 {
            return Err(invalid("predictor.riegel_exponent", "must be positive"));
        }
        if self.predictor.vdot_min > self.predictor.vdot_max {
            return Err(invalid("predictor.vdot_min", "must not exceed vdot_max"));
        }
        if !(0.0..=1.0).contains(&self.predictor.fallback_confidence) {
            return Err(invalid("predictor.fallback_confidence", "must be within [0, 1]"));
        }
        let levels = &self.risk.levels;
        if !(levels.moderate < levels.high && levels.high < levels.very_high) {
            return Err(invalid("risk.levels", "breakpoints must be strictly increasing"));
        }
        if self.risk.features.window_days == 0 {
            return Err(invalid("risk.features.window_days", "must be at least 1"));
        }
        if self.cache.ttl_seconds <= 0 {
            return Err(invalid("cache.ttl_seconds", "must be positive"));
        }
        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries", "must be at least 1"));
        }
        if self.batch.num_threads == Some(0) {
            return Err(invalid("batch.num_threads", "must be at least 1 when set"));
        }
        if self.batch.target_distance_km.is_nan() || self.batch.target_distance_km <= 0.0 {
            return Err(invalid("batch.target_distance_km", "must be positive"));
        }
        Ok(())
    }
}
