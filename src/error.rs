//! Unified error hierarchy for paceline
//!
//! Insufficient data is never an error here: the calculators return tagged
//! low-confidence values instead. These types cover caller bugs, broken model
//! artifacts, and the IO performed by the CLI layer.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all paceline operations
#[derive(Debug, Error)]
pub enum PacelineError {
    /// TSS calculation errors
    #[error("TSS error: {0}")]
    Tss(#[from] TssError),

    /// Load timeline errors
    #[error("Load timeline error: {0}")]
    Load(#[from] LoadError),

    /// Race prediction errors
    #[error("Prediction error: {0}")]
    Prediction(#[from] PredictionError),

    /// Injury risk model errors
    #[error("Risk model error: {0}")]
    RiskModel(#[from] RiskModelError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Import/export errors
    #[error("Import/Export error: {0}")]
    ImportExport(#[from] ImportExportError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// TSS calculation errors
#[derive(Debug, Error)]
pub enum TssError {
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
}

/// Load timeline errors
#[derive(Debug, Error)]
pub enum LoadError {
    /// Daily points were not strictly increasing by date
    #[error("Daily stress points out of order: {previous} followed by {next}")]
    OutOfOrder { previous: NaiveDate, next: NaiveDate },

    /// Aggregation range is inverted
    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    /// Time constant of zero days
    #[error("Time constant must be positive: {name}")]
    InvalidTimeConstant { name: String },
}

/// Race prediction errors
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Invalid target distance: {0} km")]
    InvalidDistance(f64),
}

/// Injury risk model artifact errors
#[derive(Debug, Error)]
pub enum RiskModelError {
    #[error("Model artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    #[error("Model artifact is invalid: {reason}")]
    InvalidArtifact { reason: String },

    #[error("Feature vector has {actual} values, model expects {expected}")]
    FeatureMismatch { expected: usize, actual: usize },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Import and export errors
#[derive(Debug, Error)]
pub enum ImportExportError {
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Parse error in {format}: {reason}")]
    ParseError { format: String, reason: String },

    #[error("Export failed to {path}: {reason}")]
    ExportFailed { path: PathBuf, reason: String },
}

/// Result type alias for paceline operations
pub type Result<T> = std::result::Result<T, PacelineError>;

impl PacelineError {
    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PacelineError::RiskModel(RiskModelError::ArtifactNotFound { .. }) => {
                ErrorSeverity::Warning
            }
            PacelineError::ImportExport(ImportExportError::UnsupportedFormat { .. }) => {
                ErrorSeverity::Warning
            }
            PacelineError::Load(LoadError::OutOfOrder { .. }) => ErrorSeverity::Error,
            PacelineError::Internal(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PacelineError::Load(LoadError::OutOfOrder { previous, next }) => format!(
                "Daily training data must be in date order ({} came after {}).",
                next, previous
            ),
            PacelineError::RiskModel(RiskModelError::ArtifactNotFound { path }) => format!(
                "No trained injury model at {}; using rule-based scoring.",
                path.display()
            ),
            PacelineError::ImportExport(ImportExportError::UnsupportedFormat { format }) => {
                format!("Unsupported activity file format: {}", format)
            }
            PacelineError::Configuration(ConfigError::Read { path, reason }) => {
                format!("Could not read config file {}: {}", path.display(), reason)
            }
            PacelineError::Configuration(ConfigError::Parse(reason)) => {
                format!("Config file is not valid TOML: {}", reason)
            }
            PacelineError::Configuration(ConfigError::InvalidValue { key, reason }) => {
                format!("Config value {} is invalid: {}", key, reason)
            }
            _ => self.to_string(),
        }
    }

    /// First `PacelineError` in an `anyhow` context chain
    pub fn find_in_chain(err: &anyhow::Error) -> Option<&PacelineError> {
        err.chain().find_map(|cause| cause.downcast_ref::<PacelineError>())
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}
