//! Training analytics core: training stress, fitness/fatigue timelines,
//! race-time prediction and injury-risk assessment for endurance athletes.
//!
//! The four entry points below run with the default (pinned) constants.
//! Use [`Analyzer::from_config`] to run the same pipeline with an
//! [`AppConfig`] loaded from TOML.

pub mod analyzer;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod fitness;
pub mod import;
pub mod injury;
pub mod logging;
pub mod models;
pub mod periodization;
pub mod pmc;
pub mod prediction;
pub mod tss;

// Re-export commonly used types for convenience
pub use analyzer::{Analyzer, DEFAULT_WEEKS_TO_RACE};
pub use batch::{AthleteInput, AthleteReport, BatchConfig, BatchProcessor, BatchSummary};
pub use cache::{CacheConfig, Fingerprint, PredictionCache};
pub use config::AppConfig;
pub use error::{PacelineError, Result};
pub use fitness::{FitnessSnapshot, FitnessSnapshotBuilder};
pub use injury::{
    InjuryRiskAssessment, InjuryRiskAssessor, PredictionMethod, PreventionPlan, RiskLevel,
    RiskScorer,
};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use models::*;
pub use periodization::{PeriodizationModel, PeriodizedPrediction};
pub use pmc::{PmcCalculator, TrainingLoadSummary};
pub use prediction::{Methodology, RacePrediction, RacePredictor};
pub use tss::{TssCalculator, TssMethod, TssResult};

use chrono::NaiveDate;
use error::{LoadError, PredictionError};

/// Training stress score of one activity, 0 when distance or duration is missing
pub fn compute_tss(activity: &ActivityRecord, athlete: &AthleteProfile) -> f64 {
    TssCalculator::new().calculate_tss(activity, athlete)
}

/// Fold `(date, tss)` pairs into CTL/ATL/TSB states
///
/// Dates must be strictly increasing; skipped days count as rest days.
pub fn compute_load_timeline(
    daily_tss: &[(NaiveDate, f64)],
) -> std::result::Result<Vec<LoadState>, LoadError> {
    let points: Vec<DailyStressPoint> = daily_tss
        .iter()
        .map(|&(date, tss)| DailyStressPoint::new(date, tss))
        .collect();
    PmcCalculator::new().compute_load_timeline(&points)
}

/// Race-time prediction from recent running, with the race-day projection
/// for `weeks_to_race` (see [`DEFAULT_WEEKS_TO_RACE`]) nested inside
pub fn predict_race_time(
    activities: &[ActivityRecord],
    athlete: &AthleteProfile,
    target_distance_km: f64,
    weeks_to_race: u32,
) -> std::result::Result<RacePrediction, PredictionError> {
    Analyzer::new().predict_race_time(activities, athlete, target_distance_km, weeks_to_race)
}

/// Injury risk over the 30 days ending at the most recent activity
pub fn assess_injury_risk(
    activities: &[ActivityRecord],
    athlete: &AthleteProfile,
) -> InjuryRiskAssessment {
    Analyzer::new().assess_injury_risk(activities, athlete)
}
