//! Parallel per-athlete processing using rayon
//!
//! Each athlete's full pipeline (load timeline, race prediction, injury risk)
//! runs as one independent work item. The timeline fold itself stays
//! sequential inside its item; only athletes are spread across threads.

use crate::analyzer::{Analyzer, DEFAULT_WEEKS_TO_RACE};
use crate::error::PacelineError;
use crate::injury::InjuryRiskAssessment;
use crate::models::{ActivityRecord, AthleteProfile, LoadState};
use crate::pmc::LoadTrends;
use crate::prediction::RacePrediction;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Batch run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads; rayon's default (one per CPU) when unset
    pub num_threads: Option<usize>,
    /// Show progress bar while processing
    pub show_progress: bool,
    pub target_distance_km: f64,
    pub weeks_to_race: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            show_progress: true,
            target_distance_km: 10.0,
            weeks_to_race: DEFAULT_WEEKS_TO_RACE,
        }
    }
}

/// One athlete's inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteInput {
    #[serde(default)]
    pub profile: AthleteProfile,
    pub activities: Vec<ActivityRecord>,
}

/// One athlete's outputs; a failed stage leaves its field empty and records why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AthleteReport {
    pub athlete_id: Option<String>,
    pub activity_count: usize,
    pub current_load: Option<LoadState>,
    pub trends: Option<LoadTrends>,
    pub prediction: Option<RacePrediction>,
    pub risk: InjuryRiskAssessment,
    pub errors: Vec<String>,
    pub duration_ms: u128,
}

impl AthleteReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Summary of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total_athletes: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_duration_ms: u128,
    /// In input order
    pub reports: Vec<AthleteReport>,
}

impl BatchSummary {
    /// Athletes processed per second
    pub fn throughput(&self) -> f64 {
        if self.total_duration_ms == 0 {
            return 0.0;
        }
        (self.total_athletes as f64 / self.total_duration_ms as f64) * 1000.0
    }

    pub fn is_fully_successful(&self) -> bool {
        self.failed == 0
    }
}

/// Runs the per-athlete pipeline over many athletes
pub struct BatchProcessor {
    config: BatchConfig,
    analyzer: Analyzer,
}

impl BatchProcessor {
    pub fn new(analyzer: Analyzer) -> Self {
        Self::with_config(analyzer, BatchConfig::default())
    }

    pub fn with_config(analyzer: Analyzer, config: BatchConfig) -> Self {
        Self { config, analyzer }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process every athlete, on a dedicated pool when a thread count is configured
    pub fn process(&self, athletes: &[AthleteInput]) -> Result<BatchSummary> {
        let start = Instant::now();
        info!(athletes = athletes.len(), "Starting batch run");

        let progress = self.config.show_progress.then(|| {
            let pb = ProgressBar::new(athletes.len() as u64);
            if let Ok(style) =
                ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({msg})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        });

        let reports = match self.config.num_threads {
            Some(num_threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build()
                    .map_err(|e| {
                        PacelineError::Internal(format!("Failed to create thread pool: {}", e))
                    })?;
                pool.install(|| self.process_parallel(athletes, progress.as_ref()))
            }
            None => self.process_parallel(athletes, progress.as_ref()),
        };

        if let Some(pb) = progress {
            pb.finish_with_message("Complete");
        }

        let successful = reports.iter().filter(|r| r.is_success()).count();
        let summary = BatchSummary {
            total_athletes: reports.len(),
            successful,
            failed: reports.len() - successful,
            total_duration_ms: start.elapsed().as_millis(),
            reports,
        };

        info!(
            successful = summary.successful,
            failed = summary.failed,
            duration_ms = summary.total_duration_ms as u64,
            "Batch run complete"
        );
        Ok(summary)
    }

    fn process_parallel(
        &self,
        athletes: &[AthleteInput],
        progress: Option<&ProgressBar>,
    ) -> Vec<AthleteReport> {
        athletes
            .par_iter()
            .map(|athlete| {
                let report = self.process_athlete(athlete);
                if let Some(pb) = progress {
                    pb.inc(1);
                    pb.set_message(report.athlete_id.clone().unwrap_or_default());
                }
                report
            })
            .collect()
    }

    /// Full pipeline for one athlete; stage failures never abort the others
    pub fn process_athlete(&self, athlete: &AthleteInput) -> AthleteReport {
        let start = Instant::now();
        let mut errors = Vec::new();
        let profile = &athlete.profile;

        let (current_load, trends) = match self
            .analyzer
            .training_load_summary(&athlete.activities, profile)
        {
            Ok(Some(summary)) => (summary.current, summary.trends),
            Ok(None) => (None, None),
            Err(e) => {
                warn!(athlete = ?profile.id, error = %e, "Load timeline failed");
                errors.push(format!("load timeline: {}", e));
                (None, None)
            }
        };

        let prediction = match self.analyzer.predict_race_time(
            &athlete.activities,
            profile,
            self.config.target_distance_km,
            self.config.weeks_to_race,
        ) {
            Ok(prediction) => Some(prediction),
            Err(e) => {
                warn!(athlete = ?profile.id, error = %e, "Race prediction failed");
                errors.push(format!("race prediction: {}", e));
                None
            }
        };

        AthleteReport {
            athlete_id: profile.id.clone(),
            activity_count: athlete.activities.len(),
            current_load,
            trends,
            prediction,
            risk: self.analyzer.assess_injury_risk(&athlete.activities, profile),
            errors,
            duration_ms: start.elapsed().as_millis(),
        }
    }
}
