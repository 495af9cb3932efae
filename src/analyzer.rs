use crate::cache::PredictionCache;
use crate::config::AppConfig;
use crate::error::{LoadError, PredictionError};
use crate::fitness::{FitnessSnapshot, FitnessSnapshotBuilder};
use crate::injury::{InjuryRiskAssessment, InjuryRiskAssessor};
use crate::models::{ActivityRecord, AthleteProfile, DailyStressPoint, LoadState};
use crate::periodization::PeriodizationModel;
use crate::pmc::{PmcCalculator, TrainingLoadSummary};
use crate::prediction::{RacePrediction, RacePredictor};
use crate::tss::TssCalculator;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, instrument};

/// Weeks of training assumed before race day when the caller gives none
pub const DEFAULT_WEEKS_TO_RACE: u32 = 12;

/// Per-athlete pipeline: TSS, load timeline, snapshot, prediction and risk
///
/// Holds only configuration, so one instance can be shared across threads.
pub struct Analyzer {
    tss: TssCalculator,
    pmc: PmcCalculator,
    snapshot: FitnessSnapshotBuilder,
    predictor: RacePredictor,
    periodization: PeriodizationModel,
    risk: InjuryRiskAssessor,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            tss: TssCalculator::new(),
            pmc: PmcCalculator::new(),
            snapshot: FitnessSnapshotBuilder::new(),
            predictor: RacePredictor::new(),
            periodization: PeriodizationModel::new(),
            risk: InjuryRiskAssessor::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tss: TssCalculator::with_config(config.tss.clone()),
            pmc: PmcCalculator::with_config(config.load.clone()),
            snapshot: FitnessSnapshotBuilder::with_config(config.snapshot.clone()),
            predictor: RacePredictor::with_config(config.predictor.clone()),
            periodization: PeriodizationModel::with_config(config.periodization.clone()),
            risk: InjuryRiskAssessor::from_config(&config.risk),
        }
    }

    pub fn tss_calculator(&self) -> &TssCalculator {
        &self.tss
    }

    pub fn pmc_calculator(&self) -> &PmcCalculator {
        &self.pmc
    }

    pub fn compute_tss(&self, activity: &ActivityRecord, athlete: &AthleteProfile) -> f64 {
        self.tss.calculate_tss(activity, athlete)
    }

    /// One point per day from the first to the last activity
    pub fn daily_stress(
        &self,
        activities: &[ActivityRecord],
        athlete: &AthleteProfile,
    ) -> Result<Vec<DailyStressPoint>, LoadError> {
        match date_span(activities) {
            Some((start, end)) => {
                self.pmc
                    .aggregate_daily_tss(activities, athlete, &self.tss, start, end)
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn load_timeline(
        &self,
        activities: &[ActivityRecord],
        athlete: &AthleteProfile,
    ) -> Result<Vec<LoadState>, LoadError> {
        let daily = self.daily_stress(activities, athlete)?;
        self.pmc.compute_load_timeline(&daily)
    }

    /// Timeline over the whole history with trends and recommendations
    pub fn training_load_summary(
        &self,
        activities: &[ActivityRecord],
        athlete: &AthleteProfile,
    ) -> Result<Option<TrainingLoadSummary>, LoadError> {
        let Some((start, end)) = date_span(activities) else {
            return Ok(None);
        };
        let days_back = (end - start).num_days().max(0) as u32;
        self.pmc
            .summarize(activities, athlete, &self.tss, end, days_back)
            .map(Some)
    }

    pub fn snapshot(&self, activities: &[ActivityRecord], as_of: Option<NaiveDate>) -> FitnessSnapshot {
        self.snapshot.build(activities, as_of)
    }

    /// Current-fitness prediction with the race-day projection nested in it
    ///
    /// `weeks_to_race == 0` skips the projection.
    #[instrument(skip(self, activities, athlete), fields(athlete = ?athlete.id))]
    pub fn predict_race_time(
        &self,
        activities: &[ActivityRecord],
        athlete: &AthleteProfile,
        target_distance_km: f64,
        weeks_to_race: u32,
    ) -> Result<RacePrediction, PredictionError> {
        let snapshot = self.snapshot.build(activities, None);
        let prediction = self.predictor.predict(&snapshot, target_distance_km)?;
        Ok(self.attach_projection(prediction, &snapshot, target_distance_km, weeks_to_race))
    }

    /// [`Analyzer::predict_race_time`] memoized on the snapshot fingerprint
    pub fn predict_race_time_cached(
        &self,
        activities: &[ActivityRecord],
        target_distance_km: f64,
        weeks_to_race: u32,
        cache: &PredictionCache<RacePrediction>,
        now: DateTime<Utc>,
    ) -> Result<RacePrediction, PredictionError> {
        let snapshot = self.snapshot.build(activities, None);
        let prediction = self
            .predictor
            .predict_cached(&snapshot, target_distance_km, cache, now)?;
        Ok(self.attach_projection(prediction, &snapshot, target_distance_km, weeks_to_race))
    }

    fn attach_projection(
        &self,
        mut prediction: RacePrediction,
        snapshot: &FitnessSnapshot,
        target_distance_km: f64,
        weeks_to_race: u32,
    ) -> RacePrediction {
        if weeks_to_race > 0 {
            let projection =
                self.periodization
                    .project(snapshot, target_distance_km, weeks_to_race, None);
            debug!(
                weeks_to_race,
                projected_time = projection.predicted_time_seconds,
                "Attached race-day projection"
            );
            prediction.race_day_projection = Some(Box::new(projection));
        }
        prediction
    }

    pub fn assess_injury_risk(
        &self,
        activities: &[ActivityRecord],
        athlete: &AthleteProfile,
    ) -> InjuryRiskAssessment {
        self.risk.assess(activities, athlete, None)
    }

    pub fn assess_injury_risk_cached(
        &self,
        activities: &[ActivityRecord],
        athlete: &AthleteProfile,
        cache: &PredictionCache<InjuryRiskAssessment>,
        now: DateTime<Utc>,
    ) -> InjuryRiskAssessment {
        self.risk.assess_cached(activities, athlete, None, cache, now)
    }
}

fn date_span(activities: &[ActivityRecord]) -> Option<(NaiveDate, NaiveDate)> {
    let start = activities.iter().map(|a| a.date()).min()?;
    let end = activities.iter().map(|a| a.date()).max()?;
    Some((start, end))
}
