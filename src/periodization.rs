use crate::fitness::{FitnessSnapshot, SnapshotMetrics};
use crate::models::{format_duration, format_pace};
use crate::prediction::DistanceFactor;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Athlete classification driving improvement rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AthleteLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl AthleteLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AthleteLevel::Beginner => "beginner",
            AthleteLevel::Intermediate => "intermediate",
            AthleteLevel::Advanced => "advanced",
        }
    }
}

/// Two-step scoring rule: 2 points at `strong`, 1 point at `moderate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelThreshold {
    pub strong: f64,
    pub moderate: f64,
}

impl LevelThreshold {
    fn points_at_least(&self, value: f64) -> u32 {
        if value >= self.strong {
            2
        } else if value >= self.moderate {
            1
        } else {
            0
        }
    }

    fn points_at_most(&self, value: f64) -> u32 {
        if value <= self.strong {
            2
        } else if value <= self.moderate {
            1
        } else {
            0
        }
    }
}

/// Improvement fraction per horizon for one level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementRates {
    pub weekly: f64,
    pub monthly: f64,
    pub seasonal: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub week: f64,
    pub gain: f64,
}

/// Adaptation curve; 0 at week 0, linear between points, flat after the last
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationCurve {
    pub points: Vec<CurvePoint>,
}

impl AdaptationCurve {
    fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        Self {
            points: pairs
                .iter()
                .map(|&(week, gain)| CurvePoint { week, gain })
                .collect(),
        }
    }

    pub fn at(&self, weeks: f64) -> f64 {
        let mut previous = CurvePoint { week: 0.0, gain: 0.0 };
        for point in &self.points {
            if weeks <= point.week {
                let span = point.week - previous.week;
                if span <= 0.0 {
                    return point.gain;
                }
                let weight = (weeks - previous.week).max(0.0) / span;
                return previous.gain + weight * (point.gain - previous.gain);
            }
            previous = point.clone();
        }
        previous.gain
    }
}

/// Share of each energy system for a race distance class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceWeights {
    pub distance_km: f64,
    pub aerobic: f64,
    pub lactate: f64,
    pub vo2: f64,
}

/// Periodization model configuration (empirical, pinned)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodizationConfig {
    pub volume_km: LevelThreshold,
    pub history_activities: LevelThreshold,
    pub longest_run_km: LevelThreshold,
    /// Seconds per km, lower is better
    pub pace: LevelThreshold,
    pub advanced_score: u32,
    pub intermediate_score: u32,

    pub beginner_rates: ImprovementRates,
    pub intermediate_rates: ImprovementRates,
    pub advanced_rates: ImprovementRates,

    pub consistency_cap: f64,
    /// Requested improvement is capped at this multiple of the computed potential
    pub target_improvement_cap: f64,

    pub aerobic_curve: AdaptationCurve,
    pub lactate_curve: AdaptationCurve,
    pub vo2_curve: AdaptationCurve,
    pub beginner_multiplier: f64,
    pub intermediate_multiplier: f64,
    pub advanced_multiplier: f64,
    pub race_weights: Vec<RaceWeights>,
    /// Fraction of total adaptation applied to threshold pace
    pub adaptation_application: f64,

    /// Threshold-to-race pace multipliers by upper distance bound (km), ascending
    pub race_pace_multipliers: Vec<DistanceFactor>,
    pub long_race_pace_multiplier: f64,

    pub full_quality_activities: f64,
    pub confidence_cap: f64,
    pub milestone_weeks: Vec<u32>,

    /// Fallback paces in seconds per km by upper distance bound (km)
    pub fallback_paces: Vec<DistanceFactor>,
    pub fallback_long_pace: f64,
    pub fallback_weekly_gain: f64,
    pub fallback_max_gain: f64,
    pub fallback_confidence: f64,
}

impl Default for PeriodizationConfig {
    fn default() -> Self {
        let bounds = |pairs: &[(f64, f64)]| -> Vec<DistanceFactor> {
            pairs
                .iter()
                .map(|&(distance_km, factor)| DistanceFactor { distance_km, factor })
                .collect()
        };
        let weights = |distance_km, aerobic, lactate, vo2| RaceWeights {
            distance_km,
            aerobic,
            lactate,
            vo2,
        };

        Self {
            volume_km: LevelThreshold { strong: 50.0, moderate: 30.0 },
            history_activities: LevelThreshold { strong: 100.0, moderate: 50.0 },
            longest_run_km: LevelThreshold { strong: 20.0, moderate: 15.0 },
            pace: LevelThreshold { strong: 270.0, moderate: 330.0 },
            advanced_score: 5,
            intermediate_score: 2,
            beginner_rates: ImprovementRates { weekly: 0.008, monthly: 0.03, seasonal: 0.12 },
            intermediate_rates: ImprovementRates { weekly: 0.005, monthly: 0.02, seasonal: 0.08 },
            advanced_rates: ImprovementRates { weekly: 0.003, monthly: 0.01, seasonal: 0.04 },
            consistency_cap: 1.2,
            target_improvement_cap: 1.5,
            aerobic_curve: AdaptationCurve::from_pairs(&[
                (4.0, 0.03),
                (8.0, 0.07),
                (12.0, 0.10),
                (16.0, 0.13),
                (20.0, 0.15),
            ]),
            lactate_curve: AdaptationCurve::from_pairs(&[
                (2.0, 0.02),
                (4.0, 0.05),
                (6.0, 0.07),
                (8.0, 0.09),
                (12.0, 0.11),
            ]),
            vo2_curve: AdaptationCurve::from_pairs(&[
                (1.0, 0.01),
                (2.0, 0.03),
                (4.0, 0.05),
                (6.0, 0.06),
                (8.0, 0.07),
            ]),
            beginner_multiplier: 1.2,
            intermediate_multiplier: 1.0,
            advanced_multiplier: 0.8,
            race_weights: vec![
                weights(5.0, 0.15, 0.35, 0.50),
                weights(10.0, 0.25, 0.55, 0.20),
                weights(21.0975, 0.60, 0.35, 0.05),
                weights(42.195, 0.80, 0.18, 0.02),
            ],
            adaptation_application: 0.5,
            race_pace_multipliers: bounds(&[(5.0, 0.95), (10.0, 0.98), (21.1, 1.05)]),
            long_race_pace_multiplier: 1.15,
            full_quality_activities: 20.0,
            confidence_cap: 0.85,
            milestone_weeks: vec![4, 8, 12, 16, 20],
            fallback_paces: bounds(&[(5.0, 390.0), (10.0, 420.0), (21.1, 450.0)]),
            fallback_long_pace: 480.0,
            fallback_weekly_gain: 0.01,
            fallback_max_gain: 0.2,
            fallback_confidence: 0.3,
        }
    }
}

impl PeriodizationConfig {
    fn rates(&self, level: AthleteLevel) -> &ImprovementRates {
        match level {
            AthleteLevel::Beginner => &self.beginner_rates,
            AthleteLevel::Intermediate => &self.intermediate_rates,
            AthleteLevel::Advanced => &self.advanced_rates,
        }
    }

    fn level_multiplier(&self, level: AthleteLevel) -> f64 {
        match level {
            AthleteLevel::Beginner => self.beginner_multiplier,
            AthleteLevel::Intermediate => self.intermediate_multiplier,
            AthleteLevel::Advanced => self.advanced_multiplier,
        }
    }

    /// Weights of the nearest standard distance class
    fn race_weights_for(&self, distance_km: f64) -> Option<&RaceWeights> {
        self.race_weights.iter().min_by(|a, b| {
            (a.distance_km - distance_km)
                .abs()
                .total_cmp(&(b.distance_km - distance_km).abs())
        })
    }
}

fn by_upper_bound(table: &[DistanceFactor], distance_km: f64, otherwise: f64) -> f64 {
    table
        .iter()
        .find(|entry| distance_km <= entry.distance_km)
        .map_or(otherwise, |entry| entry.factor)
}

/// Improvement fractions and the factors that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImprovementPotential {
    pub base: f64,
    pub adjusted: f64,
    pub final_improvement: f64,
    pub form_factor: f64,
    pub consistency_factor: f64,
}

/// Per-energy-system adaptation gains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingAdaptation {
    pub aerobic: f64,
    pub lactate: f64,
    pub vo2: f64,
    pub total: f64,
}

/// Threshold-pace checkpoint on the way to race day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub week: u32,
    /// Seconds per km
    pub target_threshold_pace: f64,
    /// Percent faster than the current threshold pace
    pub expected_improvement_pct: f64,
    pub fitness_benchmark: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodizationMethod {
    PeriodizedTrainingAnalysis,
    FallbackEstimate,
}

/// Race-day projection after `weeks_to_race` of training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodizedPrediction {
    pub distance_km: f64,
    pub weeks_to_race: u32,
    pub athlete_level: Option<AthleteLevel>,
    pub predicted_time_seconds: f64,
    /// Seconds per km
    pub predicted_pace: f64,
    pub formatted_time: String,
    pub baseline_threshold_pace: Option<f64>,
    pub improved_threshold_pace: Option<f64>,
    pub improvement: Option<ImprovementPotential>,
    pub adaptation: Option<TrainingAdaptation>,
    pub milestones: Vec<Milestone>,
    pub confidence: f64,
    pub methodology: PeriodizationMethod,
    pub note: Option<String>,
}

/// Projects future improvement from current fitness
#[derive(Debug, Clone, Default)]
pub struct PeriodizationModel {
    config: PeriodizationConfig,
}

impl PeriodizationModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PeriodizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PeriodizationConfig {
        &self.config
    }

    /// Weighted score over volume, history, longest run and pace
    pub fn classify(&self, metrics: &SnapshotMetrics) -> (AthleteLevel, u32) {
        let c = &self.config;
        let score = c.volume_km.points_at_least(metrics.weekly_volume_km)
            + c.history_activities.points_at_least(metrics.history_count as f64)
            + c.longest_run_km.points_at_least(metrics.longest_recent_km)
            + c.pace.points_at_most(metrics.current_pace);

        let level = if score >= c.advanced_score {
            AthleteLevel::Advanced
        } else if score >= c.intermediate_score {
            AthleteLevel::Intermediate
        } else {
            AthleteLevel::Beginner
        };
        (level, score)
    }

    /// Improvement fraction achievable in `weeks` for this athlete
    pub fn improvement_potential(
        &self,
        level: AthleteLevel,
        weeks: u32,
        metrics: &SnapshotMetrics,
        target_improvement: Option<f64>,
    ) -> ImprovementPotential {
        let rates = self.config.rates(level);
        let w = weeks as f64;
        let base = if weeks <= 4 {
            rates.weekly * w
        } else if weeks <= 16 {
            rates.monthly * (w / 4.0)
        } else {
            rates.seasonal * (w / 20.0).min(1.5)
        };

        // A collapsing form trend cancels improvement but never projects a slowdown
        let form_factor = (1.0 + metrics.form_trend).max(0.0);
        let consistency_factor = metrics.training_consistency.min(self.config.consistency_cap);
        let adjusted = base * form_factor * consistency_factor;

        let final_improvement = match target_improvement.filter(|t| *t > 0.0) {
            Some(target) => target.min(adjusted * self.config.target_improvement_cap),
            None => adjusted,
        };

        ImprovementPotential {
            base,
            adjusted,
            final_improvement,
            form_factor,
            consistency_factor,
        }
    }

    /// Energy-system adaptation weighted for the race distance and level
    pub fn training_adaptation(
        &self,
        weeks: u32,
        level: AthleteLevel,
        distance_km: f64,
    ) -> TrainingAdaptation {
        let w = weeks as f64;
        let multiplier = self.config.level_multiplier(level);
        let (aerobic_weight, lactate_weight, vo2_weight) = self
            .config
            .race_weights_for(distance_km)
            .map_or((1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0), |rw| (rw.aerobic, rw.lactate, rw.vo2));

        let aerobic = self.config.aerobic_curve.at(w) * multiplier * aerobic_weight;
        let lactate = self.config.lactate_curve.at(w) * multiplier * lactate_weight;
        let vo2 = self.config.vo2_curve.at(w) * multiplier * vo2_weight;

        TrainingAdaptation {
            aerobic,
            lactate,
            vo2,
            total: aerobic + lactate + vo2,
        }
    }

    /// Project race-day performance after `weeks_to_race` of training
    pub fn project(
        &self,
        snapshot: &FitnessSnapshot,
        distance_km: f64,
        weeks_to_race: u32,
        target_improvement: Option<f64>,
    ) -> PeriodizedPrediction {
        let Some(metrics) = snapshot.metrics() else {
            warn!(distance_km, weeks_to_race, "Invalid fitness snapshot, using periodization fallback");
            return self.fallback(distance_km, weeks_to_race);
        };

        let (level, score) = self.classify(metrics);
        let improvement =
            self.improvement_potential(level, weeks_to_race, metrics, target_improvement);
        let adaptation = self.training_adaptation(weeks_to_race, level, distance_km);
        debug!(level = level.as_str(), score, ?improvement, ?adaptation, "Periodization inputs");

        let baseline = metrics.threshold_pace;
        let improved_threshold = baseline
            * (1.0 - improvement.final_improvement)
            * (1.0 - self.config.adaptation_application * adaptation.total);

        let race_pace = improved_threshold
            * by_upper_bound(
                &self.config.race_pace_multipliers,
                distance_km,
                self.config.long_race_pace_multiplier,
            );
        let time = race_pace * distance_km;

        let confidence = (metrics.activity_count as f64 / self.config.full_quality_activities)
            .min(improvement.consistency_factor)
            .min(1.0)
            * self.config.confidence_cap;

        PeriodizedPrediction {
            distance_km,
            weeks_to_race,
            athlete_level: Some(level),
            predicted_time_seconds: time,
            predicted_pace: race_pace,
            formatted_time: format_duration(time),
            baseline_threshold_pace: Some(baseline),
            improved_threshold_pace: Some(improved_threshold),
            improvement: Some(improvement),
            adaptation: Some(adaptation),
            milestones: self.milestones(baseline, improved_threshold, weeks_to_race),
            confidence: confidence.clamp(0.0, 1.0),
            methodology: PeriodizationMethod::PeriodizedTrainingAnalysis,
            note: None,
        }
    }

    /// Linear interpolation from current to target threshold pace at fixed checkpoints
    pub fn milestones(&self, current: f64, target: f64, weeks_to_race: u32) -> Vec<Milestone> {
        self.config
            .milestone_weeks
            .iter()
            .filter(|week| **week <= weeks_to_race)
            .map(|&week| {
                let progress = week as f64 / weeks_to_race as f64;
                let pace = current - (current - target) * progress;
                Milestone {
                    week,
                    target_threshold_pace: pace,
                    expected_improvement_pct: (current - pace) / current * 100.0,
                    fitness_benchmark: format!("Sustain {}/km for 20-30 minutes", format_pace(pace)),
                }
            })
            .collect()
    }

    pub fn fallback(&self, distance_km: f64, weeks_to_race: u32) -> PeriodizedPrediction {
        let base_pace = by_upper_bound(
            &self.config.fallback_paces,
            distance_km,
            self.config.fallback_long_pace,
        );
        let gain = (self.config.fallback_weekly_gain * weeks_to_race as f64)
            .min(self.config.fallback_max_gain);
        let pace = base_pace * (1.0 - gain);
        let time = pace * distance_km;

        PeriodizedPrediction {
            distance_km,
            weeks_to_race,
            athlete_level: None,
            predicted_time_seconds: time,
            predicted_pace: pace,
            formatted_time: format_duration(time),
            baseline_threshold_pace: None,
            improved_threshold_pace: None,
            improvement: None,
            adaptation: None,
            milestones: Vec::new(),
            confidence: self.config.fallback_confidence,
            methodology: PeriodizationMethod::FallbackEstimate,
            note: Some(
                "Prediction based on limited data - more training history needed for accuracy"
                    .to_string(),
            ),
        }
    }
}
