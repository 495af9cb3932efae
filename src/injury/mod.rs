//! Injury risk assessment
//!
//! Training-load features are extracted from a 30-day activity window and
//! scored by a [`RiskScorer`]. Two scorers satisfy the same contract:
//!
//! - [`RuleBasedScorer`]: deterministic base score plus fixed increments
//! - [`TrainedEnsembleScorer`]: blend of logistic, forest and boosting models
//!
//! The scorer is chosen once at construction. Callers only see which one ran
//! through [`InjuryRiskAssessment::prediction_method`].

pub mod ensemble;
pub mod features;
pub mod rules;

pub use ensemble::{EnsembleArtifact, TrainedEnsembleScorer};
pub use features::{FeatureConfig, FeatureExtractor, RiskFeatures};
pub use rules::{RiskRule, RuleBasedScorer, RuleConfig};

use crate::cache::{Fingerprint, PredictionCache};
use crate::models::{ActivityRecord, AthleteProfile};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::warn;

/// Score breakpoints between categorical levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLevelThresholds {
    pub moderate: f64,
    pub high: f64,
    pub very_high: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            moderate: 30.0,
            high: 60.0,
            very_high: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl RiskLevel {
    /// Level on the default breakpoints
    pub fn from_score(score: f64) -> Self {
        Self::from_score_with(score, &RiskLevelThresholds::default())
    }

    pub fn from_score_with(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score < thresholds.moderate {
            RiskLevel::Low
        } else if score < thresholds.high {
            RiskLevel::Moderate
        } else if score < thresholds.very_high {
            RiskLevel::High
        } else {
            RiskLevel::VeryHigh
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMethod {
    RuleBased,
    TrainedEnsemble,
    InsufficientData,
}

impl PredictionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionMethod::RuleBased => "rule_based",
            PredictionMethod::TrainedEnsemble => "trained_ensemble",
            PredictionMethod::InsufficientData => "insufficient_data",
        }
    }
}

/// A triggered rule and the score it contributed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub factor: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadLabel {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryLabel {
    Insufficient,
    Minimal,
    Adequate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionLabel {
    Conservative,
    Moderate,
    Aggressive,
}

/// Coarse labels over the headline features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAnalysis {
    pub training_load: LoadLabel,
    pub weekly_distance_km: f64,
    pub recovery: RecoveryLabel,
    pub avg_rest_days: f64,
    pub progression: ProgressionLabel,
    pub progression_risk: f64,
}

impl FeatureAnalysis {
    pub fn from_features(features: &RiskFeatures) -> Self {
        let weekly = features.avg_weekly_distance_km;
        let training_load = if weekly > 80.0 {
            LoadLabel::High
        } else if weekly > 50.0 {
            LoadLabel::Moderate
        } else {
            LoadLabel::Low
        };

        let rest = features.avg_rest_days;
        let recovery = if rest < 1.0 {
            RecoveryLabel::Insufficient
        } else if rest < 2.0 {
            RecoveryLabel::Minimal
        } else {
            RecoveryLabel::Adequate
        };

        let risk = features.progression_risk;
        let progression = if risk > 0.5 {
            ProgressionLabel::Aggressive
        } else if risk > 0.2 {
            ProgressionLabel::Moderate
        } else {
            ProgressionLabel::Conservative
        };

        Self {
            training_load,
            weekly_distance_km: weekly,
            recovery,
            avg_rest_days: rest,
            progression,
            progression_risk: risk,
        }
    }
}

/// Output of a risk scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryRiskAssessment {
    /// 0-100
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    /// Ranked by contributed weight, highest first
    pub risk_factors: Vec<RiskFactor>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
    pub prediction_method: PredictionMethod,
    pub insufficient_data: bool,
    pub feature_analysis: Option<FeatureAnalysis>,
    pub features: Option<RiskFeatures>,
}

impl InjuryRiskAssessment {
    /// Tagged result for a window with nothing to score
    pub fn insufficient_data() -> Self {
        Self {
            risk_score: 0.0,
            risk_level: RiskLevel::Low,
            risk_factors: Vec::new(),
            recommendations: vec![
                "Insufficient data for prediction".to_string(),
                "Record more activities with distance and duration".to_string(),
            ],
            confidence: 0.0,
            prediction_method: PredictionMethod::InsufficientData,
            insufficient_data: true,
            feature_analysis: None,
            features: None,
        }
    }

    pub fn prevention_plan(&self) -> PreventionPlan {
        PreventionPlan::for_assessment(self)
    }
}

/// Common contract of the rule-based and trained scorers
pub trait RiskScorer: Send + Sync {
    fn method(&self) -> PredictionMethod;

    fn assess(&self, features: &RiskFeatures) -> InjuryRiskAssessment;

    /// Assessment memoized on the fingerprint of the feature vector
    fn assess_cached(
        &self,
        features: &RiskFeatures,
        cache: &PredictionCache<InjuryRiskAssessment>,
        now: DateTime<Utc>,
    ) -> InjuryRiskAssessment {
        let mut vector = features.to_vector();
        vector.push(features.activity_count as f64);
        let key = Fingerprint::from_features(self.method().as_str(), &vector);

        if let Some(cached) = cache.get(&key, now) {
            return cached;
        }
        let assessment = self.assess(features);
        cache.insert(key, assessment.clone(), now);
        assessment
    }
}

/// Injury risk configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub features: FeatureConfig,
    pub rules: RuleConfig,
    pub levels: RiskLevelThresholds,
    /// Trained ensemble artifact; rule-based scoring when absent or unusable
    pub model_path: Option<PathBuf>,
}

/// Trained ensemble when `config.model_path` loads, rule-based scorer otherwise
pub fn scorer_from_config(config: &RiskConfig) -> Box<dyn RiskScorer> {
    let rules = RuleBasedScorer::with_config(config.rules.clone(), config.levels.clone());
    let Some(path) = config.model_path.as_deref() else {
        return Box::new(rules);
    };

    match TrainedEnsembleScorer::load(path) {
        Ok(scorer) => Box::new(scorer.with_rules(config.rules.clone(), config.levels.clone())),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Injury model unavailable, falling back to rule-based scoring"
            );
            Box::new(rules)
        }
    }
}

/// Feature extraction plus scoring over an activity history
pub struct InjuryRiskAssessor {
    extractor: FeatureExtractor,
    scorer: Box<dyn RiskScorer>,
}

impl Default for InjuryRiskAssessor {
    fn default() -> Self {
        Self::new()
    }
}

impl InjuryRiskAssessor {
    pub fn new() -> Self {
        Self::with_scorer(FeatureExtractor::new(), Box::new(RuleBasedScorer::new()))
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::with_scorer(
            FeatureExtractor::with_config(config.features.clone()),
            scorer_from_config(config),
        )
    }

    pub fn with_scorer(extractor: FeatureExtractor, scorer: Box<dyn RiskScorer>) -> Self {
        Self { extractor, scorer }
    }

    pub fn method(&self) -> PredictionMethod {
        self.scorer.method()
    }

    pub fn assess(
        &self,
        activities: &[ActivityRecord],
        athlete: &AthleteProfile,
        as_of: Option<NaiveDate>,
    ) -> InjuryRiskAssessment {
        match self.extractor.extract(activities, athlete, as_of) {
            Some(features) => self.scorer.assess(&features),
            None => InjuryRiskAssessment::insufficient_data(),
        }
    }

    pub fn assess_cached(
        &self,
        activities: &[ActivityRecord],
        athlete: &AthleteProfile,
        as_of: Option<NaiveDate>,
        cache: &PredictionCache<InjuryRiskAssessment>,
        now: DateTime<Utc>,
    ) -> InjuryRiskAssessment {
        match self.extractor.extract(activities, athlete, as_of) {
            Some(features) => self.scorer.assess_cached(&features, cache, now),
            None => InjuryRiskAssessment::insufficient_data(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub monitoring_frequency: String,
    pub immediate_actions: Vec<String>,
}

/// Level-specific prevention guidance from a fixed catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreventionPlan {
    pub risk_level: RiskLevel,
    pub focus_areas: Vec<String>,
    pub prevention_strategies: Vec<String>,
    pub monitoring_metrics: Vec<String>,
    pub warning_signs: Vec<String>,
    pub action_plan: ActionPlan,
}

const BASE_STRATEGIES: [&str; 5] = [
    "Gradual training progression (10% rule)",
    "Regular strength training 2-3x per week",
    "Proper warm-up and cool-down routines",
    "Adequate sleep (7-9 hours nightly)",
    "Proper nutrition and hydration",
];

const HIGH_RISK_STRATEGIES: [&str; 5] = [
    "Reduce weekly mileage by 20-30%",
    "Increase recovery runs and rest days",
    "Consider massage or physiotherapy",
    "Monitor heart rate variability",
    "Cross-training activities (swimming, cycling)",
];

const MODERATE_RISK_STRATEGIES: [&str; 4] = [
    "Maintain current training load",
    "Add extra rest day if consecutive training days > 5",
    "Focus on running form and efficiency",
    "Include preventive exercises",
];

const MONITORING_METRICS: [&str; 5] = [
    "Weekly training load",
    "Resting heart rate",
    "Sleep quality",
    "Perceived exertion levels",
    "Any pain or discomfort",
];

const WARNING_SIGNS: [&str; 6] = [
    "Persistent muscle soreness",
    "Elevated resting heart rate",
    "Declining performance despite training",
    "Sleep disturbances",
    "Loss of motivation",
    "Any sharp or persistent pain",
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl PreventionPlan {
    pub fn for_assessment(assessment: &InjuryRiskAssessment) -> Self {
        let level = assessment.risk_level;

        let mut prevention_strategies = owned(&BASE_STRATEGIES);
        match level {
            RiskLevel::High | RiskLevel::VeryHigh => {
                prevention_strategies.extend(owned(&HIGH_RISK_STRATEGIES))
            }
            RiskLevel::Moderate => prevention_strategies.extend(owned(&MODERATE_RISK_STRATEGIES)),
            RiskLevel::Low => {}
        }

        let action_plan = match level {
            RiskLevel::Low => ActionPlan {
                monitoring_frequency: "Weekly monitoring".to_string(),
                immediate_actions: owned(&["Continue current training", "Monthly assessment"]),
            },
            RiskLevel::Moderate => ActionPlan {
                monitoring_frequency: "Daily monitoring".to_string(),
                immediate_actions: owned(&[
                    "Adjust training if warning signs appear",
                    "Weekly assessment",
                ]),
            },
            RiskLevel::High | RiskLevel::VeryHigh => ActionPlan {
                monitoring_frequency: "Daily monitoring".to_string(),
                immediate_actions: owned(&[
                    "Immediate training adjustment",
                    "Consider professional consultation",
                    "Daily assessment until risk reduces",
                ]),
            },
        };

        Self {
            risk_level: level,
            focus_areas: assessment
                .risk_factors
                .iter()
                .map(|f| f.factor.clone())
                .collect(),
            prevention_strategies,
            monitoring_metrics: owned(&MONITORING_METRICS),
            warning_signs: owned(&WARNING_SIGNS),
            action_plan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SportType;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn run(day: u32, km: f64) -> ActivityRecord {
        let start = Utc.with_ymd_and_hms(2024, 3, day, 7, 0, 0).unwrap();
        ActivityRecord::new(start, SportType::Run, km * 1000.0, (km * 300.0) as u32)
    }

    #[test]
    fn test_level_boundaries_exact() {
        assert_eq!(RiskLevel::from_score(29.9), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30.0), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(59.999), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(60.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(80.0), RiskLevel::VeryHigh);
        assert_eq!(
            serde_json::to_string(&RiskLevel::VeryHigh).unwrap(),
            "\"very_high\""
        );
    }

    #[test]
    fn test_insufficient_data_is_tagged() {
        let assessment = InjuryRiskAssessor::new().assess(&[], &AthleteProfile::default(), None);
        assert!(assessment.insufficient_data);
        assert_eq!(assessment.risk_score, 0.0);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert_eq!(assessment.confidence, 0.0);
        assert_eq!(assessment.prediction_method, PredictionMethod::InsufficientData);
    }

    #[test]
    fn test_missing_model_falls_back_to_rules() {
        let config = RiskConfig {
            model_path: Some(PathBuf::from("/nonexistent/injury_model.json")),
            ..RiskConfig::default()
        };
        let assessor = InjuryRiskAssessor::from_config(&config);
        assert_eq!(assessor.method(), PredictionMethod::RuleBased);
    }

    #[test]
    fn test_model_path_selects_ensemble() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let artifact = ensemble::tests::sample_artifact();
        std::fs::write(file.path(), serde_json::to_string(&artifact).unwrap()).unwrap();

        let config = RiskConfig {
            model_path: Some(file.path().to_path_buf()),
            ..RiskConfig::default()
        };
        let assessor = InjuryRiskAssessor::from_config(&config);
        assert_eq!(assessor.method(), PredictionMethod::TrainedEnsemble);

        let activities: Vec<ActivityRecord> = (1..=10).map(|d| run(d * 2, 8.0)).collect();
        let assessment = assessor.assess(&activities, &AthleteProfile::default(), None);
        assert_eq!(assessment.prediction_method, PredictionMethod::TrainedEnsemble);
    }

    struct CountingScorer {
        calls: Arc<AtomicUsize>,
    }

    impl RiskScorer for CountingScorer {
        fn method(&self) -> PredictionMethod {
            PredictionMethod::RuleBased
        }

        fn assess(&self, features: &RiskFeatures) -> InjuryRiskAssessment {
            self.calls.fetch_add(1, Ordering::SeqCst);
            RuleBasedScorer::new().assess(features)
        }
    }

    #[test]
    fn test_assess_cached_reuses_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let assessor = InjuryRiskAssessor::with_scorer(
            FeatureExtractor::new(),
            Box::new(CountingScorer {
                calls: Arc::clone(&calls),
            }),
        );
        let cache = PredictionCache::new(Duration::hours(1));
        let now = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
        let activities: Vec<ActivityRecord> = (1..=6).map(|d| run(d * 3, 6.0)).collect();

        let first =
            assessor.assess_cached(&activities, &AthleteProfile::default(), None, &cache, now);
        let second = assessor.assess_cached(
            &activities,
            &AthleteProfile::default(),
            None,
            &cache,
            now + Duration::minutes(5),
        );
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.metrics().cache_hits, 1);
    }

    #[test]
    fn test_prevention_plan_by_level() {
        let mut assessment = InjuryRiskAssessment::insufficient_data();
        let low = assessment.prevention_plan();
        assert_eq!(low.prevention_strategies.len(), 5);
        assert_eq!(low.action_plan.monitoring_frequency, "Weekly monitoring");

        assessment.risk_level = RiskLevel::Moderate;
        assert_eq!(assessment.prevention_plan().prevention_strategies.len(), 9);

        assessment.risk_level = RiskLevel::VeryHigh;
        assessment.risk_factors.push(RiskFactor {
            factor: "High training monotony".to_string(),
            weight: 8.0,
        });
        let plan = assessment.prevention_plan();
        assert_eq!(plan.prevention_strategies.len(), 10);
        assert_eq!(plan.focus_areas, vec!["High training monotony".to_string()]);
        assert_eq!(plan.action_plan.immediate_actions.len(), 3);
        assert_eq!(plan.warning_signs.len(), 6);
    }

    #[test]
    fn test_feature_analysis_labels() {
        let features = RiskFeatures {
            activity_count: 20,
            weekly_load_increase: 0.3,
            training_monotony: 1.0,
            max_consecutive_days: 4,
            recovery_run_ratio: 0.3,
            polarization_index: None,
            pace_variability: 0.1,
            cadence_variability: None,
            efficiency_decline: false,
            avg_weekly_distance_km: 65.0,
            avg_rest_days: 0.5,
            progression_risk: 1.0,
        };
        let analysis = FeatureAnalysis::from_features(&features);
        assert_eq!(analysis.training_load, LoadLabel::Moderate);
        assert_eq!(analysis.recovery, RecoveryLabel::Insufficient);
        assert_eq!(analysis.progression, ProgressionLabel::Aggressive);
    }

    proptest! {
        #[test]
        fn prop_rule_score_bounded(
            increase in 0.0f64..5.0,
            monotony in 0.0f64..50.0,
            consecutive in 0u32..30,
            recovery in 0.0f64..1.0,
            polarization in proptest::option::of(0.0f64..1.0),
            pace_cv in 0.0f64..1.0,
            decline in any::<bool>(),
        ) {
            let features = RiskFeatures {
                activity_count: 10,
                weekly_load_increase: increase,
                training_monotony: monotony,
                max_consecutive_days: consecutive,
                recovery_run_ratio: recovery,
                polarization_index: polarization,
                pace_variability: pace_cv,
                cadence_variability: None,
                efficiency_decline: decline,
                avg_weekly_distance_km: 40.0,
                avg_rest_days: 1.0,
                progression_risk: (increase * 10.0).min(1.0),
            };
            let assessment = RuleBasedScorer::new().assess(&features);
            prop_assert!((0.0..=100.0).contains(&assessment.risk_score));
            prop_assert_eq!(assessment.risk_level, RiskLevel::from_score(assessment.risk_score));
            let weights: f64 = assessment.risk_factors.iter().map(|f| f.weight).sum();
            prop_assert!((assessment.risk_score - (10.0 + weights).min(100.0)).abs() < 1e-9);
        }
    }
}
