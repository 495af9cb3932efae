use super::features::RiskFeatures;
use super::{
    FeatureAnalysis, InjuryRiskAssessment, PredictionMethod, RiskFactor, RiskLevel,
    RiskLevelThresholds, RiskScorer,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Recommendations used when no rule fires
pub const GENERAL_RECOMMENDATIONS: [&str; 3] = [
    "Maintain current training approach",
    "Continue monitoring training load progression",
    "Ensure adequate recovery between hard sessions",
];

/// Rule thresholds and score increments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub base_score: f64,
    pub weekly_increase_threshold: f64,
    pub weekly_increase_weight: f64,
    pub monotony_threshold: f64,
    pub monotony_weight: f64,
    pub consecutive_days_threshold: u32,
    pub consecutive_days_weight: f64,
    pub polarization_threshold: f64,
    pub polarization_weight: f64,
    pub pace_variability_threshold: f64,
    pub pace_variability_weight: f64,
    pub cadence_variability_threshold: f64,
    pub cadence_variability_weight: f64,
    pub efficiency_decline_weight: f64,
    pub recovery_ratio_threshold: f64,
    pub recovery_ratio_weight: f64,
    pub confidence: f64,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            base_score: 10.0,
            weekly_increase_threshold: 0.10,
            weekly_increase_weight: 15.0,
            monotony_threshold: 2.0,
            monotony_weight: 8.0,
            consecutive_days_threshold: 6,
            consecutive_days_weight: 12.0,
            polarization_threshold: 0.80,
            polarization_weight: 6.0,
            pace_variability_threshold: 0.3,
            pace_variability_weight: 6.0,
            cadence_variability_threshold: 0.2,
            cadence_variability_weight: 4.0,
            efficiency_decline_weight: 8.0,
            recovery_ratio_threshold: 0.3,
            recovery_ratio_weight: 4.0,
            confidence: 0.7,
        }
    }
}

/// Catalog of rules, each with a fixed factor name and recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskRule {
    RapidLoadIncrease,
    HighMonotony,
    InsufficientRecoveryDays,
    InadequateEasyRatio,
    HighPaceVariability,
    InconsistentCadence,
    DecliningEfficiency,
    InsufficientRecoveryRuns,
}

impl RiskRule {
    pub const ALL: [RiskRule; 8] = [
        RiskRule::RapidLoadIncrease,
        RiskRule::HighMonotony,
        RiskRule::InsufficientRecoveryDays,
        RiskRule::InadequateEasyRatio,
        RiskRule::HighPaceVariability,
        RiskRule::InconsistentCadence,
        RiskRule::DecliningEfficiency,
        RiskRule::InsufficientRecoveryRuns,
    ];

    pub fn factor(&self) -> &'static str {
        match self {
            RiskRule::RapidLoadIncrease => "Rapid training load increase",
            RiskRule::HighMonotony => "High training monotony",
            RiskRule::InsufficientRecoveryDays => "Insufficient recovery days",
            RiskRule::InadequateEasyRatio => "Inadequate easy running ratio",
            RiskRule::HighPaceVariability => "High pace variability",
            RiskRule::InconsistentCadence => "Inconsistent running cadence",
            RiskRule::DecliningEfficiency => "Declining running efficiency",
            RiskRule::InsufficientRecoveryRuns => "Insufficient recovery runs",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            RiskRule::RapidLoadIncrease => "Limit weekly mileage increases to 10%",
            RiskRule::HighMonotony => "Add variety to training intensities",
            RiskRule::InsufficientRecoveryDays => "Include at least one rest day per week",
            RiskRule::InadequateEasyRatio => "Follow 80/20 rule: 80% easy, 20% hard training",
            RiskRule::HighPaceVariability => "Focus on consistent pacing during runs",
            RiskRule::InconsistentCadence => {
                "Work on maintaining steady cadence around 180 steps/min"
            }
            RiskRule::DecliningEfficiency => "Consider reducing training intensity for recovery",
            RiskRule::InsufficientRecoveryRuns => "Include more easy recovery runs in training",
        }
    }

    /// Score increment when the rule fires, `None` otherwise
    pub fn evaluate(&self, features: &RiskFeatures, config: &RuleConfig) -> Option<f64> {
        let triggered = match self {
            RiskRule::RapidLoadIncrease => {
                features.weekly_load_increase > config.weekly_increase_threshold
            }
            RiskRule::HighMonotony => features.training_monotony > config.monotony_threshold,
            RiskRule::InsufficientRecoveryDays => {
                features.max_consecutive_days > config.consecutive_days_threshold
            }
            RiskRule::InadequateEasyRatio => features
                .polarization_index
                .is_some_and(|p| p < config.polarization_threshold),
            RiskRule::HighPaceVariability => {
                features.pace_variability > config.pace_variability_threshold
            }
            RiskRule::InconsistentCadence => features
                .cadence_variability
                .is_some_and(|cv| cv > config.cadence_variability_threshold),
            RiskRule::DecliningEfficiency => features.efficiency_decline,
            RiskRule::InsufficientRecoveryRuns => {
                features.recovery_run_ratio < config.recovery_ratio_threshold
            }
        };
        triggered.then(|| self.weight(config))
    }

    fn weight(&self, config: &RuleConfig) -> f64 {
        match self {
            RiskRule::RapidLoadIncrease => config.weekly_increase_weight,
            RiskRule::HighMonotony => config.monotony_weight,
            RiskRule::InsufficientRecoveryDays => config.consecutive_days_weight,
            RiskRule::InadequateEasyRatio => config.polarization_weight,
            RiskRule::HighPaceVariability => config.pace_variability_weight,
            RiskRule::InconsistentCadence => config.cadence_variability_weight,
            RiskRule::DecliningEfficiency => config.efficiency_decline_weight,
            RiskRule::InsufficientRecoveryRuns => config.recovery_ratio_weight,
        }
    }
}

/// Triggered rules as ranked factors and their paired recommendations
pub(crate) fn triggered_factors(
    features: &RiskFeatures,
    config: &RuleConfig,
) -> (Vec<RiskFactor>, Vec<String>) {
    let mut fired: Vec<(RiskRule, f64)> = RiskRule::ALL
        .iter()
        .filter_map(|rule| rule.evaluate(features, config).map(|w| (*rule, w)))
        .collect();
    // Stable: ties keep catalog order
    fired.sort_by(|a, b| b.1.total_cmp(&a.1));

    let recommendations = if fired.is_empty() {
        GENERAL_RECOMMENDATIONS.iter().map(|s| s.to_string()).collect()
    } else {
        fired
            .iter()
            .map(|(rule, _)| rule.recommendation().to_string())
            .collect()
    };
    let factors = fired
        .into_iter()
        .map(|(rule, weight)| RiskFactor {
            factor: rule.factor().to_string(),
            weight,
        })
        .collect();
    (factors, recommendations)
}

/// Deterministic scorer: base score plus fixed increments per triggered rule
#[derive(Debug, Clone, Default)]
pub struct RuleBasedScorer {
    config: RuleConfig,
    levels: RiskLevelThresholds,
}

impl RuleBasedScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RuleConfig, levels: RiskLevelThresholds) -> Self {
        Self { config, levels }
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }
}

impl RiskScorer for RuleBasedScorer {
    fn method(&self) -> PredictionMethod {
        PredictionMethod::RuleBased
    }

    fn assess(&self, features: &RiskFeatures) -> InjuryRiskAssessment {
        let (risk_factors, recommendations) = triggered_factors(features, &self.config);
        let increments: f64 = risk_factors.iter().map(|f| f.weight).sum();
        let risk_score = (self.config.base_score + increments).clamp(0.0, 100.0);

        debug!(
            risk_score,
            triggered = risk_factors.len(),
            "Rule-based injury risk scored"
        );

        InjuryRiskAssessment {
            risk_score,
            risk_level: RiskLevel::from_score_with(risk_score, &self.levels),
            risk_factors,
            recommendations,
            confidence: self.config.confidence,
            prediction_method: PredictionMethod::RuleBased,
            insufficient_data: false,
            feature_analysis: Some(FeatureAnalysis::from_features(features)),
            features: Some(features.clone()),
        }
    }
}
