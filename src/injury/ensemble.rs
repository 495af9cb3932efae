//! Pre-trained ensemble classifier
//!
//! The artifact is a JSON document produced by an offline training job:
//!
//! ```json
//! {
//!   "feature_names": ["weekly_load_increase", "..."],
//!   "scaler": { "mean": [...], "scale": [...] },
//!   "logistic": { "coefficients": [...], "intercept": -1.2 },
//!   "random_forest": [ { "nodes": [ ... ] } ],
//!   "gradient_boosting": { "intercept": -0.4, "learning_rate": 0.1, "trees": [ ... ] },
//!   "weights": { "logistic": 0.4, "random_forest": 0.4, "gradient_boosting": 0.2 }
//! }
//! ```
//!
//! Tree nodes are either `{"type": "split", "feature", "threshold", "left", "right"}`
//! or `{"type": "leaf", "value"}`; evaluation goes left when `x[feature] <= threshold`.

use super::features::RiskFeatures;
use super::rules::{triggered_factors, RuleConfig};
use super::{
    FeatureAnalysis, InjuryRiskAssessment, PredictionMethod, RiskLevel, RiskLevelThresholds,
    RiskScorer,
};
use crate::error::RiskModelError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Standardization applied before the sub-estimators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(value, (mean, scale))| {
                if *scale != 0.0 {
                    (value - mean) / scale
                } else {
                    value - mean
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    fn probability(&self, z: &[f64]) -> f64 {
        let logit: f64 = self
            .coefficients
            .iter()
            .zip(z)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept;
        sigmoid(logit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Flattened binary decision tree rooted at node 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Children must point forward, which rules out cycles
    fn validate(&self, feature_count: usize) -> Result<(), RiskModelError> {
        if self.nodes.is_empty() {
            return Err(RiskModelError::InvalidArtifact {
                reason: "decision tree has no nodes".to_string(),
            });
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                left,
                right,
                threshold,
            } = node
            {
                let in_range = |child: usize| child > index && child < self.nodes.len();
                if *feature >= feature_count || !in_range(*left) || !in_range(*right) {
                    return Err(RiskModelError::InvalidArtifact {
                        reason: format!("malformed split at node {}", index),
                    });
                }
                if !threshold.is_finite() {
                    return Err(RiskModelError::InvalidArtifact {
                        reason: format!("non-finite threshold at node {}", index),
                    });
                }
            }
        }
        Ok(())
    }

    /// Leaf value reached by `x`; only called on validated trees
    fn evaluate(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes.get(index) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = x.get(*feature).copied().unwrap_or(0.0);
                    index = if value <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub intercept: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    pub trees: Vec<DecisionTree>,
}

fn default_learning_rate() -> f64 {
    1.0
}

impl GradientBoosting {
    fn probability(&self, z: &[f64]) -> f64 {
        let raw: f64 = self.trees.iter().map(|tree| tree.evaluate(z)).sum();
        sigmoid(self.intercept + self.learning_rate * raw)
    }
}

/// Sub-estimator blend weights; normalized to sum to 1 on load
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub logistic: f64,
    pub random_forest: f64,
    pub gradient_boosting: f64,
}

impl Default for BlendWeights {
    fn default() -> Self {
        Self {
            logistic: 0.4,
            random_forest: 0.4,
            gradient_boosting: 0.2,
        }
    }
}

impl BlendWeights {
    fn normalized(self) -> Result<Self, RiskModelError> {
        let parts = [self.logistic, self.random_forest, self.gradient_boosting];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(RiskModelError::InvalidArtifact {
                reason: "blend weights must be finite and non-negative".to_string(),
            });
        }
        let total: f64 = parts.iter().sum();
        if total <= 0.0 {
            return Err(RiskModelError::InvalidArtifact {
                reason: "blend weights sum to zero".to_string(),
            });
        }
        Ok(Self {
            logistic: self.logistic / total,
            random_forest: self.random_forest / total,
            gradient_boosting: self.gradient_boosting / total,
        })
    }
}

/// Serialized model artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleArtifact {
    pub feature_names: Vec<String>,
    pub scaler: StandardScaler,
    pub logistic: LogisticModel,
    pub random_forest: Vec<DecisionTree>,
    pub gradient_boosting: GradientBoosting,
    #[serde(default)]
    pub weights: Option<BlendWeights>,
}

impl EnsembleArtifact {
    /// Check every component against the feature layout of [`RiskFeatures`]
    pub fn validate(&self) -> Result<(), RiskModelError> {
        let expected = RiskFeatures::NAMES.len();
        let actual = self.feature_names.len();
        if actual != expected {
            return Err(RiskModelError::FeatureMismatch { expected, actual });
        }
        if let Some((name, want)) = self
            .feature_names
            .iter()
            .zip(RiskFeatures::NAMES)
            .find(|(name, want)| name.as_str() != *want)
        {
            return Err(RiskModelError::InvalidArtifact {
                reason: format!("feature '{}' found where '{}' was expected", name, want),
            });
        }
        if self.scaler.mean.len() != expected || self.scaler.scale.len() != expected {
            return Err(RiskModelError::InvalidArtifact {
                reason: "scaler dimensions do not match features".to_string(),
            });
        }
        if self.logistic.coefficients.len() != expected {
            return Err(RiskModelError::FeatureMismatch {
                expected,
                actual: self.logistic.coefficients.len(),
            });
        }
        if self.random_forest.is_empty() {
            return Err(RiskModelError::InvalidArtifact {
                reason: "random forest has no trees".to_string(),
            });
        }
        for tree in self.random_forest.iter().chain(&self.gradient_boosting.trees) {
            tree.validate(expected)?;
        }
        Ok(())
    }
}

/// Per-estimator probabilities and their blend
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnsembleOutput {
    pub logistic: f64,
    pub random_forest: f64,
    pub gradient_boosting: f64,
    pub blended: f64,
}

/// Scorer backed by a trained logistic/forest/boosting ensemble
#[derive(Debug, Clone)]
pub struct TrainedEnsembleScorer {
    artifact: EnsembleArtifact,
    weights: BlendWeights,
    rules: RuleConfig,
    levels: RiskLevelThresholds,
    confidence_scale: f64,
}

impl TrainedEnsembleScorer {
    pub fn from_artifact(artifact: EnsembleArtifact) -> Result<Self, RiskModelError> {
        artifact.validate()?;
        let weights = artifact.weights.unwrap_or_default().normalized()?;
        Ok(Self {
            artifact,
            weights,
            rules: RuleConfig::default(),
            levels: RiskLevelThresholds::default(),
            confidence_scale: 0.9,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, RiskModelError> {
        let artifact: EnsembleArtifact =
            serde_json::from_str(json).map_err(|e| RiskModelError::InvalidArtifact {
                reason: e.to_string(),
            })?;
        Self::from_artifact(artifact)
    }

    pub fn load(path: &Path) -> Result<Self, RiskModelError> {
        if !path.exists() {
            return Err(RiskModelError::ArtifactNotFound {
                path: path.to_path_buf(),
            });
        }
        let json = std::fs::read_to_string(path).map_err(|e| RiskModelError::InvalidArtifact {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let scorer = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            trees = scorer.artifact.random_forest.len() + scorer.artifact.gradient_boosting.trees.len(),
            "Loaded injury risk ensemble"
        );
        Ok(scorer)
    }

    /// Rule catalog used for factors, recommendations and level breakpoints
    pub fn with_rules(mut self, rules: RuleConfig, levels: RiskLevelThresholds) -> Self {
        self.rules = rules;
        self.levels = levels;
        self
    }

    pub fn weights(&self) -> BlendWeights {
        self.weights
    }

    pub fn predict(&self, features: &RiskFeatures) -> EnsembleOutput {
        let z = self.artifact.scaler.transform(&features.to_vector());

        let logistic = self.artifact.logistic.probability(&z);
        let forest = &self.artifact.random_forest;
        let random_forest = (forest.iter().map(|tree| tree.evaluate(&z)).sum::<f64>()
            / forest.len() as f64)
            .clamp(0.0, 1.0);
        let gradient_boosting = self.artifact.gradient_boosting.probability(&z);

        let blended = (self.weights.logistic * logistic
            + self.weights.random_forest * random_forest
            + self.weights.gradient_boosting * gradient_boosting)
            .clamp(0.0, 1.0);

        EnsembleOutput {
            logistic,
            random_forest,
            gradient_boosting,
            blended,
        }
    }
}

impl RiskScorer for TrainedEnsembleScorer {
    fn method(&self) -> PredictionMethod {
        PredictionMethod::TrainedEnsemble
    }

    fn assess(&self, features: &RiskFeatures) -> InjuryRiskAssessment {
        let output = self.predict(features);
        let max_deviation = [
            output.logistic,
            output.random_forest,
            output.gradient_boosting,
        ]
        .iter()
        .map(|p| (p - output.blended).abs())
        .fold(0.0, f64::max);

        let risk_score = (output.blended * 100.0).clamp(0.0, 100.0);
        let confidence = (self.confidence_scale * (1.0 - max_deviation)).clamp(0.0, 1.0);
        let (risk_factors, recommendations) = triggered_factors(features, &self.rules);

        debug!(
            risk_score,
            logistic = output.logistic,
            random_forest = output.random_forest,
            gradient_boosting = output.gradient_boosting,
            "Ensemble injury risk scored"
        );

        InjuryRiskAssessment {
            risk_score,
            risk_level: RiskLevel::from_score_with(risk_score, &self.levels),
            risk_factors,
            recommendations,
            confidence,
            prediction_method: PredictionMethod::TrainedEnsemble,
            insufficient_data: false,
            feature_analysis: Some(FeatureAnalysis::from_features(features)),
            features: Some(features.clone()),
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    /// Small artifact: every estimator keys on `weekly_load_increase` (column 0)
    pub(crate) fn sample_artifact() -> EnsembleArtifact {
        let n = RiskFeatures::NAMES.len();
        let mut coefficients = vec![0.0; n];
        coefficients[0] = 2.0;

        let stump = |low: f64, high: f64| DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 0.0,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { value: low },
                TreeNode::Leaf { value: high },
            ],
        };

        EnsembleArtifact {
            feature_names: RiskFeatures::NAMES.iter().map(|s| s.to_string()).collect(),
            scaler: StandardScaler {
                mean: vec![0.1; n],
                scale: vec![0.1; n],
            },
            logistic: LogisticModel {
                coefficients,
                intercept: 0.0,
            },
            random_forest: vec![stump(0.1, 0.9), stump(0.2, 0.7)],
            gradient_boosting: GradientBoosting {
                intercept: 0.0,
                learning_rate: 1.0,
                trees: vec![stump(-1.0, 1.0)],
            },
            weights: None,
        }
    }

    fn features(weekly_load_increase: f64) -> RiskFeatures {
        RiskFeatures {
            activity_count: 10,
            weekly_load_increase,
            training_monotony: 1.0,
            max_consecutive_days: 3,
            recovery_run_ratio: 0.4,
            polarization_index: Some(0.9),
            pace_variability: 0.05,
            cadence_variability: None,
            efficiency_decline: false,
            avg_weekly_distance_km: 30.0,
            avg_rest_days: 1.0,
            progression_risk: (weekly_load_increase * 10.0).min(1.0),
        }
    }

    #[test]
    fn test_default_weights_normalized() {
        let scorer = TrainedEnsembleScorer::from_artifact(sample_artifact()).unwrap();
        let w = scorer.weights();
        assert!((w.logistic + w.random_forest + w.gradient_boosting - 1.0).abs() < 1e-12);
        assert!((w.logistic - 0.4).abs() < 1e-12);

        let mut artifact = sample_artifact();
        artifact.weights = Some(BlendWeights {
            logistic: 2.0,
            random_forest: 1.0,
            gradient_boosting: 1.0,
        });
        let w = TrainedEnsembleScorer::from_artifact(artifact).unwrap().weights();
        assert!((w.logistic - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_predict_blends_sub_estimators() {
        let scorer = TrainedEnsembleScorer::from_artifact(sample_artifact()).unwrap();

        // Scaled feature 0 is 0, so logistic = 0.5 and the stumps go left
        let output = scorer.predict(&features(0.1));
        assert!((output.logistic - 0.5).abs() < 1e-12);
        assert!((output.random_forest - 0.15).abs() < 1e-12);
        assert!((output.gradient_boosting - sigmoid(-1.0)).abs() < 1e-12);
        let expected = 0.4 * 0.5 + 0.4 * 0.15 + 0.2 * sigmoid(-1.0);
        assert!((output.blended - expected).abs() < 1e-12);

        let risky = scorer.predict(&features(0.75));
        assert!(risky.blended > output.blended);
    }

    #[test]
    fn test_assessment_tags_method_and_bounds_confidence() {
        let scorer = TrainedEnsembleScorer::from_artifact(sample_artifact()).unwrap();
        let assessment = scorer.assess(&features(0.75));

        assert_eq!(assessment.prediction_method, PredictionMethod::TrainedEnsemble);
        assert!((0.0..=100.0).contains(&assessment.risk_score));
        assert!(assessment.confidence <= 0.9 && assessment.confidence >= 0.0);
        assert_eq!(
            assessment.risk_factors[0].factor,
            "Rapid training load increase"
        );
    }

    #[test]
    fn test_rejects_feature_mismatch() {
        let mut artifact = sample_artifact();
        artifact.feature_names.pop();
        assert!(matches!(
            TrainedEnsembleScorer::from_artifact(artifact),
            Err(RiskModelError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_backward_tree_edges() {
        let mut artifact = sample_artifact();
        artifact.random_forest[0].nodes[0] = TreeNode::Split {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 2,
        };
        assert!(matches!(
            TrainedEnsembleScorer::from_artifact(artifact),
            Err(RiskModelError::InvalidArtifact { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            serde_json::to_string(&sample_artifact()).unwrap(),
        )
        .unwrap();
        assert!(TrainedEnsembleScorer::load(file.path()).is_ok());

        std::fs::write(file.path(), "{ not json").unwrap();
        assert!(matches!(
            TrainedEnsembleScorer::load(file.path()),
            Err(RiskModelError::InvalidArtifact { .. })
        ));

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            TrainedEnsembleScorer::load(&missing),
            Err(RiskModelError::ArtifactNotFound { .. })
        ));
    }
}
