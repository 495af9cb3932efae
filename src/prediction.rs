use crate::cache::{Fingerprint, PredictionCache};
use crate::error::PredictionError;
use crate::fitness::{coefficient_of_variation, FitnessSnapshot, SnapshotMetrics};
use crate::models::{format_duration, format_pace};
use crate::periodization::PeriodizedPrediction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Pace (min/km) to VDOT lookup entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VdotEntry {
    pub pace_min_per_km: f64,
    pub vdot: f64,
}

/// A standard race distance with an associated factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceFactor {
    pub distance_km: f64,
    pub factor: f64,
}

/// Looks up the factor of the standard distance within `tolerance` of `distance_km`
pub(crate) fn lookup_distance(table: &[DistanceFactor], distance_km: f64, tolerance: f64) -> Option<f64> {
    table
        .iter()
        .find(|entry| (entry.distance_km - distance_km).abs() <= tolerance)
        .map(|entry| entry.factor)
}

fn distance_table(pairs: &[(f64, f64)]) -> Vec<DistanceFactor> {
    pairs
        .iter()
        .map(|&(distance_km, factor)| DistanceFactor { distance_km, factor })
        .collect()
}

/// Race-time predictor configuration (empirical, pinned)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub vdot_table: Vec<VdotEntry>,
    /// Weekly km at which the volume factor reaches 1.0
    pub vdot_reference_volume_km: f64,
    pub vdot_max_volume_factor: f64,
    pub vdot_min: f64,
    pub vdot_max: f64,

    /// Race pace as a fraction of training pace
    pub race_pace_factor: f64,
    /// Multiples of the 10K time
    pub mcmillan_ratios: Vec<DistanceFactor>,
    /// Distance match tolerance in km
    pub distance_tolerance_km: f64,

    pub riegel_exponent: f64,

    /// Efforts shorter than this fraction of the target are ignored by the direct estimator
    pub direct_min_fraction: f64,
    /// Pace multipliers by upper distance bound (km), ascending
    pub direct_multipliers: Vec<DistanceFactor>,
    pub direct_long_multiplier: f64,

    /// Activity count giving full data quality
    pub full_quality_activities: f64,
    /// Agreement assigned when only one estimator succeeds
    pub single_method_agreement: f64,

    /// Fallback paces in seconds per km
    pub fallback_paces: Vec<DistanceFactor>,
    pub fallback_default_pace: f64,
    pub fallback_confidence: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        let vdot_table = [
            (4.0, 70.0),
            (4.2, 65.0),
            (4.4, 60.0),
            (4.6, 55.0),
            (5.0, 50.0),
            (5.2, 47.0),
            (5.4, 45.0),
            (5.6, 43.0),
            (5.8, 41.0),
            (6.0, 39.0),
            (6.2, 37.0),
            (6.4, 35.0),
            (6.6, 33.0),
            (6.8, 31.0),
            (7.0, 29.0),
            (7.2, 27.0),
            (7.4, 25.0),
            (7.6, 23.0),
            (7.8, 21.0),
            (8.0, 19.0),
        ]
        .iter()
        .map(|&(pace_min_per_km, vdot)| VdotEntry {
            pace_min_per_km,
            vdot,
        })
        .collect();

        Self {
            vdot_table,
            vdot_reference_volume_km: 40.0,
            vdot_max_volume_factor: 1.1,
            vdot_min: 15.0,
            vdot_max: 85.0,
            race_pace_factor: 0.85,
            mcmillan_ratios: distance_table(&[
                (5.0, 0.478),
                (10.0, 1.0),
                (21.0975, 2.14),
                (42.195, 4.67),
            ]),
            distance_tolerance_km: 0.05,
            riegel_exponent: 1.06,
            direct_min_fraction: 0.3,
            direct_multipliers: distance_table(&[(5.0, 0.98), (10.0, 1.01), (21.1, 1.05)]),
            direct_long_multiplier: 1.12,
            full_quality_activities: 20.0,
            single_method_agreement: 0.7,
            fallback_paces: distance_table(&[
                (5.0, 390.0),
                (10.0, 420.0),
                (21.0975, 450.0),
                (42.195, 480.0),
            ]),
            fallback_default_pace: 450.0,
            fallback_confidence: 0.3,
        }
    }
}

/// Individual estimators combined by the ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    Vdot,
    McMillan,
    Riegel,
    DirectPace,
}

/// Output of one successful estimator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodEstimate {
    pub method: Estimator,
    pub time_seconds: f64,
}

/// How the final estimate was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Methodology {
    EnsembleMedian,
    SingleMethod,
    FallbackConservativeEstimate,
}

impl Methodology {
    pub fn as_str(&self) -> &'static str {
        match self {
            Methodology::EnsembleMedian => "ensemble_median",
            Methodology::SingleMethod => "single_method",
            Methodology::FallbackConservativeEstimate => "fallback_conservative_estimate",
        }
    }
}

/// Target pace for one kilometre of the race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KmSplit {
    pub km: u32,
    /// Seconds per km
    pub target_pace: f64,
}

/// Race-time forecast for one target distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacePrediction {
    pub distance_km: f64,
    pub predicted_time_seconds: f64,
    /// Seconds per km
    pub predicted_pace: f64,
    pub formatted_time: String,
    pub formatted_pace: String,
    /// Always within [0, 1]
    pub confidence: f64,
    pub methodology: Methodology,
    pub method_breakdown: Vec<MethodEstimate>,
    pub estimated_vdot: Option<f64>,
    pub pacing_strategy: Vec<KmSplit>,
    pub warnings: Vec<String>,
    /// Periodized projection to race day, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub race_day_projection: Option<Box<PeriodizedPrediction>>,
}

impl RacePrediction {
    pub fn is_fallback(&self) -> bool {
        self.methodology == Methodology::FallbackConservativeEstimate
    }
}

/// Median-of-successes result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Combined {
    pub value: f64,
    /// 1 − coefficient of variation, clamped to [0, 1]
    pub agreement: f64,
    pub successes: usize,
}

/// Combine independent estimator outputs, ignoring failed ones
///
/// Uses the median (mean of the middle pair for an even count). A single
/// success gets `single_agreement`. Returns `None` when nothing succeeded.
pub fn combine_estimates(values: &[Option<f64>], single_agreement: f64) -> Option<Combined> {
    let mut successes: Vec<f64> = values
        .iter()
        .flatten()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    if successes.is_empty() {
        return None;
    }
    successes.sort_by(|a, b| a.total_cmp(b));

    let n = successes.len();
    let value = if n % 2 == 1 {
        successes[n / 2]
    } else {
        (successes[n / 2 - 1] + successes[n / 2]) / 2.0
    };

    let agreement = if n == 1 {
        single_agreement
    } else {
        coefficient_of_variation(&successes).map_or(0.0, |cv| 1.0 - cv)
    };

    Some(Combined {
        value,
        agreement: agreement.clamp(0.0, 1.0),
        successes: n,
    })
}

/// Jack Daniels oxygen cost of running at `velocity` m/min
///
/// VO2 = −4.60 + 0.182258·v + 0.000104·v²
pub fn oxygen_cost(velocity: f64) -> f64 {
    -4.60 + 0.182258 * velocity + 0.000104 * velocity * velocity
}

/// Fraction of VO2max sustainable for `minutes`
///
/// %max = 0.8 + 0.1894393·e^(−0.012778·t) + 0.2989558·e^(−0.1932605·t)
pub fn sustainable_fraction(minutes: f64) -> f64 {
    0.8 + 0.1894393 * (-0.012778 * minutes).exp() + 0.2989558 * (-0.1932605 * minutes).exp()
}

/// Race time in seconds for `distance_km` at a given VDOT, solved by bisection
pub fn time_for_vdot(vdot: f64, distance_km: f64) -> Option<f64> {
    if !(vdot.is_finite() && vdot > 0.0 && distance_km > 0.0) {
        return None;
    }
    let meters = distance_km * 1000.0;
    let implied_vdot = |minutes: f64| oxygen_cost(meters / minutes) / sustainable_fraction(minutes);

    // 600 m/min down to 50 m/min brackets every plausible VDOT
    let mut fast = meters / 600.0;
    let mut slow = meters / 50.0;
    if implied_vdot(fast) < vdot || implied_vdot(slow) > vdot {
        return None;
    }

    for _ in 0..100 {
        let mid = (fast + slow) / 2.0;
        if implied_vdot(mid) > vdot {
            fast = mid;
        } else {
            slow = mid;
        }
        if slow - fast < 1e-6 {
            break;
        }
    }
    Some((fast + slow) / 2.0 * 60.0)
}

/// Ensemble race-time predictor
#[derive(Debug, Clone, Default)]
pub struct RacePredictor {
    config: PredictorConfig,
}

impl RacePredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PredictorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Predict a race time for `distance_km` from a fitness snapshot
    ///
    /// Never fails for lack of data: an invalid snapshot or no successful
    /// estimator yields the flagged conservative fallback.
    ///
    /// # Errors
    ///
    /// Returns `PredictionError::InvalidDistance` for a non-positive or non-finite distance.
    pub fn predict(
        &self,
        snapshot: &FitnessSnapshot,
        distance_km: f64,
    ) -> Result<RacePrediction, PredictionError> {
        if !(distance_km.is_finite() && distance_km > 0.0) {
            return Err(PredictionError::InvalidDistance(distance_km));
        }

        let Some(metrics) = snapshot.metrics() else {
            warn!(distance_km, "Invalid fitness snapshot, using fallback prediction");
            return Ok(self.fallback(distance_km));
        };

        let estimates = [
            (Estimator::Vdot, self.vdot_estimate(metrics, distance_km)),
            (Estimator::McMillan, self.mcmillan_estimate(metrics, distance_km)),
            (Estimator::Riegel, self.riegel_estimate(metrics, distance_km)),
            (Estimator::DirectPace, self.direct_pace_estimate(metrics, distance_km)),
        ];
        debug!(?estimates, distance_km, "Estimator outputs");

        let values: Vec<Option<f64>> = estimates.iter().map(|(_, v)| *v).collect();
        let Some(combined) = combine_estimates(&values, self.config.single_method_agreement) else {
            warn!(distance_km, "No estimator succeeded, using fallback prediction");
            return Ok(self.fallback(distance_km));
        };

        let data_quality =
            (metrics.activity_count as f64 / self.config.full_quality_activities).min(1.0);
        let confidence = data_quality.min(combined.agreement).clamp(0.0, 1.0);

        let method_breakdown = estimates
            .iter()
            .filter_map(|(method, value)| {
                value.filter(|v| v.is_finite() && *v > 0.0).map(|time_seconds| MethodEstimate {
                    method: *method,
                    time_seconds,
                })
            })
            .collect();

        let methodology = if combined.successes >= 2 {
            Methodology::EnsembleMedian
        } else {
            Methodology::SingleMethod
        };

        let mut warnings = Vec::new();
        if data_quality < 0.5 {
            warnings.push(format!(
                "Only {} recent runs available; prediction confidence is limited",
                metrics.activity_count
            ));
        }

        Ok(self.build_prediction(
            distance_km,
            combined.value,
            confidence,
            methodology,
            method_breakdown,
            self.estimated_vdot(metrics),
            warnings,
        ))
    }

    /// Cached variant of [`RacePredictor::predict`]
    pub fn predict_cached(
        &self,
        snapshot: &FitnessSnapshot,
        distance_km: f64,
        cache: &PredictionCache<RacePrediction>,
        now: DateTime<Utc>,
    ) -> Result<RacePrediction, PredictionError> {
        let key = Fingerprint::from_features("race_prediction", &Self::features(snapshot, distance_km));
        cache.get_or_try_insert_with(key, now, || self.predict(snapshot, distance_km))
    }

    /// Every snapshot value the estimators read
    fn features(snapshot: &FitnessSnapshot, distance_km: f64) -> Vec<f64> {
        let mut features = vec![distance_km];
        if let Some(m) = snapshot.metrics() {
            features.extend([
                m.current_pace,
                m.weekly_volume_km,
                m.training_consistency,
                m.longest_effort.distance_km,
                m.longest_effort.time_seconds,
                m.activity_count as f64,
            ]);
            features.extend(m.efforts.iter().flat_map(|e| [e.distance_km, e.pace]));
        }
        features
    }

    /// Adjusted VDOT from the nearest table pace, clamped
    pub fn estimated_vdot(&self, metrics: &SnapshotMetrics) -> Option<f64> {
        if metrics.current_pace <= 0.0 {
            return None;
        }
        let pace_min = metrics.current_pace / 60.0;
        let base = self
            .config
            .vdot_table
            .iter()
            .min_by(|a, b| {
                (a.pace_min_per_km - pace_min)
                    .abs()
                    .total_cmp(&(b.pace_min_per_km - pace_min).abs())
            })?
            .vdot;

        let volume_factor = (metrics.weekly_volume_km / self.config.vdot_reference_volume_km)
            .min(self.config.vdot_max_volume_factor);
        let consistency_factor = 0.8 + 0.2 * metrics.training_consistency;

        Some((base * volume_factor * consistency_factor).clamp(self.config.vdot_min, self.config.vdot_max))
    }

    fn vdot_estimate(&self, metrics: &SnapshotMetrics, distance_km: f64) -> Option<f64> {
        time_for_vdot(self.estimated_vdot(metrics)?, distance_km)
    }

    fn mcmillan_estimate(&self, metrics: &SnapshotMetrics, distance_km: f64) -> Option<f64> {
        if metrics.current_pace <= 0.0 {
            return None;
        }
        let ten_k = metrics.current_pace * self.config.race_pace_factor * 10.0;
        let time = match lookup_distance(
            &self.config.mcmillan_ratios,
            distance_km,
            self.config.distance_tolerance_km,
        ) {
            Some(ratio) => ten_k * ratio,
            None => self.riegel(ten_k, 10.0, distance_km),
        };
        Some(time)
    }

    fn riegel_estimate(&self, metrics: &SnapshotMetrics, distance_km: f64) -> Option<f64> {
        let longest = &metrics.longest_effort;
        if longest.distance_km <= 0.0 || longest.time_seconds <= 0.0 {
            return None;
        }
        Some(self.riegel(longest.time_seconds, longest.distance_km, distance_km))
    }

    fn direct_pace_estimate(&self, metrics: &SnapshotMetrics, distance_km: f64) -> Option<f64> {
        let min_distance = distance_km * self.config.direct_min_fraction;
        let best_pace = metrics
            .efforts
            .iter()
            .filter(|e| e.distance_km >= min_distance && e.pace > 0.0)
            .map(|e| e.pace)
            .min_by(|a, b| a.total_cmp(b))?;

        let multiplier = self
            .config
            .direct_multipliers
            .iter()
            .find(|entry| distance_km <= entry.distance_km)
            .map_or(self.config.direct_long_multiplier, |entry| entry.factor);

        Some(best_pace * multiplier * distance_km)
    }

    /// t2 = t1 · (d2 / d1)^exponent
    pub fn riegel(&self, base_time: f64, base_distance_km: f64, target_km: f64) -> f64 {
        base_time * (target_km / base_distance_km).powf(self.config.riegel_exponent)
    }

    /// Conservative flagged estimate from fixed paces
    pub fn fallback(&self, distance_km: f64) -> RacePrediction {
        let pace = lookup_distance(
            &self.config.fallback_paces,
            distance_km,
            self.config.distance_tolerance_km,
        )
        .unwrap_or(self.config.fallback_default_pace);

        self.build_prediction(
            distance_km,
            pace * distance_km,
            self.config.fallback_confidence,
            Methodology::FallbackConservativeEstimate,
            Vec::new(),
            None,
            vec!["Insufficient recent running data; showing a conservative estimate".to_string()],
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_prediction(
        &self,
        distance_km: f64,
        time_seconds: f64,
        confidence: f64,
        methodology: Methodology,
        method_breakdown: Vec<MethodEstimate>,
        estimated_vdot: Option<f64>,
        warnings: Vec<String>,
    ) -> RacePrediction {
        let pace = time_seconds / distance_km;
        RacePrediction {
            distance_km,
            predicted_time_seconds: time_seconds,
            predicted_pace: pace,
            formatted_time: format_duration(time_seconds),
            formatted_pace: format_pace(pace),
            confidence: confidence.clamp(0.0, 1.0),
            methodology,
            method_breakdown,
            estimated_vdot,
            pacing_strategy: pacing_strategy(distance_km, pace),
            warnings,
            race_day_projection: None,
        }
    }
}

/// Kilometre splits: even up to 10 km, otherwise conservative start and faster finish
pub fn pacing_strategy(distance_km: f64, pace: f64) -> Vec<KmSplit> {
    let kilometres = distance_km.ceil().max(1.0) as u32;
    (1..=kilometres)
        .map(|km| {
            let factor = if distance_km <= 10.0 {
                1.0
            } else if km <= 3 {
                1.03
            } else if (km as f64) <= distance_km * 0.8 {
                1.0
            } else {
                0.98
            };
            KmSplit {
                km,
                target_pace: pace * factor,
            }
        })
        .collect()
}
