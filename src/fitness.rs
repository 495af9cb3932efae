use crate::models::ActivityRecord;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};
use tracing::debug;

/// Snapshot builder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Days of history ending at `as_of`
    pub window_days: u32,

    /// Minimum qualifying distance in meters (exclusive)
    pub min_distance_m: f64,

    /// Minimum qualifying moving time in seconds (exclusive)
    pub min_moving_time_s: u32,

    /// Qualifying runs needed for a valid snapshot
    pub min_activities: usize,

    /// Recency weight decay, weight = exp(-decay · rank)
    pub recency_decay: f64,

    /// Most recent efforts used for the pace-trend slope
    pub trend_efforts: usize,

    /// Runs per week expected from a fully consistent athlete
    pub expected_runs_per_week: f64,

    /// Effort distances (km) that approximate threshold pace
    pub threshold_min_km: f64,
    pub threshold_max_km: f64,

    /// Threshold pace as a fraction of current pace when no effort fits
    pub threshold_fallback_factor: f64,

    pub best_effort_count: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_distance_m: 2000.0,
            min_moving_time_s: 600,
            min_activities: 3,
            recency_decay: 0.2,
            trend_efforts: 5,
            expected_runs_per_week: 3.0,
            threshold_min_km: 8.0,
            threshold_max_km: 15.0,
            threshold_fallback_factor: 0.95,
            best_effort_count: 5,
        }
    }
}

/// One qualifying run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effort {
    pub start_time: DateTime<Utc>,
    pub distance_km: f64,
    pub time_seconds: f64,
    /// Seconds per km
    pub pace: f64,
}

impl Effort {
    fn from_activity(activity: &ActivityRecord) -> Option<Self> {
        let pace = activity.pace_sec_per_km()?;
        Some(Self {
            start_time: activity.start_time,
            distance_km: activity.distance_km(),
            time_seconds: activity.moving_time_seconds as f64,
            pace,
        })
    }
}

/// Point-in-time fitness features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    pub as_of: NaiveDate,

    /// Recency-weighted pace, seconds per km
    pub current_pace: f64,

    pub weekly_volume_km: f64,

    /// Pace slope in s/km per effort, negative = improving
    pub pace_trend: f64,

    /// Relative pace change between window halves, positive = improving
    pub form_trend: f64,

    /// Activity count over the count expected for a consistent athlete
    pub training_consistency: f64,

    pub longest_recent_km: f64,

    pub longest_effort: Effort,

    /// Fastest efforts in the window, fastest first
    pub best_efforts: Vec<Effort>,

    /// Seconds per km
    pub threshold_pace: f64,

    /// Qualifying runs in the window
    pub activity_count: usize,

    /// Running activities supplied, any date
    pub history_count: usize,

    /// Qualifying runs in chronological order
    pub efforts: Vec<Effort>,
}

/// Snapshot result; consumers must branch on validity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FitnessSnapshot {
    Valid(SnapshotMetrics),
    Invalid { reason: String, activity_count: usize },
}

impl FitnessSnapshot {
    pub fn is_valid(&self) -> bool {
        matches!(self, FitnessSnapshot::Valid(_))
    }

    pub fn metrics(&self) -> Option<&SnapshotMetrics> {
        match self {
            FitnessSnapshot::Valid(metrics) => Some(metrics),
            FitnessSnapshot::Invalid { .. } => None,
        }
    }

    pub fn activity_count(&self) -> usize {
        match self {
            FitnessSnapshot::Valid(metrics) => metrics.activity_count,
            FitnessSnapshot::Invalid { activity_count, .. } => *activity_count,
        }
    }
}

/// Builds fitness snapshots from raw activity records
#[derive(Debug, Clone, Default)]
pub struct FitnessSnapshotBuilder {
    config: SnapshotConfig,
}

impl FitnessSnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SnapshotConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Summarise recent running activity as of `as_of`
    ///
    /// `as_of` defaults to the date of the most recent activity supplied.
    pub fn build(&self, activities: &[ActivityRecord], as_of: Option<NaiveDate>) -> FitnessSnapshot {
        let Some(as_of) = as_of.or_else(|| activities.iter().map(|a| a.date()).max()) else {
            return FitnessSnapshot::Invalid {
                reason: "No activities supplied".to_string(),
                activity_count: 0,
            };
        };

        let window_start = as_of
            .checked_sub_days(Days::new(self.config.window_days as u64))
            .unwrap_or(NaiveDate::MIN);

        let history_count = activities.iter().filter(|a| a.sport.is_running()).count();

        let mut efforts: Vec<Effort> = activities
            .iter()
            .filter(|a| a.date() > window_start && a.date() <= as_of)
            .filter(|a| self.qualifies(a))
            .filter_map(Effort::from_activity)
            .collect();
        efforts.sort_by_key(|e| e.start_time);

        if efforts.len() < self.config.min_activities {
            debug!(
                qualifying = efforts.len(),
                required = self.config.min_activities,
                "Not enough qualifying runs for a fitness snapshot"
            );
            return FitnessSnapshot::Invalid {
                reason: format!(
                    "Need at least {} qualifying runs in the last {} days, found {}",
                    self.config.min_activities,
                    self.config.window_days,
                    efforts.len()
                ),
                activity_count: efforts.len(),
            };
        }

        let current_pace = self.current_pace(&efforts);
        let longest_effort = efforts
            .iter()
            .max_by(|a, b| a.distance_km.total_cmp(&b.distance_km))
            .cloned()
            .unwrap_or_else(|| efforts[0].clone());

        let mut best_efforts = efforts.clone();
        best_efforts.sort_by(|a, b| a.pace.total_cmp(&b.pace));
        best_efforts.truncate(self.config.best_effort_count);

        let metrics = SnapshotMetrics {
            as_of,
            current_pace,
            weekly_volume_km: Self::weekly_volume(&efforts),
            pace_trend: self.pace_trend(&efforts),
            form_trend: Self::form_trend(&efforts),
            training_consistency: self.consistency(efforts.len()),
            longest_recent_km: longest_effort.distance_km,
            longest_effort,
            best_efforts,
            threshold_pace: self.threshold_pace(&efforts, current_pace),
            activity_count: efforts.len(),
            history_count,
            efforts,
        };

        debug!(
            current_pace = metrics.current_pace,
            weekly_volume_km = metrics.weekly_volume_km,
            activity_count = metrics.activity_count,
            "Built fitness snapshot"
        );
        FitnessSnapshot::Valid(metrics)
    }

    fn qualifies(&self, activity: &ActivityRecord) -> bool {
        activity.sport.is_running()
            && activity
                .usable_distance()
                .is_some_and(|d| d > self.config.min_distance_m)
            && activity.moving_time_seconds > self.config.min_moving_time_s
    }

    /// Recency-weighted mean pace, most recent effort has rank 0
    fn current_pace(&self, efforts: &[Effort]) -> f64 {
        let (weighted, total_weight) = efforts
            .iter()
            .rev()
            .enumerate()
            .fold((0.0, 0.0), |(sum, weights), (rank, effort)| {
                let weight = (-(rank as f64) * self.config.recency_decay).exp();
                (sum + effort.pace * weight, weights + weight)
            });
        weighted / total_weight
    }

    /// Total km over the spanned weeks, at least one week
    fn weekly_volume(efforts: &[Effort]) -> f64 {
        let total_km: f64 = efforts.iter().map(|e| e.distance_km).sum();
        let span_days = match (efforts.first(), efforts.last()) {
            (Some(first), Some(last)) => (last.start_time - first.start_time).num_days() as f64,
            _ => 0.0,
        };
        total_km / (span_days / 7.0).max(1.0)
    }

    /// Slope of pace over the most recent efforts, 0 with fewer than 3
    fn pace_trend(&self, efforts: &[Effort]) -> f64 {
        let start = efforts.len().saturating_sub(self.config.trend_efforts);
        let recent: Vec<f64> = efforts[start..].iter().map(|e| e.pace).collect();
        if recent.len() < 3 {
            return 0.0;
        }
        linear_slope(&recent)
    }

    /// (older − recent) / older over the two halves, 0 with fewer than 6
    fn form_trend(efforts: &[Effort]) -> f64 {
        if efforts.len() < 6 {
            return 0.0;
        }
        let mid = efforts.len() / 2;
        let older = efforts[..mid].iter().map(|e| e.pace).mean();
        let recent = efforts[mid..].iter().map(|e| e.pace).mean();
        if older <= 0.0 {
            return 0.0;
        }
        (older - recent) / older
    }

    fn consistency(&self, count: usize) -> f64 {
        let weeks = self.config.window_days as f64 / 7.0;
        let expected = self.config.expected_runs_per_week * weeks;
        if expected <= 0.0 {
            return 0.0;
        }
        count as f64 / expected
    }

    /// Median pace of threshold-length efforts, else a fraction of current pace
    fn threshold_pace(&self, efforts: &[Effort], current_pace: f64) -> f64 {
        let paces: Vec<f64> = efforts
            .iter()
            .filter(|e| {
                e.distance_km >= self.config.threshold_min_km
                    && e.distance_km <= self.config.threshold_max_km
            })
            .map(|e| e.pace)
            .collect();

        if paces.is_empty() {
            current_pace * self.config.threshold_fallback_factor
        } else {
            Data::new(paces).median()
        }
    }
}

/// Least-squares slope of `values` against their index
pub(crate) fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n as f64 - 1.0) / 2.0;
    let y_mean = values.iter().mean();

    let (numerator, denominator) = values.iter().enumerate().fold(
        (0.0, 0.0),
        |(num, den), (i, y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        },
    );
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Population coefficient of variation, `None` for empty or zero-mean input
pub(crate) fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().mean();
    if mean == 0.0 {
        return None;
    }
    Some(values.iter().population_std_dev() / mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SportType;
    use chrono::TimeZone;

    fn run_on(day: u32, distance_m: f64, pace: f64) -> ActivityRecord {
        let start = Utc.with_ymd_and_hms(2024, 5, day, 7, 0, 0).unwrap();
        let seconds = (distance_m / 1000.0 * pace).round() as u32;
        ActivityRecord::new(start, SportType::Run, distance_m, seconds)
    }

    #[test]
    fn test_insufficient_runs_is_invalid() {
        let builder = FitnessSnapshotBuilder::new();
        let activities = vec![run_on(1, 5000.0, 300.0), run_on(3, 5000.0, 300.0)];

        let snapshot = builder.build(&activities, None);
        assert!(!snapshot.is_valid());
        assert_eq!(snapshot.activity_count(), 2);
        match snapshot {
            FitnessSnapshot::Invalid { reason, .. } => assert!(reason.contains("found 2")),
            FitnessSnapshot::Valid(_) => panic!("expected invalid snapshot"),
        }
    }

    #[test]
    fn test_no_activities_is_invalid() {
        let snapshot = FitnessSnapshotBuilder::new().build(&[], None);
        assert!(!snapshot.is_valid());
    }

    #[test]
    fn test_filters_non_qualifying_activities() {
        let builder = FitnessSnapshotBuilder::new();
        let start = Utc.with_ymd_and_hms(2024, 5, 4, 7, 0, 0).unwrap();
        let activities = vec![
            run_on(1, 5000.0, 300.0),
            run_on(2, 1500.0, 300.0), // too short
            run_on(3, 5000.0, 300.0),
            ActivityRecord::new(start, SportType::Ride, 30_000.0, 3600),
        ];
        assert!(!builder.build(&activities, None).is_valid());
    }

    #[test]
    fn test_recency_weighted_pace() {
        let builder = FitnessSnapshotBuilder::new();
        let activities = vec![
            run_on(1, 5000.0, 330.0),
            run_on(3, 5000.0, 320.0),
            run_on(5, 5000.0, 300.0),
        ];
        let snapshot = builder.build(&activities, None);
        let metrics = snapshot.metrics().unwrap();

        let weights = [1.0, (-0.2f64).exp(), (-0.4f64).exp()];
        let expected = (300.0 * weights[0] + 320.0 * weights[1] + 330.0 * weights[2])
            / weights.iter().sum::<f64>();
        assert!((metrics.current_pace - expected).abs() < 1e-9);
        assert!(metrics.current_pace < 320.0);
        assert!(metrics.pace_trend < 0.0);
        assert_eq!(metrics.as_of, NaiveDate::from_ymd_opt(2024, 5, 5).unwrap());
    }

    #[test]
    fn test_volume_and_consistency() {
        let builder = FitnessSnapshotBuilder::new();
        let activities: Vec<ActivityRecord> = (0..5)
            .map(|week| run_on(1 + week * 7, 10_000.0, 300.0))
            .collect();
        let metrics = builder.build(&activities, None).metrics().cloned().unwrap();

        // 50 km over a 28-day span
        assert!((metrics.weekly_volume_km - 12.5).abs() < 1e-9);
        assert!((metrics.training_consistency - 5.0 / (3.0 * 30.0 / 7.0)).abs() < 1e-9);
        assert_eq!(metrics.longest_recent_km, 10.0);
        assert_eq!(metrics.threshold_pace, 300.0);
    }

    #[test]
    fn test_threshold_pace_fallback() {
        let builder = FitnessSnapshotBuilder::new();
        let activities = vec![
            run_on(1, 5000.0, 300.0),
            run_on(2, 5000.0, 300.0),
            run_on(3, 5000.0, 300.0),
        ];
        let metrics = builder.build(&activities, None).metrics().cloned().unwrap();
        assert!((metrics.threshold_pace - 285.0).abs() < 1e-9);
        assert_eq!(metrics.form_trend, 0.0);
    }

    #[test]
    fn test_form_trend_positive_when_getting_faster() {
        let builder = FitnessSnapshotBuilder::new();
        let activities: Vec<ActivityRecord> = [340.0, 335.0, 330.0, 310.0, 305.0, 300.0]
            .iter()
            .enumerate()
            .map(|(i, pace)| run_on(1 + i as u32 * 2, 6000.0, *pace))
            .collect();
        let metrics = builder.build(&activities, None).metrics().cloned().unwrap();
        assert!(metrics.form_trend > 0.0);
        assert_eq!(metrics.best_efforts[0].pace, 300.0);
        assert_eq!(metrics.history_count, 6);
    }

    #[test]
    fn test_window_excludes_old_runs() {
        let builder = FitnessSnapshotBuilder::new();
        let activities = vec![
            run_on(1, 5000.0, 300.0),
            run_on(2, 5000.0, 300.0),
            run_on(3, 5000.0, 300.0),
        ];
        let as_of = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let snapshot = builder.build(&activities, Some(as_of));
        assert!(!snapshot.is_valid());
    }

    #[test]
    fn test_linear_slope() {
        assert!((linear_slope(&[1.0, 2.0, 3.0, 4.0]) - 1.0).abs() < 1e-12);
        assert_eq!(linear_slope(&[5.0, 5.0, 5.0]), 0.0);
        assert_eq!(linear_slope(&[5.0]), 0.0);
    }

    #[test]
    fn test_coefficient_of_variation() {
        assert_eq!(coefficient_of_variation(&[]), None);
        assert_eq!(coefficient_of_variation(&[4.0, 4.0]), Some(0.0));
        let cv = coefficient_of_variation(&[2.0, 4.0]).unwrap();
        assert!((cv - 1.0 / 3.0).abs() < 1e-12);
    }
}
