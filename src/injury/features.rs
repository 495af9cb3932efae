use crate::fitness::{coefficient_of_variation, linear_slope};
use crate::models::{ActivityRecord, AthleteProfile};
use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Feature extraction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Days of history ending at `as_of`
    pub window_days: u32,
    /// Runs shorter than this count as recovery runs
    pub recovery_run_max_km: f64,
    /// Most recent activities inspected for efficiency decline
    pub efficiency_window: usize,
    /// Upper bound of the easy zones as a fraction of max HR
    pub easy_zone_ceiling: f64,
    /// Lower bound of the hard zones as a fraction of max HR
    pub hard_zone_floor: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            recovery_run_max_km: 5.0,
            efficiency_window: 10,
            easy_zone_ceiling: 0.7,
            hard_zone_floor: 0.8,
        }
    }
}

/// Training-load features feeding both scorers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFeatures {
    pub activity_count: usize,
    /// Largest positive week-over-week distance increase, as a fraction
    pub weekly_load_increase: f64,
    /// Mean pace over its standard deviation
    pub training_monotony: f64,
    pub max_consecutive_days: u32,
    pub recovery_run_ratio: f64,
    /// Easy time over easy plus hard time; `None` without heart-rate data
    pub polarization_index: Option<f64>,
    pub pace_variability: f64,
    /// `None` without cadence data
    pub cadence_variability: Option<f64>,
    pub efficiency_decline: bool,
    pub avg_weekly_distance_km: f64,
    pub avg_rest_days: f64,
    /// `min(10 · weekly_load_increase, 1)`
    pub progression_risk: f64,
}

impl RiskFeatures {
    /// Column order of [`RiskFeatures::to_vector`]
    pub const NAMES: [&'static str; 11] = [
        "weekly_load_increase",
        "training_monotony",
        "max_consecutive_days",
        "recovery_run_ratio",
        "polarization_index",
        "pace_variability",
        "cadence_variability",
        "efficiency_decline",
        "avg_weekly_distance_km",
        "avg_rest_days",
        "progression_risk",
    ];

    /// Dense numeric vector; missing optional features are encoded as 0
    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            self.weekly_load_increase,
            self.training_monotony,
            self.max_consecutive_days as f64,
            self.recovery_run_ratio,
            self.polarization_index.unwrap_or(0.0),
            self.pace_variability,
            self.cadence_variability.unwrap_or(0.0),
            if self.efficiency_decline { 1.0 } else { 0.0 },
            self.avg_weekly_distance_km,
            self.avg_rest_days,
            self.progression_risk,
        ]
    }
}

/// Derives [`RiskFeatures`] from an activity window
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Extract features for the window ending at `as_of` (default: latest activity)
    ///
    /// Returns `None` when no activity in the window has distance and time.
    pub fn extract(
        &self,
        activities: &[ActivityRecord],
        athlete: &AthleteProfile,
        as_of: Option<NaiveDate>,
    ) -> Option<RiskFeatures> {
        let as_of = as_of.or_else(|| activities.iter().map(|a| a.date()).max())?;
        let window_start = as_of
            .checked_sub_days(Days::new(self.config.window_days as u64))
            .unwrap_or(NaiveDate::MIN);

        let mut window: Vec<&ActivityRecord> = activities
            .iter()
            .filter(|a| a.date() > window_start && a.date() <= as_of)
            .filter(|a| a.has_distance_and_time())
            .collect();
        if window.is_empty() {
            return None;
        }
        window.sort_by_key(|a| a.start_time);

        let paces: Vec<f64> = window.iter().filter_map(|a| a.pace_sec_per_km()).collect();
        let cadences: Vec<f64> = window
            .iter()
            .filter_map(|a| a.average_cadence)
            .filter(|c| *c > 0.0)
            .collect();

        let weekly_load_increase = Self::max_weekly_increase(&window);
        let recovery_runs = window
            .iter()
            .filter(|a| a.distance_km() < self.config.recovery_run_max_km)
            .count();
        let total_km: f64 = window.iter().map(|a| a.distance_km()).sum();
        let window_weeks = (self.config.window_days as f64 / 7.0).max(1.0);

        let mut days: Vec<NaiveDate> = window.iter().map(|a| a.date()).collect();
        days.dedup();

        Some(RiskFeatures {
            activity_count: window.len(),
            weekly_load_increase,
            training_monotony: Self::monotony(&paces),
            max_consecutive_days: Self::max_consecutive_days(&days),
            recovery_run_ratio: recovery_runs as f64 / window.len() as f64,
            polarization_index: self.polarization_index(&window, athlete),
            pace_variability: coefficient_of_variation(&paces).unwrap_or(0.0),
            cadence_variability: coefficient_of_variation(&cadences),
            efficiency_decline: self.efficiency_decline(&window),
            avg_weekly_distance_km: total_km / window_weeks,
            avg_rest_days: Self::avg_rest_days(&days),
            progression_risk: (weekly_load_increase * 10.0).min(1.0),
        })
    }

    /// Max positive change between consecutive ISO weeks that have activity
    fn max_weekly_increase(window: &[&ActivityRecord]) -> f64 {
        let mut weeks: BTreeMap<(i32, u32), f64> = BTreeMap::new();
        for activity in window {
            let week = activity.date().iso_week();
            *weeks.entry((week.year(), week.week())).or_insert(0.0) += activity.distance_km();
        }

        let distances: Vec<f64> = weeks.into_values().collect();
        distances
            .windows(2)
            .filter(|pair| pair[0] > 0.0)
            .map(|pair| (pair[1] - pair[0]) / pair[0])
            .filter(|change| *change > 0.0)
            .fold(0.0, f64::max)
    }

    fn monotony(paces: &[f64]) -> f64 {
        if paces.len() < 2 {
            return 0.0;
        }
        let std_dev = paces.iter().population_std_dev();
        if std_dev > 0.0 {
            paces.iter().mean() / std_dev
        } else {
            0.0
        }
    }

    /// Longest run of consecutive calendar days with training; `days` sorted and unique
    fn max_consecutive_days(days: &[NaiveDate]) -> u32 {
        let mut longest = 0;
        let mut current = 0;
        let mut previous: Option<NaiveDate> = None;
        for day in days {
            current = match previous {
                Some(prev) if prev.succ_opt() == Some(*day) => current + 1,
                _ => 1,
            };
            longest = longest.max(current);
            previous = Some(*day);
        }
        longest
    }

    fn avg_rest_days(days: &[NaiveDate]) -> f64 {
        let gaps: Vec<f64> = days
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_days() - 1)
            .filter(|rest| *rest > 0)
            .map(|rest| rest as f64)
            .collect();
        if gaps.is_empty() {
            0.0
        } else {
            gaps.iter().mean()
        }
    }

    /// Easy over easy-plus-hard moving time on the athlete's max-HR zones
    fn polarization_index(&self, window: &[&ActivityRecord], athlete: &AthleteProfile) -> Option<f64> {
        let max_hr = athlete.max_hr.filter(|hr| *hr > 0)? as f64;

        let mut easy = 0.0;
        let mut hard = 0.0;
        let mut with_hr = 0;
        for activity in window {
            let Some(hr) = activity.average_heartrate.filter(|hr| *hr > 0.0) else {
                continue;
            };
            with_hr += 1;
            let minutes = activity.moving_time_seconds as f64 / 60.0;
            let fraction = hr / max_hr;
            if fraction < self.config.easy_zone_ceiling {
                easy += minutes;
            } else if fraction >= self.config.hard_zone_floor {
                hard += minutes;
            }
        }

        if with_hr == 0 {
            return None;
        }
        if easy + hard > 0.0 {
            Some(easy / (easy + hard))
        } else {
            Some(0.0)
        }
    }

    /// Pace slowing while heart rate rises over the most recent activities
    fn efficiency_decline(&self, window: &[&ActivityRecord]) -> bool {
        let start = window.len().saturating_sub(self.config.efficiency_window);
        let recent = &window[start..];

        let paces: Vec<f64> = recent.iter().filter_map(|a| a.pace_sec_per_km()).collect();
        let heart_rates: Vec<f64> = recent.iter().filter_map(|a| a.average_heartrate).collect();
        if paces.len() < 2 || heart_rates.len() < 2 {
            return false;
        }
        linear_slope(&paces) > 0.0 && linear_slope(&heart_rates) > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SportType;
    use chrono::{TimeZone, Utc};

    fn run(month: u32, day: u32, km: f64, pace: f64) -> ActivityRecord {
        let start = Utc.with_ymd_and_hms(2024, month, day, 7, 0, 0).unwrap();
        ActivityRecord::new(start, SportType::Run, km * 1000.0, (km * pace) as u32)
    }

    #[test]
    fn test_no_usable_activities() {
        let extractor = FeatureExtractor::new();
        assert!(extractor.extract(&[], &AthleteProfile::default(), None).is_none());

        let mut broken = run(3, 4, 5.0, 300.0);
        broken.moving_time_seconds = 0;
        assert!(extractor
            .extract(&[broken], &AthleteProfile::default(), None)
            .is_none());
    }

    #[test]
    fn test_weekly_increase_only_counts_growth() {
        let extractor = FeatureExtractor::new();
        // 2024-03-04 is a Monday
        let activities = vec![
            run(3, 4, 10.0, 300.0),
            run(3, 6, 10.0, 300.0),
            run(3, 11, 20.0, 300.0),
            run(3, 13, 15.0, 300.0),
            run(3, 18, 10.0, 300.0),
        ];
        let features = extractor
            .extract(&activities, &AthleteProfile::default(), None)
            .unwrap();
        assert!((features.weekly_load_increase - 0.75).abs() < 1e-9);
        assert_eq!(features.progression_risk, 1.0);
    }

    #[test]
    fn test_consecutive_days_and_rest() {
        let extractor = FeatureExtractor::new();
        let mut activities: Vec<ActivityRecord> =
            (1..=8).map(|d| run(3, d, 6.0, 320.0)).collect();
        activities.push(run(3, 12, 6.0, 320.0));

        let features = extractor
            .extract(&activities, &AthleteProfile::default(), None)
            .unwrap();
        assert_eq!(features.max_consecutive_days, 8);
        assert_eq!(features.avg_rest_days, 3.0);
        assert_eq!(features.recovery_run_ratio, 0.0);
    }

    #[test]
    fn test_monotony_uses_pace_spread() {
        let extractor = FeatureExtractor::new();
        let activities = vec![run(3, 1, 8.0, 290.0), run(3, 3, 8.0, 310.0)];
        let features = extractor
            .extract(&activities, &AthleteProfile::default(), None)
            .unwrap();
        assert!((features.training_monotony - 30.0).abs() < 1e-9);

        let flat = vec![run(3, 1, 8.0, 300.0), run(3, 3, 8.0, 300.0)];
        let features = extractor.extract(&flat, &AthleteProfile::default(), None).unwrap();
        assert_eq!(features.training_monotony, 0.0);
    }

    #[test]
    fn test_polarization_requires_heart_rate() {
        let extractor = FeatureExtractor::new();
        let athlete = AthleteProfile {
            max_hr: Some(200),
            ..AthleteProfile::default()
        };
        let mut easy = run(3, 1, 10.0, 330.0);
        easy.average_heartrate = Some(130.0);
        let mut hard = run(3, 3, 5.0, 270.0);
        hard.average_heartrate = Some(175.0);

        let without_hr = vec![run(3, 1, 10.0, 330.0)];
        assert_eq!(
            extractor.extract(&without_hr, &athlete, None).unwrap().polarization_index,
            None
        );

        let features = extractor.extract(&[easy, hard], &athlete, None).unwrap();
        let easy_minutes = 3300.0 / 60.0;
        let hard_minutes = 1350.0 / 60.0;
        let expected = easy_minutes / (easy_minutes + hard_minutes);
        assert!((features.polarization_index.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_efficiency_decline() {
        let extractor = FeatureExtractor::new();
        let activities: Vec<ActivityRecord> = (0..5)
            .map(|i| {
                let mut a = run(3, 1 + i * 2, 8.0, 300.0 + i as f64 * 5.0);
                a.average_heartrate = Some(150.0 + i as f64 * 2.0);
                a
            })
            .collect();
        let features = extractor
            .extract(&activities, &AthleteProfile::default(), None)
            .unwrap();
        assert!(features.efficiency_decline);
        assert_eq!(features.cadence_variability, None);
        assert_eq!(features.to_vector().len(), RiskFeatures::NAMES.len());
    }
}
