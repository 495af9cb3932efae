use crate::error::TssError;
use crate::models::{ActivityRecord, AthleteProfile, SportType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One step of an intensity lookup table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityBand {
    pub threshold: f64,
    pub intensity: f64,
}

/// Step function mapping a ratio to an intensity factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityTable {
    pub bands: Vec<IntensityBand>,
    /// Intensity used when no band matches
    pub otherwise: f64,
}

impl IntensityTable {
    /// First band whose threshold is strictly above `ratio` (bands ascending)
    pub fn lookup_below(&self, ratio: f64) -> f64 {
        self.bands
            .iter()
            .find(|band| ratio < band.threshold)
            .map_or(self.otherwise, |band| band.intensity)
    }

    /// First band whose threshold is strictly below `ratio` (bands descending)
    pub fn lookup_above(&self, ratio: f64) -> f64 {
        self.bands
            .iter()
            .find(|band| ratio > band.threshold)
            .map_or(self.otherwise, |band| band.intensity)
    }

    fn from_pairs(pairs: &[(f64, f64)], otherwise: f64) -> Self {
        Self {
            bands: pairs
                .iter()
                .map(|&(threshold, intensity)| IntensityBand { threshold, intensity })
                .collect(),
            otherwise,
        }
    }
}

/// How the heart-rate ratio is normalised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HrBasis {
    /// avg_hr / max_hr
    MaxHr,
    /// (avg_hr - resting_hr) / (max_hr - resting_hr)
    HeartRateReserve,
}

/// Flat intensities for the duration-only fallback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackIntensities {
    pub run: f64,
    pub ride: f64,
    pub swim: f64,
    pub walk_hike: f64,
    pub other: f64,
}

impl Default for FallbackIntensities {
    fn default() -> Self {
        Self {
            run: 0.75,
            ride: 0.70,
            swim: 0.80,
            walk_hike: 0.55,
            other: 0.65,
        }
    }
}

impl FallbackIntensities {
    pub fn for_sport(&self, sport: SportType) -> f64 {
        match sport {
            s if s.is_running() => self.run,
            SportType::Ride | SportType::VirtualRide => self.ride,
            SportType::Swim => self.swim,
            SportType::Walk | SportType::Hike => self.walk_hike,
            _ => self.other,
        }
    }
}

/// Linear piece of the elevation multiplier, active above `from_gain_per_km`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationSegment {
    pub from_gain_per_km: f64,
    pub base: f64,
    pub slope: f64,
}

/// Elevation stress adjustment parameters (empirical, pinned)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationConfig {
    /// Segments in ascending order of `from_gain_per_km`; below the first one the multiplier is 1.0
    pub segments: Vec<ElevationSegment>,
    /// Gain per km above which descents add eccentric load
    pub eccentric_threshold: f64,
    pub eccentric_factor: f64,
    pub max_multiplier: f64,
    /// Multipliers above this are logged
    pub log_threshold: f64,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        let segment = |from_gain_per_km, base, slope| ElevationSegment {
            from_gain_per_km,
            base,
            slope,
        };
        Self {
            segments: vec![
                segment(10.0, 1.05, 0.003),
                segment(30.0, 1.11, 0.005),
                segment(60.0, 1.26, 0.007),
                segment(100.0, 1.54, 0.003),
            ],
            eccentric_threshold: 50.0,
            eccentric_factor: 1.05,
            max_multiplier: 2.0,
            log_threshold: 1.15,
        }
    }
}

/// TSS calculation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TssConfig {
    pub hr_basis: HrBasis,
    /// Heart-rate ratio bands, ascending
    pub hr_intensity: IntensityTable,
    /// Pace / threshold-pace ratio bands, descending
    pub pace_intensity: IntensityTable,
    /// Threshold pace (s/km) assumed when the profile has none
    pub assumed_threshold_pace: f64,
    pub fallback: FallbackIntensities,
    pub elevation: ElevationConfig,
}

impl Default for TssConfig {
    fn default() -> Self {
        Self {
            hr_basis: HrBasis::MaxHr,
            hr_intensity: IntensityTable::from_pairs(
                &[(0.6, 0.5), (0.7, 0.65), (0.8, 0.8), (0.9, 0.95)],
                1.2,
            ),
            pace_intensity: IntensityTable::from_pairs(
                &[(1.2, 0.6), (1.05, 0.75), (0.95, 1.0), (0.85, 1.15)],
                1.3,
            ),
            assumed_threshold_pace: 390.0,
            fallback: FallbackIntensities::default(),
            elevation: ElevationConfig::default(),
        }
    }
}

impl TssConfig {
    pub fn validate(&self) -> Result<(), TssError> {
        if self.assumed_threshold_pace <= 0.0 {
            return Err(TssError::InvalidConfig {
                field: "assumed_threshold_pace".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.elevation.max_multiplier < 1.0 {
            return Err(TssError::InvalidConfig {
                field: "elevation.max_multiplier".to_string(),
                reason: "must be at least 1.0".to_string(),
            });
        }
        let ascending = self
            .elevation
            .segments
            .windows(2)
            .all(|w| w[0].from_gain_per_km < w[1].from_gain_per_km);
        if !ascending {
            return Err(TssError::InvalidConfig {
                field: "elevation.segments".to_string(),
                reason: "segments must be sorted by from_gain_per_km".to_string(),
            });
        }
        Ok(())
    }
}

/// TSS calculation result with method used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TssResult {
    pub tss: f64,
    pub method: TssMethod,
    pub intensity_factor: f64,
    pub elevation_multiplier: f64,
}

impl TssResult {
    fn unscored() -> Self {
        Self {
            tss: 0.0,
            method: TssMethod::Unscored,
            intensity_factor: 0.0,
            elevation_multiplier: 1.0,
        }
    }
}

/// Methods used for TSS calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TssMethod {
    HeartRateBased, // hrTSS from heart-rate ratio bands
    PaceBased,      // rTSS from pace / threshold ratio
    DurationBased,  // sport-specific flat intensity
    Unscored,       // missing distance or duration
}

/// Core TSS calculation engine
#[derive(Debug, Clone, Default)]
pub struct TssCalculator {
    config: TssConfig,
}

impl TssCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TssConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TssConfig {
        &self.config
    }

    /// TSS for one activity, never negative
    pub fn calculate_tss(&self, activity: &ActivityRecord, athlete: &AthleteProfile) -> f64 {
        self.calculate(activity, athlete).tss
    }

    /// Calculate TSS using the best available signal, then adjust for elevation
    ///
    /// Priority: heart rate, pace (running only), sport duration fallback.
    /// Zero or missing distance/duration yields 0.
    pub fn calculate(&self, activity: &ActivityRecord, athlete: &AthleteProfile) -> TssResult {
        if !activity.has_distance_and_time() {
            debug!(sport = %activity.sport, "Activity lacks distance or duration, TSS = 0");
            return TssResult::unscored();
        }

        let (method, intensity_factor) = if let Some(ratio) = self.hr_ratio(activity, athlete) {
            (TssMethod::HeartRateBased, self.config.hr_intensity.lookup_below(ratio))
        } else if let Some(ratio) = self.pace_ratio(activity, athlete) {
            (TssMethod::PaceBased, self.config.pace_intensity.lookup_above(ratio))
        } else {
            (TssMethod::DurationBased, self.config.fallback.for_sport(activity.sport))
        };
        debug!(?method, intensity_factor, "Selected TSS method");

        // TSS = duration_hours × IF² × 100
        let base_tss = activity.duration_hours() * intensity_factor * intensity_factor * 100.0;
        let elevation_multiplier = self.activity_elevation_multiplier(activity);
        let tss = (base_tss * elevation_multiplier).max(0.0);

        if elevation_multiplier > self.config.elevation.log_threshold {
            info!(
                elevation_multiplier = format!("{:.2}", elevation_multiplier),
                base_tss = format!("{:.1}", base_tss),
                adjusted_tss = format!("{:.1}", tss),
                "Applied elevation adjustment"
            );
        }

        TssResult {
            tss,
            method,
            intensity_factor,
            elevation_multiplier,
        }
    }

    /// Normalised heart-rate ratio clamped to [0, 1]
    fn hr_ratio(&self, activity: &ActivityRecord, athlete: &AthleteProfile) -> Option<f64> {
        let avg_hr = activity.average_heartrate.filter(|hr| *hr > 0.0)?;
        let max_hr = athlete.max_hr.filter(|hr| *hr > 0)? as f64;

        let ratio = match (self.config.hr_basis, athlete.resting_hr) {
            (HrBasis::HeartRateReserve, Some(rest)) if max_hr > rest as f64 => {
                let rest = rest as f64;
                (avg_hr - rest) / (max_hr - rest)
            }
            _ => avg_hr / max_hr,
        };
        Some(ratio.clamp(0.0, 1.0))
    }

    /// Pace relative to threshold pace, running sports only
    fn pace_ratio(&self, activity: &ActivityRecord, athlete: &AthleteProfile) -> Option<f64> {
        if !activity.sport.is_running() {
            return None;
        }
        let pace = activity.pace_sec_per_km()?;
        let threshold = athlete
            .threshold_pace
            .filter(|p| *p > 0.0)
            .unwrap_or(self.config.assumed_threshold_pace);
        Some(pace / threshold)
    }

    fn activity_elevation_multiplier(&self, activity: &ActivityRecord) -> f64 {
        match (activity.elevation_gain_meters, activity.usable_distance()) {
            (Some(gain), Some(distance)) if gain > 0.0 => {
                self.elevation_multiplier(gain / (distance / 1000.0))
            }
            _ => 1.0,
        }
    }

    /// Elevation stress multiplier for a gain in metres per kilometre
    ///
    /// Monotonically non-decreasing, exactly 1.0 on flat terrain, capped at `max_multiplier`.
    pub fn elevation_multiplier(&self, gain_per_km: f64) -> f64 {
        let elevation = &self.config.elevation;
        if !gain_per_km.is_finite() || gain_per_km <= 0.0 {
            return 1.0;
        }

        let mut multiplier = elevation
            .segments
            .iter()
            .rev()
            .find(|segment| gain_per_km > segment.from_gain_per_km)
            .map_or(1.0, |segment| {
                segment.base + (gain_per_km - segment.from_gain_per_km) * segment.slope
            });

        if gain_per_km > elevation.eccentric_threshold {
            multiplier *= elevation.eccentric_factor;
        }

        multiplier.min(elevation.max_multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn create_test_athlete() -> AthleteProfile {
        AthleteProfile {
            id: Some("athlete-1".to_string()),
            max_hr: Some(190),
            lthr: Some(170),
            resting_hr: Some(50),
            threshold_pace: None,
        }
    }

    fn create_test_run(distance_m: f64, seconds: u32) -> ActivityRecord {
        let start = Utc.with_ymd_and_hms(2024, 4, 10, 6, 30, 0).unwrap();
        ActivityRecord::new(start, SportType::Run, distance_m, seconds)
    }

    #[test]
    fn test_heart_rate_tss_calculation() {
        let calculator = TssCalculator::new();
        let mut run = create_test_run(10_000.0, 3600);
        run.average_heartrate = Some(160.0); // 0.842 of max -> 0.95

        let result = calculator.calculate(&run, &create_test_athlete());
        assert_eq!(result.method, TssMethod::HeartRateBased);
        assert_eq!(result.intensity_factor, 0.95);
        assert!((result.tss - 90.25).abs() < 1e-9);
    }

    #[test]
    fn test_heart_rate_reserve_basis() {
        let config = TssConfig {
            hr_basis: HrBasis::HeartRateReserve,
            ..TssConfig::default()
        };
        let calculator = TssCalculator::with_config(config);
        let mut run = create_test_run(10_000.0, 3600);
        run.average_heartrate = Some(134.0); // (134-50)/(190-50) = 0.6

        let result = calculator.calculate(&run, &create_test_athlete());
        assert_eq!(result.intensity_factor, 0.65);
    }

    #[test]
    fn test_pace_tss_calculation() {
        let calculator = TssCalculator::new();
        let athlete = AthleteProfile::default();

        // 5 km at 300 s/km against the assumed 390 s/km threshold: ratio 0.77 -> 1.3
        let run = create_test_run(5000.0, 1500);
        let result = calculator.calculate(&run, &athlete);
        assert_eq!(result.method, TssMethod::PaceBased);
        assert_eq!(result.intensity_factor, 1.3);
        let expected = (1500.0 / 3600.0) * 1.3 * 1.3 * 100.0;
        assert!((result.tss - expected).abs() < 1e-9);

        // Profile threshold pace takes precedence
        let athlete = AthleteProfile {
            threshold_pace: Some(300.0),
            ..AthleteProfile::default()
        };
        let result = calculator.calculate(&run, &athlete);
        assert_eq!(result.intensity_factor, 1.0);
    }

    #[test]
    fn test_duration_fallback() {
        let calculator = TssCalculator::new();
        let start = Utc.with_ymd_and_hms(2024, 4, 10, 6, 30, 0).unwrap();
        let ride = ActivityRecord::new(start, SportType::Ride, 40_000.0, 3600);

        let result = calculator.calculate(&ride, &AthleteProfile::default());
        assert_eq!(result.method, TssMethod::DurationBased);
        assert_eq!(result.intensity_factor, 0.70);
        assert!((result.tss - 49.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_distance_or_duration_is_zero() {
        let calculator = TssCalculator::new();
        let athlete = create_test_athlete();

        let mut run = create_test_run(5000.0, 0);
        run.average_heartrate = Some(150.0);
        assert_eq!(calculator.calculate_tss(&run, &athlete), 0.0);

        let mut run = create_test_run(5000.0, 1500);
        run.distance_meters = None;
        let result = calculator.calculate(&run, &athlete);
        assert_eq!(result.tss, 0.0);
        assert_eq!(result.method, TssMethod::Unscored);
    }

    #[test]
    fn test_running_tss_with_elevation() {
        let calculator = TssCalculator::new();
        let flat = create_test_run(10_000.0, 3600);
        let mut hilly = flat.clone();
        hilly.elevation_gain_meters = Some(800.0); // 80 m/km

        let flat_tss = calculator.calculate_tss(&flat, &AthleteProfile::default());
        let hilly_result = calculator.calculate(&hilly, &AthleteProfile::default());

        let expected_multiplier = (1.26 + 20.0 * 0.007) * 1.05;
        assert!((hilly_result.elevation_multiplier - expected_multiplier).abs() < 1e-9);
        assert!((hilly_result.tss - flat_tss * expected_multiplier).abs() < 1e-9);
    }

    #[test]
    fn pinned_elevation_breakpoints() {
        let calculator = TssCalculator::new();
        assert_eq!(calculator.elevation_multiplier(0.0), 1.0);
        assert_eq!(calculator.elevation_multiplier(10.0), 1.0);
        assert!((calculator.elevation_multiplier(20.0) - 1.08).abs() < 1e-9);
        assert!((calculator.elevation_multiplier(40.0) - 1.16).abs() < 1e-9);
        assert!((calculator.elevation_multiplier(60.0) - 1.26 * 1.05).abs() < 1e-9);
        assert_eq!(calculator.elevation_multiplier(500.0), 2.0);
    }

    #[test]
    fn pinned_intensity_bands() {
        let config = TssConfig::default();
        assert_eq!(config.hr_intensity.lookup_below(0.59), 0.5);
        assert_eq!(config.hr_intensity.lookup_below(0.6), 0.65);
        assert_eq!(config.hr_intensity.lookup_below(0.95), 1.2);
        assert_eq!(config.pace_intensity.lookup_above(1.3), 0.6);
        assert_eq!(config.pace_intensity.lookup_above(1.0), 1.0);
        assert_eq!(config.pace_intensity.lookup_above(0.9), 1.15);
        assert_eq!(config.pace_intensity.lookup_above(0.85), 1.3);
        assert_eq!(config.assumed_threshold_pace, 390.0);
    }

    #[test]
    fn test_config_validation() {
        assert!(TssConfig::default().validate().is_ok());
        let config = TssConfig {
            assumed_threshold_pace: 0.0,
            ..TssConfig::default()
        };
        assert!(config.validate().is_err());
    }

    // Property-based tests using proptest
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_tss_is_never_negative(
            distance in 0.0f64..50_000.0,
            seconds in 0u32..20_000,
            avg_hr in proptest::option::of(40.0f64..220.0),
            gain in proptest::option::of(0.0f64..3000.0),
        ) {
            let calculator = TssCalculator::new();
            let mut run = create_test_run(distance, seconds);
            run.average_heartrate = avg_hr;
            run.elevation_gain_meters = gain;

            let tss = calculator.calculate_tss(&run, &create_test_athlete());
            prop_assert!(tss >= 0.0);
            if distance <= 0.0 || seconds == 0 {
                prop_assert_eq!(tss, 0.0);
            } else {
                prop_assert!(tss > 0.0);
            }
        }

        #[test]
        fn test_elevation_multiplier_monotonic(a in 0.0f64..400.0, b in 0.0f64..400.0) {
            let calculator = TssCalculator::new();
            let (low, high) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(calculator.elevation_multiplier(low) <= calculator.elevation_multiplier(high));
            prop_assert!(calculator.elevation_multiplier(high) <= 2.0);
        }

        #[test]
        fn test_tss_scales_with_duration(seconds in 600u32..10_000) {
            let calculator = TssCalculator::new();
            let short = create_test_run(5000.0, seconds);
            let long = create_test_run(10_000.0, seconds * 2);
            let athlete = AthleteProfile::default();
            prop_assert!(calculator.calculate_tss(&long, &athlete) >= calculator.calculate_tss(&short, &athlete));
        }
    }
}
