use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sport types reported by the activity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SportType {
    Run,
    VirtualRun,
    TrailRun,
    Ride,
    VirtualRide,
    Swim,
    Walk,
    Hike,
    Workout,
    #[serde(other)]
    Other,
}

impl SportType {
    /// Running-type activities feed the pace-based metrics
    pub fn is_running(&self) -> bool {
        matches!(self, SportType::Run | SportType::VirtualRun | SportType::TrailRun)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SportType::Run => "Run",
            SportType::VirtualRun => "VirtualRun",
            SportType::TrailRun => "TrailRun",
            SportType::Ride => "Ride",
            SportType::VirtualRide => "VirtualRide",
            SportType::Swim => "Swim",
            SportType::Walk => "Walk",
            SportType::Hike => "Hike",
            SportType::Workout => "Workout",
            SportType::Other => "Other",
        }
    }
}

impl fmt::Display for SportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SportType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sport = match s.trim().to_lowercase().replace(['_', ' '], "").as_str() {
            "run" | "running" => SportType::Run,
            "virtualrun" => SportType::VirtualRun,
            "trailrun" => SportType::TrailRun,
            "ride" | "cycling" | "bike" => SportType::Ride,
            "virtualride" => SportType::VirtualRide,
            "swim" | "swimming" => SportType::Swim,
            "walk" | "walking" => SportType::Walk,
            "hike" | "hiking" => SportType::Hike,
            "workout" | "crosstraining" => SportType::Workout,
            _ => SportType::Other,
        };
        Ok(sport)
    }
}

/// A single ingested activity. Never mutated after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Provider identifier, if any
    #[serde(default)]
    pub id: Option<String>,

    /// Activity start time
    pub start_time: DateTime<Utc>,

    /// Sport type
    pub sport: SportType,

    /// Distance in meters
    #[serde(default)]
    pub distance_meters: Option<f64>,

    /// Moving duration in seconds
    #[serde(default)]
    pub moving_time_seconds: u32,

    /// Total elevation gain in meters
    #[serde(default)]
    pub elevation_gain_meters: Option<f64>,

    /// Average heart rate in bpm
    #[serde(default)]
    pub average_heartrate: Option<f64>,

    /// Maximum heart rate in bpm
    #[serde(default)]
    pub max_heartrate: Option<f64>,

    /// Average cadence (steps or revolutions per minute)
    #[serde(default)]
    pub average_cadence: Option<f64>,
}

impl ActivityRecord {
    /// Minimal constructor used by loaders and tests
    pub fn new(
        start_time: DateTime<Utc>,
        sport: SportType,
        distance_meters: f64,
        moving_time_seconds: u32,
    ) -> Self {
        Self {
            id: None,
            start_time,
            sport,
            distance_meters: Some(distance_meters),
            moving_time_seconds,
            elevation_gain_meters: None,
            average_heartrate: None,
            max_heartrate: None,
            average_cadence: None,
        }
    }

    /// Calendar day (UTC) the activity belongs to
    pub fn date(&self) -> NaiveDate {
        self.start_time.date_naive()
    }

    /// Distance in meters, `None` when missing or not positive
    pub fn usable_distance(&self) -> Option<f64> {
        self.distance_meters.filter(|d| d.is_finite() && *d > 0.0)
    }

    pub fn distance_km(&self) -> f64 {
        self.usable_distance().map_or(0.0, |d| d / 1000.0)
    }

    pub fn duration_hours(&self) -> f64 {
        self.moving_time_seconds as f64 / 3600.0
    }

    /// Pace in seconds per kilometre
    pub fn pace_sec_per_km(&self) -> Option<f64> {
        if self.moving_time_seconds == 0 {
            return None;
        }
        self.usable_distance()
            .map(|d| self.moving_time_seconds as f64 / (d / 1000.0))
    }

    /// True when both distance and moving time are usable
    pub fn has_distance_and_time(&self) -> bool {
        self.moving_time_seconds > 0 && self.usable_distance().is_some()
    }
}

/// Athlete physiological parameters, read-only to the core
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AthleteProfile {
    /// Athlete identifier
    #[serde(default)]
    pub id: Option<String>,

    /// Maximum heart rate in bpm
    #[serde(default)]
    pub max_hr: Option<u16>,

    /// Lactate threshold heart rate in bpm
    #[serde(default)]
    pub lthr: Option<u16>,

    /// Resting heart rate in bpm
    #[serde(default)]
    pub resting_hr: Option<u16>,

    /// Functional threshold pace in seconds per km
    #[serde(default)]
    pub threshold_pace: Option<f64>,
}

/// Total training stress for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStressPoint {
    pub date: NaiveDate,

    /// Sum of per-activity TSS, 0 on rest days
    pub total_tss: f64,

    /// Activities contributing to this day
    pub activity_count: u16,
}

impl DailyStressPoint {
    pub fn new(date: NaiveDate, total_tss: f64) -> Self {
        Self {
            date,
            total_tss,
            activity_count: 0,
        }
    }

    pub fn rest_day(date: NaiveDate) -> Self {
        Self::new(date, 0.0)
    }
}

/// Fitness / fatigue / form state for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadState {
    pub date: NaiveDate,

    /// TSS for the day
    pub tss: f64,

    /// Chronic Training Load (42-day EWMA)
    pub ctl: f64,

    /// Acute Training Load (7-day EWMA)
    pub atl: f64,

    /// Training Stress Balance, always `ctl - atl`
    pub tsb: f64,

    /// Sum of TSS over the trailing 7 days including this one
    pub weekly_tss: f64,
}

/// Format seconds as `HH:MM:SS`
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Format a pace in seconds per km as `M:SS`
pub fn format_pace(sec_per_km: f64) -> String {
    let total = sec_per_km.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sport_parsing() {
        assert_eq!("Run".parse::<SportType>().unwrap(), SportType::Run);
        assert_eq!("virtual_run".parse::<SportType>().unwrap(), SportType::VirtualRun);
        assert_eq!("Cycling".parse::<SportType>().unwrap(), SportType::Ride);
        assert_eq!("Kitesurf".parse::<SportType>().unwrap(), SportType::Other);
        assert!(SportType::TrailRun.is_running());
        assert!(!SportType::Ride.is_running());
    }

    #[test]
    fn test_unknown_sport_deserializes_as_other() {
        let sport: SportType = serde_json::from_str("\"Kitesurf\"").unwrap();
        assert_eq!(sport, SportType::Other);
    }

    #[test]
    fn test_activity_pace() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();
        let run = ActivityRecord::new(start, SportType::Run, 5000.0, 1500);
        assert_eq!(run.pace_sec_per_km(), Some(300.0));
        assert_eq!(run.distance_km(), 5.0);
        assert_eq!(run.date(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let broken = ActivityRecord {
            distance_meters: Some(0.0),
            ..run.clone()
        };
        assert_eq!(broken.pace_sec_per_km(), None);
        assert!(!broken.has_distance_and_time());
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_duration(3725.0), "01:02:05");
        assert_eq!(format_pace(305.0), "5:05");
    }
}
