//! Activity and profile loading for the command line
//!
//! The analytics core never touches files; this module turns JSON and CSV
//! exports into [`ActivityRecord`]s for it. CSV headers are matched
//! case-insensitively against common provider spellings.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::batch::AthleteInput;
use crate::error::{ImportExportError, PacelineError};
use crate::models::{ActivityRecord, AthleteProfile, SportType};

/// Supported input formats, detected from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    Csv,
    Toml,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Result<Self, ImportExportError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "json" => Ok(InputFormat::Json),
            "csv" => Ok(InputFormat::Csv),
            "toml" => Ok(InputFormat::Toml),
            other => Err(ImportExportError::UnsupportedFormat {
                format: if other.is_empty() {
                    path.display().to_string()
                } else {
                    other.to_string()
                },
            }),
        }
    }
}

/// Load activities from a JSON array or CSV file, sorted by start time
pub fn load_activities(path: &Path) -> Result<Vec<ActivityRecord>> {
    let mut activities = match InputFormat::from_path(path).map_err(PacelineError::from)? {
        InputFormat::Json => {
            let content = read_file(path)?;
            parse_activities_json(&content).map_err(PacelineError::from)?
        }
        InputFormat::Csv => {
            let file = fs::File::open(path)
                .map_err(PacelineError::from)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            CsvActivityReader::new()
                .read(file)
                .map_err(PacelineError::from)?
        }
        InputFormat::Toml => {
            return Err(PacelineError::from(ImportExportError::UnsupportedFormat {
                format: "toml activities".to_string(),
            })
            .into())
        }
    };

    activities.sort_by_key(|a| a.start_time);
    debug!(path = %path.display(), count = activities.len(), "Loaded activities");
    Ok(activities)
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(PacelineError::from)
        .with_context(|| format!("Failed to read {}", path.display()))
}

pub fn parse_activities_json(content: &str) -> Result<Vec<ActivityRecord>, ImportExportError> {
    serde_json::from_str(content).map_err(|e| ImportExportError::ParseError {
        format: "json".to_string(),
        reason: e.to_string(),
    })
}

/// Load an athlete profile from JSON or TOML
pub fn load_profile(path: &Path) -> Result<AthleteProfile> {
    let content = read_file(path)?;
    let profile = match InputFormat::from_path(path).map_err(PacelineError::from)? {
        InputFormat::Json => serde_json::from_str(&content)
            .with_context(|| format!("Invalid profile JSON in {}", path.display()))?,
        InputFormat::Toml => toml::from_str(&content)
            .with_context(|| format!("Invalid profile TOML in {}", path.display()))?,
        InputFormat::Csv => {
            return Err(PacelineError::from(ImportExportError::UnsupportedFormat {
                format: "csv profile".to_string(),
            })
            .into())
        }
    };
    Ok(profile)
}

/// Load a JSON array of `{profile, activities}` objects for a batch run
pub fn load_athletes(path: &Path) -> Result<Vec<AthleteInput>> {
    let content = read_file(path)?;
    let mut athletes: Vec<AthleteInput> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid batch file {}", path.display()))?;
    for athlete in &mut athletes {
        athlete.activities.sort_by_key(|a| a.start_time);
    }
    Ok(athletes)
}

/// CSV reader with flexible column mapping
pub struct CsvActivityReader {
    column_mapping: HashMap<String, &'static str>,
}

impl Default for CsvActivityReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvActivityReader {
    pub fn new() -> Self {
        let mut column_mapping = HashMap::new();

        Self::add_mapping(&mut column_mapping, "id", &["id", "activity_id"]);
        Self::add_mapping(
            &mut column_mapping,
            "start_time",
            &["start_time", "start_date", "date", "timestamp", "start_date_local"],
        );
        Self::add_mapping(&mut column_mapping, "sport", &["sport", "type", "sport_type", "activity_type"]);
        Self::add_mapping(
            &mut column_mapping,
            "distance",
            &["distance", "distance_meters", "distance_m"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "moving_time",
            &["moving_time", "moving_time_seconds", "duration", "elapsed_time"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "elevation",
            &["elevation_gain_meters", "total_elevation_gain", "elevation_gain", "elevation"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "average_heartrate",
            &["average_heartrate", "avg_hr", "average_heart_rate", "heart_rate"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "max_heartrate",
            &["max_heartrate", "max_hr", "max_heart_rate"],
        );
        Self::add_mapping(
            &mut column_mapping,
            "average_cadence",
            &["average_cadence", "cadence", "avg_cadence"],
        );

        Self { column_mapping }
    }

    fn add_mapping(
        mapping: &mut HashMap<String, &'static str>,
        standard: &'static str,
        variations: &[&str],
    ) {
        for variation in variations {
            mapping.insert(variation.to_lowercase(), standard);
        }
    }

    fn normalize_column_name(&self, name: &str) -> Option<&'static str> {
        let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");
        self.column_mapping.get(&normalized).copied()
    }

    /// Read every row; rows without a start time are skipped with a warning
    pub fn read<R: Read>(&self, reader: R) -> Result<Vec<ActivityRecord>, ImportExportError> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers().map_err(csv_error)?.clone();
        let columns: HashMap<&'static str, usize> = headers
            .iter()
            .enumerate()
            .filter_map(|(index, name)| self.normalize_column_name(name).map(|c| (c, index)))
            .collect();

        if !columns.contains_key("start_time") {
            return Err(ImportExportError::ParseError {
                format: "csv".to_string(),
                reason: "no start time column".to_string(),
            });
        }

        let mut activities = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record.map_err(csv_error)?;
            match Self::parse_row(&record, &columns) {
                Some(activity) => activities.push(activity),
                None => warn!(row = line + 2, "Skipping CSV row without a valid start time"),
            }
        }
        Ok(activities)
    }

    fn parse_row(
        record: &StringRecord,
        columns: &HashMap<&'static str, usize>,
    ) -> Option<ActivityRecord> {
        let field = |name: &str| {
            columns
                .get(name)
                .and_then(|index| record.get(*index))
                .filter(|value| !value.is_empty())
        };
        let number = |name: &str| field(name).and_then(|v| v.parse::<f64>().ok());

        let start_time = parse_datetime(field("start_time")?)?;
        let sport = field("sport")
            .and_then(|s| s.parse::<SportType>().ok())
            .unwrap_or(SportType::Run);
        let moving_time_seconds = number("moving_time")
            .filter(|t| t.is_finite() && *t > 0.0)
            .map_or(0, |t| t.round() as u32);

        Some(ActivityRecord {
            id: field("id").map(str::to_string),
            start_time,
            sport,
            distance_meters: number("distance"),
            moving_time_seconds,
            elevation_gain_meters: number("elevation"),
            average_heartrate: number("average_heartrate"),
            max_heartrate: number("max_heartrate"),
            average_cadence: number("average_cadence"),
        })
    }
}

fn csv_error(e: csv::Error) -> ImportExportError {
    ImportExportError::ParseError {
        format: "csv".to_string(),
        reason: e.to_string(),
    }
}

/// Parse the timestamp spellings seen in provider exports, treating naive times as UTC
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%d/%m/%Y %H:%M:%S",
    ];
    for format in &formats {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    value
        .parse::<i64>()
        .ok()
        .and_then(|timestamp| DateTime::from_timestamp(timestamp, 0))
}
