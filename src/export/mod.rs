//! Writers for timelines and reports
//!
//! The analytics core returns plain serializable values; these helpers put
//! them on disk as JSON or CSV for the command line.

use crate::batch::AthleteReport;
use crate::error::ImportExportError;
use crate::models::{ActivityRecord, LoadState};
use crate::tss::{TssMethod, TssResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

pub mod csv;
pub mod json;

/// Export format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = ImportExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(ImportExportError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

impl ExportFormat {
    /// Format implied by the output file extension
    pub fn from_path(path: &Path) -> Result<Self, ImportExportError> {
        path.extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ImportExportError::UnsupportedFormat {
                format: path.display().to_string(),
            })?
            .parse()
    }
}

/// Per-activity TSS line for reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TssReportRow {
    pub date: NaiveDate,
    pub id: Option<String>,
    pub sport: String,
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub tss: f64,
    pub method: TssMethod,
    pub intensity_factor: f64,
    pub elevation_multiplier: f64,
}

impl TssReportRow {
    pub fn new(activity: &ActivityRecord, result: &TssResult) -> Self {
        Self {
            date: activity.date(),
            id: activity.id.clone(),
            sport: activity.sport.to_string(),
            distance_km: activity.distance_km(),
            duration_minutes: activity.moving_time_seconds as f64 / 60.0,
            tss: result.tss,
            method: result.method,
            intensity_factor: result.intensity_factor,
            elevation_multiplier: result.elevation_multiplier,
        }
    }
}

/// Flattened batch report line, one per athlete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReportRow {
    pub athlete_id: Option<String>,
    pub activity_count: usize,
    pub ctl: Option<f64>,
    pub atl: Option<f64>,
    pub tsb: Option<f64>,
    pub predicted_time: Option<String>,
    pub prediction_confidence: Option<f64>,
    pub prediction_method: Option<String>,
    pub risk_score: f64,
    pub risk_level: String,
    pub errors: String,
}

impl From<&AthleteReport> for BatchReportRow {
    fn from(report: &AthleteReport) -> Self {
        let load = report.current_load.as_ref();
        let prediction = report.prediction.as_ref();
        Self {
            athlete_id: report.athlete_id.clone(),
            activity_count: report.activity_count,
            ctl: load.map(|s| s.ctl),
            atl: load.map(|s| s.atl),
            tsb: load.map(|s| s.tsb),
            predicted_time: prediction.map(|p| p.formatted_time.clone()),
            prediction_confidence: prediction.map(|p| p.confidence),
            prediction_method: prediction.map(|p| p.methodology.as_str().to_string()),
            risk_score: report.risk.risk_score,
            risk_level: report.risk.risk_level.to_string(),
            errors: report.errors.join("; "),
        }
    }
}

/// Write a load timeline in the format implied by `output_path`
pub fn export_timeline(timeline: &[LoadState], output_path: &Path) -> Result<(), ImportExportError> {
    match ExportFormat::from_path(output_path)? {
        ExportFormat::Csv => csv::export_rows(timeline, output_path),
        ExportFormat::Json => json::export_json(&timeline, output_path),
    }
}

/// Write per-activity TSS rows in the format implied by `output_path`
pub fn export_tss_report(rows: &[TssReportRow], output_path: &Path) -> Result<(), ImportExportError> {
    match ExportFormat::from_path(output_path)? {
        ExportFormat::Csv => csv::export_rows(rows, output_path),
        ExportFormat::Json => json::export_json(&rows, output_path),
    }
}

/// Batch reports as full JSON, or one flattened CSV line per athlete
pub fn export_batch_reports(
    reports: &[AthleteReport],
    output_path: &Path,
) -> Result<(), ImportExportError> {
    match ExportFormat::from_path(output_path)? {
        ExportFormat::Csv => {
            let rows: Vec<BatchReportRow> = reports.iter().map(BatchReportRow::from).collect();
            csv::export_rows(&rows, output_path)
        }
        ExportFormat::Json => json::export_json(&reports, output_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ExportFormat::from_path(Path::new("out/timeline.CSV")).unwrap(),
            ExportFormat::Csv
        );
        assert_eq!(
            ExportFormat::from_path(Path::new("report.json")).unwrap(),
            ExportFormat::Json
        );
        assert!(ExportFormat::from_path(Path::new("report.pdf")).is_err());
        assert!(ExportFormat::from_path(Path::new("report")).is_err());
    }

    #[test]
    fn test_export_timeline_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let timeline = vec![LoadState {
            date,
            tss: 50.0,
            ctl: 2.3,
            atl: 12.5,
            tsb: -10.2,
            weekly_tss: 50.0,
        }];

        let csv_path = dir.path().join("timeline.csv");
        export_timeline(&timeline, &csv_path).unwrap();
        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.starts_with("date,tss,ctl,atl,tsb,weekly_tss"));
        assert!(content.contains("2024-02-01,50.0,2.3,12.5,-10.2,50.0"));

        let json_path = dir.path().join("timeline.json");
        export_timeline(&timeline, &json_path).unwrap();
        let parsed: Vec<LoadState> =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed, timeline);
    }
}
