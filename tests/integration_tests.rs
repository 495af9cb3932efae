use chrono::{Duration, NaiveDate, TimeZone, Utc};
use paceline::{
    assess_injury_risk, compute_load_timeline, compute_tss, predict_race_time, ActivityRecord,
    AthleteProfile, FitnessSnapshotBuilder, Methodology, PredictionMethod, RiskLevel, SportType,
};

/// Integration tests for the public entry points

fn daily_runs(days: i64, km: f64, pace: f64) -> Vec<ActivityRecord> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
    (0..days)
        .map(|day| {
            ActivityRecord::new(
                start + Duration::days(day),
                SportType::Run,
                km * 1000.0,
                (km * pace) as u32,
            )
        })
        .collect()
}

fn run_on(day: u32, km: f64) -> ActivityRecord {
    let start = Utc.with_ymd_and_hms(2024, 3, day, 7, 0, 0).unwrap();
    ActivityRecord::new(start, SportType::Run, km * 1000.0, (km * 330.0) as u32)
}

#[test]
fn test_ninety_days_of_steady_running() {
    let activities = daily_runs(90, 5.0, 300.0);
    let athlete = AthleteProfile::default();

    let first = compute_tss(&activities[0], &athlete);
    assert!(first > 0.0);
    for activity in &activities {
        assert!((compute_tss(activity, &athlete) - first).abs() < 1e-9);
    }

    let daily: Vec<(NaiveDate, f64)> = activities
        .iter()
        .map(|a| (a.date(), compute_tss(a, &athlete)))
        .collect();
    let timeline = compute_load_timeline(&daily).unwrap();
    assert_eq!(timeline.len(), 90);

    // CTL rises every day and flattens out
    for pair in timeline.windows(2) {
        assert!(pair[1].ctl > pair[0].ctl);
    }
    let last = &timeline[89];
    assert!(last.ctl - timeline[88].ctl < 0.1);

    // Fatigue catches up with fitness
    assert!(last.tsb.abs() < 0.02 * first);
    assert!(last.tsb.abs() < timeline[13].tsb.abs());
    assert!((last.tsb - (last.ctl - last.atl)).abs() < 1e-12);

    let prediction = predict_race_time(&activities, &athlete, 10.0, 0).unwrap();
    assert!(!prediction.is_fallback());
    assert!(prediction.predicted_time_seconds.is_finite());
    assert!((0.0..=1.0).contains(&prediction.confidence));
    assert!(prediction.race_day_projection.is_none());
}

#[test]
fn test_two_runs_fall_back_to_conservative_estimate() {
    let activities = daily_runs(2, 5.0, 300.0);
    let athlete = AthleteProfile::default();

    let snapshot = FitnessSnapshotBuilder::new().build(&activities, None);
    assert!(!snapshot.is_valid());

    let prediction = predict_race_time(&activities, &athlete, 10.0, 12).unwrap();
    assert_eq!(prediction.methodology, Methodology::FallbackConservativeEstimate);
    assert_eq!(prediction.confidence, 0.3);
    assert!((prediction.predicted_time_seconds - 4200.0).abs() < 1e-9);
    assert!(!prediction.warnings.is_empty());

    let projection = prediction.race_day_projection.unwrap();
    assert_eq!(projection.weeks_to_race, 12);
    assert_eq!(projection.confidence, 0.3);
    assert!(projection.predicted_time_seconds < prediction.predicted_time_seconds);
}

#[test]
fn test_weekly_jump_flags_rapid_load_increase() {
    // 20 km in the week of March 4th, 35 km the week after
    let mut activities: Vec<ActivityRecord> =
        [4, 5, 7, 9].iter().map(|&d| run_on(d, 5.0)).collect();
    activities.extend([11, 12, 13, 15, 16].iter().map(|&d| run_on(d, 7.0)));

    let assessment = assess_injury_risk(&activities, &AthleteProfile::default());
    assert!(!assessment.insufficient_data);
    assert_eq!(assessment.prediction_method, PredictionMethod::RuleBased);

    let top = &assessment.risk_factors[0];
    assert_eq!(top.factor, "Rapid training load increase");
    assert_eq!(top.weight, 15.0);
    assert!(assessment
        .recommendations
        .iter()
        .any(|r| r == "Limit weekly mileage increases to 10%"));

    // Base 10, load jump 15, no runs under 5 km 4
    assert_eq!(assessment.risk_score, 29.0);
    assert_eq!(assessment.risk_level, RiskLevel::Low);
    assert_eq!(assessment.confidence, 0.7);
}

#[test]
fn test_risk_level_boundaries() {
    assert_eq!(RiskLevel::from_score(29.9), RiskLevel::Low);
    assert_eq!(RiskLevel::from_score(30.0), RiskLevel::Moderate);
    assert_eq!(RiskLevel::from_score(59.9), RiskLevel::Moderate);
    assert_eq!(RiskLevel::from_score(60.0), RiskLevel::High);
    assert_eq!(RiskLevel::from_score(80.0), RiskLevel::VeryHigh);
}

#[test]
fn test_no_usable_activities_is_insufficient_data() {
    let assessment = assess_injury_risk(&[], &AthleteProfile::default());
    assert!(assessment.insufficient_data);
    assert_eq!(assessment.risk_score, 0.0);
    assert_eq!(assessment.risk_level, RiskLevel::Low);
    assert_eq!(assessment.confidence, 0.0);
    assert_eq!(assessment.prediction_method, PredictionMethod::InsufficientData);
}

#[test]
fn test_tss_is_zero_without_distance_or_duration() {
    let athlete = AthleteProfile {
        max_hr: Some(190),
        ..Default::default()
    };
    let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    let no_time = ActivityRecord::new(start, SportType::Run, 5000.0, 0);
    assert_eq!(compute_tss(&no_time, &athlete), 0.0);

    let no_distance = ActivityRecord::new(start, SportType::Run, 0.0, 1800);
    assert_eq!(compute_tss(&no_distance, &athlete), 0.0);

    let mut missing_distance = ActivityRecord::new(start, SportType::Ride, 20_000.0, 3600);
    missing_distance.distance_meters = None;
    missing_distance.average_heartrate = Some(150.0);
    assert_eq!(compute_tss(&missing_distance, &athlete), 0.0);
}

#[test]
fn test_out_of_order_days_are_rejected() {
    let d = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
    assert!(compute_load_timeline(&[(d(2), 50.0), (d(1), 40.0)]).is_err());
    assert!(compute_load_timeline(&[(d(1), 50.0), (d(1), 40.0)]).is_err());

    // A skipped day is folded as rest
    let timeline = compute_load_timeline(&[(d(1), 50.0), (d(3), 40.0)]).unwrap();
    assert_eq!(timeline.len(), 3);
    assert_eq!(timeline[1].tss, 0.0);
}

#[test]
fn test_easy_ratio_rule_needs_heart_rate() {
    let athlete = AthleteProfile {
        max_hr: Some(190),
        ..Default::default()
    };
    let mut activities: Vec<ActivityRecord> =
        [4, 6, 8, 11, 13, 15].iter().map(|&d| run_on(d, 6.0)).collect();

    // Unknown polarization is neutral rather than a zero easy share
    let assessment = assess_injury_risk(&activities, &athlete);
    assert!(!assessment.insufficient_data);
    assert!(assessment
        .risk_factors
        .iter()
        .all(|f| f.factor != "Inadequate easy running ratio"));

    for activity in &mut activities {
        activity.average_heartrate = Some(180.0);
    }
    let assessment = assess_injury_risk(&activities, &athlete);
    let easy_ratio = assessment
        .risk_factors
        .iter()
        .find(|f| f.factor == "Inadequate easy running ratio")
        .unwrap();
    assert_eq!(easy_ratio.weight, 6.0);
}
