use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};
use tracing::{error, info, warn, Level};

use paceline::batch::BatchProcessor;
use paceline::error::{ErrorSeverity, PacelineError};
use paceline::export::{self, TssReportRow};
use paceline::import;
use paceline::injury::RiskLevel;
use paceline::{
    format_pace, init_logging, ActivityRecord, Analyzer, AppConfig, AthleteProfile,
    InjuryRiskAssessment, LoadState, RacePrediction, DEFAULT_WEEKS_TO_RACE,
};

/// Paceline - Training Analytics CLI
///
/// Training stress, fitness/fatigue timelines, race-time prediction and
/// injury-risk assessment from activity history.
#[derive(Parser)]
#[command(name = "paceline")]
#[command(version)]
#[command(about = "Training analytics for endurance athletes", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Athlete profile (JSON or TOML); defaults to the config's athlete section
    #[arg(short, long, value_name = "FILE", global = true)]
    profile: Option<PathBuf>,

    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Training stress score for every activity
    Tss {
        /// Activity file (JSON or CSV)
        file: PathBuf,

        /// Also write the report (csv or json by extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fitness (CTL), fatigue (ATL) and form (TSB) timeline
    Timeline {
        /// Activity file (JSON or CSV)
        file: PathBuf,

        /// Number of most recent days to show
        #[arg(short, long, default_value = "14")]
        days: usize,

        /// Also write the full timeline (csv or json by extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Predict a race time from recent running
    Predict {
        /// Activity file (JSON or CSV)
        file: PathBuf,

        /// Race distance in km
        #[arg(short, long, default_value = "10.0")]
        distance: f64,

        /// Weeks of training left before race day (0 skips the projection)
        #[arg(short, long, default_value_t = DEFAULT_WEEKS_TO_RACE)]
        weeks: u32,
    },

    /// Injury risk over the last 30 days
    Risk {
        /// Activity file (JSON or CSV)
        file: PathBuf,

        /// Include the prevention plan
        #[arg(long)]
        plan: bool,
    },

    /// Run the full pipeline for many athletes in parallel
    Batch {
        /// JSON array of {profile, activities}
        file: PathBuf,

        /// Write per-athlete reports (csv or json by extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker threads (default: one per CPU)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the default configuration path
    Path,
}

fn main() {
    if let Err(err) = run() {
        report_error(&err);
        std::process::exit(1);
    }
}

/// Log the failure at its severity and print a short message for the user
fn report_error(err: &anyhow::Error) {
    let Some(error) = PacelineError::find_in_chain(err) else {
        error!(error = %format!("{:#}", err), "Command failed");
        eprintln!("{} {:#}", "Error:".red().bold(), err);
        return;
    };

    let detail = format!("{:#}", err);
    let level = error.severity().to_tracing_level();
    if level == Level::ERROR {
        error!(error = %detail, "Command failed");
    } else if level == Level::WARN {
        warn!(error = %detail, "Command failed");
    } else {
        info!(error = %detail, "Command failed");
    }

    let label = match error.severity() {
        ErrorSeverity::Critical => "Internal error:".bright_red().bold(),
        ErrorSeverity::Error => "Error:".red().bold(),
        ErrorSeverity::Warning | ErrorSeverity::Info => "Warning:".yellow().bold(),
    };
    eprintln!("{} {}", label, error.user_message());
    let outer = err.to_string();
    if outer != error.to_string() {
        eprintln!("  {}", outer.dimmed());
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // `config init` may target a file that does not exist yet
    let config = match &cli.command {
        Commands::Config {
            action: ConfigAction::Init { .. },
        } => AppConfig::default(),
        _ => AppConfig::resolve(cli.config.as_deref())?,
    };
    init_logging(&config.logging.clone().with_verbosity(cli.verbose))?;

    match &cli.command {
        Commands::Tss { file, output } => run_tss(&cli, &config, file, output.as_deref()),
        Commands::Timeline { file, days, output } => {
            run_timeline(&cli, &config, file, *days, output.as_deref())
        }
        Commands::Predict {
            file,
            distance,
            weeks,
        } => run_predict(&cli, &config, file, *distance, *weeks),
        Commands::Risk { file, plan } => run_risk(&cli, &config, file, *plan),
        Commands::Batch {
            file,
            output,
            threads,
            no_progress,
        } => run_batch(&cli, &config, file, output.as_deref(), *threads, *no_progress),
        Commands::Config { action } => run_config(&cli, &config, action),
    }
}

fn athlete_profile(cli: &Cli, config: &AppConfig) -> Result<AthleteProfile> {
    match &cli.profile {
        Some(path) => import::load_profile(path),
        None => Ok(config.athlete.clone()),
    }
}

fn load_inputs(cli: &Cli, config: &AppConfig, file: &Path) -> Result<(Vec<ActivityRecord>, AthleteProfile)> {
    let activities = import::load_activities(file)?;
    let profile = athlete_profile(cli, config)?;
    info!(activities = activities.len(), file = %file.display(), "Loaded activities");
    Ok((activities, profile))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    println!("{}", Table::new(rows).with(Style::rounded()));
}

#[derive(Tabled)]
struct TssRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Sport")]
    sport: String,
    #[tabled(rename = "Distance (km)")]
    distance: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "TSS")]
    tss: String,
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "IF")]
    intensity: String,
}

fn run_tss(cli: &Cli, config: &AppConfig, file: &Path, output: Option<&Path>) -> Result<()> {
    let (activities, profile) = load_inputs(cli, config, file)?;
    let analyzer = Analyzer::from_config(config);

    let rows: Vec<TssReportRow> = activities
        .iter()
        .map(|a| TssReportRow::new(a, &analyzer.tss_calculator().calculate(a, &profile)))
        .collect();

    if let Some(path) = output {
        export::export_tss_report(&rows, path)
            .with_context(|| format!("Failed to export TSS report to {}", path.display()))?;
    }

    if cli.json {
        return print_json(&rows);
    }

    println!("{}", "Training Stress Score".blue().bold());
    let total: f64 = rows.iter().map(|r| r.tss).sum();
    let table: Vec<TssRow> = rows
        .iter()
        .map(|r| TssRow {
            date: r.date.to_string(),
            sport: r.sport.clone(),
            distance: format!("{:.2}", r.distance_km),
            duration: paceline::format_duration(r.duration_minutes * 60.0),
            tss: format!("{:.1}", r.tss),
            method: format!("{:?}", r.method),
            intensity: format!("{:.2}", r.intensity_factor),
        })
        .collect();
    print_table(table);
    println!("  {} activities, total TSS {:.1}", rows.len(), total);
    Ok(())
}

#[derive(Tabled)]
struct LoadRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "TSS")]
    tss: String,
    #[tabled(rename = "CTL")]
    ctl: String,
    #[tabled(rename = "ATL")]
    atl: String,
    #[tabled(rename = "TSB")]
    tsb: String,
    #[tabled(rename = "7-day TSS")]
    weekly: String,
}

impl From<&LoadState> for LoadRow {
    fn from(state: &LoadState) -> Self {
        Self {
            date: state.date.to_string(),
            tss: format!("{:.1}", state.tss),
            ctl: format!("{:.1}", state.ctl),
            atl: format!("{:.1}", state.atl),
            tsb: format!("{:+.1}", state.tsb),
            weekly: format!("{:.0}", state.weekly_tss),
        }
    }
}

fn run_timeline(
    cli: &Cli,
    config: &AppConfig,
    file: &Path,
    days: usize,
    output: Option<&Path>,
) -> Result<()> {
    let (activities, profile) = load_inputs(cli, config, file)?;
    let analyzer = Analyzer::from_config(config);

    let timeline = analyzer
        .load_timeline(&activities, &profile)
        .map_err(PacelineError::from)?;
    if let Some(path) = output {
        export::export_timeline(&timeline, path)
            .with_context(|| format!("Failed to export timeline to {}", path.display()))?;
    }

    let summary = analyzer
        .training_load_summary(&activities, &profile)
        .map_err(PacelineError::from)?;
    if cli.json {
        return print_json(&summary);
    }

    let Some(summary) = summary else {
        println!("{}", "No activities to build a timeline from".yellow());
        return Ok(());
    };

    println!("{}", "Training Load".cyan().bold());
    let recent = &timeline[timeline.len().saturating_sub(days)..];
    print_table(recent.iter().map(LoadRow::from).collect());
    println!(
        "  {} activities, trailing 7-day TSS {:.0}",
        summary.total_activities, summary.avg_weekly_tss
    );

    if let Some(trends) = &summary.trends {
        println!();
        println!(
            "{} {:?} - {}",
            "Phase:".bold(),
            trends.training_phase,
            trends.phase_description
        );
        println!(
            "{} fitness {:?}, fatigue {:?}, form {:?}",
            "Trends:".bold(),
            trends.fitness_trend,
            trends.fatigue_trend,
            trends.form_trend
        );
        for recommendation in &trends.recommendations {
            println!("  • {}", recommendation);
        }
    }
    Ok(())
}

#[derive(Tabled)]
struct MethodRow {
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Time")]
    time: String,
}

fn run_predict(cli: &Cli, config: &AppConfig, file: &Path, distance: f64, weeks: u32) -> Result<()> {
    let (activities, profile) = load_inputs(cli, config, file)?;
    let analyzer = Analyzer::from_config(config);

    let prediction = analyzer
        .predict_race_time(&activities, &profile, distance, weeks)
        .map_err(PacelineError::from)?;
    if cli.json {
        return print_json(&prediction);
    }

    print_prediction(&prediction);
    Ok(())
}

fn print_prediction(prediction: &RacePrediction) {
    println!(
        "{}",
        format!("Race Prediction: {:.2} km", prediction.distance_km)
            .green()
            .bold()
    );
    println!(
        "  Predicted time: {} ({}/km)",
        prediction.formatted_time.bold(),
        prediction.formatted_pace
    );
    println!(
        "  Confidence: {:.0}% ({})",
        prediction.confidence * 100.0,
        prediction.methodology.as_str()
    );
    if let Some(vdot) = prediction.estimated_vdot {
        println!("  Estimated VDOT: {:.1}", vdot);
    }

    if !prediction.method_breakdown.is_empty() {
        print_table(
            prediction
                .method_breakdown
                .iter()
                .map(|m| MethodRow {
                    method: format!("{:?}", m.method),
                    time: paceline::format_duration(m.time_seconds),
                })
                .collect(),
        );
    }

    for warning in &prediction.warnings {
        println!("  {} {}", "!".yellow().bold(), warning.yellow());
    }

    if let Some(projection) = &prediction.race_day_projection {
        println!();
        println!(
            "{}",
            format!("Race day in {} weeks", projection.weeks_to_race)
                .cyan()
                .bold()
        );
        println!(
            "  Projected time: {} ({}/km), confidence {:.0}%",
            projection.formatted_time.bold(),
            format_pace(projection.predicted_pace),
            projection.confidence * 100.0
        );
        for milestone in &projection.milestones {
            println!(
                "  Week {:>2}: threshold {}/km ({:+.1}%) - {}",
                milestone.week,
                format_pace(milestone.target_threshold_pace),
                milestone.expected_improvement_pct,
                milestone.fitness_benchmark
            );
        }
        if let Some(note) = &projection.note {
            println!("  {}", note.dimmed());
        }
    }
}

#[derive(Tabled)]
struct FactorRow {
    #[tabled(rename = "Risk factor")]
    factor: String,
    #[tabled(rename = "Weight")]
    weight: String,
}

fn level_label(level: RiskLevel) -> ColoredString {
    let label = level.as_str().to_uppercase().bold();
    match level {
        RiskLevel::Low => label.green(),
        RiskLevel::Moderate => label.yellow(),
        RiskLevel::High => label.red(),
        RiskLevel::VeryHigh => label.bright_red(),
    }
}

fn run_risk(cli: &Cli, config: &AppConfig, file: &Path, plan: bool) -> Result<()> {
    let (activities, profile) = load_inputs(cli, config, file)?;
    let analyzer = Analyzer::from_config(config);

    let assessment = analyzer.assess_injury_risk(&activities, &profile);
    if cli.json {
        #[derive(Serialize)]
        struct RiskOutput<'a> {
            #[serde(flatten)]
            assessment: &'a InjuryRiskAssessment,
            #[serde(skip_serializing_if = "Option::is_none")]
            prevention_plan: Option<paceline::PreventionPlan>,
        }
        return print_json(&RiskOutput {
            assessment: &assessment,
            prevention_plan: plan.then(|| assessment.prevention_plan()),
        });
    }

    println!("{}", "Injury Risk".red().bold());
    println!(
        "  Score: {:.0}/100  Level: {}  Confidence: {:.0}%  ({})",
        assessment.risk_score,
        level_label(assessment.risk_level),
        assessment.confidence * 100.0,
        assessment.prediction_method.as_str()
    );

    if !assessment.risk_factors.is_empty() {
        print_table(
            assessment
                .risk_factors
                .iter()
                .map(|f| FactorRow {
                    factor: f.factor.clone(),
                    weight: format!("+{:.0}", f.weight),
                })
                .collect(),
        );
    }

    println!("{}", "Recommendations".bold());
    for recommendation in &assessment.recommendations {
        println!("  • {}", recommendation);
    }

    if plan {
        let plan = assessment.prevention_plan();
        println!();
        println!("{}", "Prevention Plan".bold());
        println!("  Focus: {}", plan.focus_areas.join(", "));
        println!("  Monitoring: {}", plan.action_plan.monitoring_frequency);
        for action in &plan.action_plan.immediate_actions {
            println!("  → {}", action);
        }
        println!("  Strategies:");
        for strategy in &plan.prevention_strategies {
            println!("    - {}", strategy);
        }
        println!("  Warning signs: {}", plan.warning_signs.join(", "));
    }
    Ok(())
}

#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "Athlete")]
    athlete: String,
    #[tabled(rename = "Activities")]
    activities: usize,
    #[tabled(rename = "CTL")]
    ctl: String,
    #[tabled(rename = "TSB")]
    tsb: String,
    #[tabled(rename = "Prediction")]
    prediction: String,
    #[tabled(rename = "Risk")]
    risk: String,
    #[tabled(rename = "Errors")]
    errors: usize,
}

fn run_batch(
    cli: &Cli,
    config: &AppConfig,
    file: &Path,
    output: Option<&Path>,
    threads: Option<usize>,
    no_progress: bool,
) -> Result<()> {
    let athletes = import::load_athletes(file)?;

    let mut batch_config = config.batch.clone();
    if threads.is_some() {
        batch_config.num_threads = threads;
    }
    if no_progress || cli.json {
        batch_config.show_progress = false;
    }

    let processor = BatchProcessor::with_config(Analyzer::from_config(config), batch_config);
    let summary = processor.process(&athletes)?;

    if let Some(path) = output {
        export::export_batch_reports(&summary.reports, path)
            .with_context(|| format!("Failed to export batch reports to {}", path.display()))?;
    }

    if cli.json {
        return print_json(&summary);
    }

    println!("{}", "Batch Results".magenta().bold());
    print_table(
        summary
            .reports
            .iter()
            .enumerate()
            .map(|(i, r)| BatchRow {
                athlete: r.athlete_id.clone().unwrap_or_else(|| format!("#{}", i + 1)),
                activities: r.activity_count,
                ctl: r
                    .current_load
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |s| format!("{:.1}", s.ctl)),
                tsb: r
                    .current_load
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |s| format!("{:+.1}", s.tsb)),
                prediction: r
                    .prediction
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |p| p.formatted_time.clone()),
                risk: format!("{:.0} ({})", r.risk.risk_score, r.risk.risk_level),
                errors: r.errors.len(),
            })
            .collect(),
    );

    let status = format!(
        "  {}/{} athletes succeeded in {} ms ({:.1}/s)",
        summary.successful,
        summary.total_athletes,
        summary.total_duration_ms,
        summary.throughput()
    );
    if summary.is_fully_successful() {
        println!("{}", status.green());
    } else {
        println!("{}", status.yellow());
    }
    Ok(())
}

fn run_config(cli: &Cli, config: &AppConfig, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            if cli.json {
                return print_json(config);
            }
            let content =
                toml::to_string_pretty(config).context("Failed to serialize configuration")?;
            println!("{}", content);
        }
        ConfigAction::Init { force } => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(AppConfig::default_config_path);
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            AppConfig::default().save_to_file(&path)?;
            println!(
                "{} {}",
                "✓ Wrote default configuration to".green(),
                path.display()
            );
        }
        ConfigAction::Path => {
            println!("{}", AppConfig::default_config_path().display());
        }
    }
    Ok(())
}
