use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::oneshot;

use rehabrs::admin::AdminConsole;
use rehabrs::logging::{init_logging, LogLevel};
use rehabrs::metrics::{decode_samples, sample_span_seconds};
use rehabrs::recommendation::RecommendationOutcome;
use rehabrs::{
    sensor_channel, AdminStrategy, AppConfig, ExerciseSession, MetricsEngine, RecommendationEngine, RehabError,
    RehabStore, SqliteStore, UserProfile, VelocitySample,
};

/// rehabrs - wheelchair rehabilitation exercise coach
///
/// Derives motion metrics from wheel-sensor velocity samples and produces
/// interval-workout recommendations from peer and personal history.
#[derive(Parser)]
#[command(name = "rehabrs")]
#[command(version = "0.1.0")]
#[command(about = "Rehabilitation exercise metrics and workout recommendations", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Overrides the database path from the config
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute metrics from a JSON samples file
    Metrics {
        /// File holding `[{"timestamp": 0, "velocity": 7.2}, ...]`
        #[arg(short, long)]
        file: PathBuf,

        /// Session length in seconds (defaults to the sample span)
        #[arg(short, long)]
        duration: Option<u32>,

        /// Also print the per-sample series
        #[arg(long)]
        series: bool,

        /// Print JSON instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Show or generate a user's workout recommendation
    Recommend {
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        json: bool,
    },

    /// Clinician generation, replacing the current recommendation
    AdminGenerate {
        #[arg(short, long)]
        user: String,

        /// quick or knn (defaults to admin.strategy)
        #[arg(short, long)]
        strategy: Option<AdminStrategy>,

        #[arg(long)]
        json: bool,
    },

    /// Replay a samples file through a live exercise session
    Session {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        file: PathBuf,

        /// Delay between replayed readings
        #[arg(long, default_value = "0")]
        interval_ms: u64,
    },

    /// Manage user profiles
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Configure application settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create or update a user
    Add {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        age: Option<u32>,

        #[arg(long)]
        gender: Option<String>,

        #[arg(long)]
        sci_cause: Option<String>,

        #[arg(long)]
        sci_level: Option<String>,

        #[arg(long)]
        sci_category: Option<String>,

        #[arg(long)]
        sci_severity: Option<String>,

        #[arg(long)]
        sci_class: Option<String>,

        /// Clinician account
        #[arg(long)]
        admin: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// List all configuration options
    List,
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl FieldRow {
    fn new(field: &str, value: impl ToString) -> Self {
        FieldRow {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Tabled)]
struct PeerRow {
    #[tabled(rename = "Peer")]
    name: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Exercises")]
    exercises: usize,
    #[tabled(rename = "Distance")]
    distance: String,
}

#[derive(Tabled)]
struct SeriesRow {
    #[tabled(rename = "Time")]
    label: String,
    #[tabled(rename = "Velocity (m/s)")]
    velocity: String,
    #[tabled(rename = "Accel (m/s²)")]
    acceleration: String,
    #[tabled(rename = "Distance (km)")]
    distance: String,
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    println!("{}", Table::new(rows).with(Style::rounded()));
}

fn format_duration(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn load_config(path: Option<&Path>) -> Result<(AppConfig, PathBuf)> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(AppConfig::default_config_path);
    let config = if path.exists() {
        AppConfig::load_from_file(&path)?
    } else {
        AppConfig::default()
    };
    Ok((config, path))
}

fn open_store(config: &AppConfig, override_path: Option<&Path>) -> Result<SqliteStore> {
    let path = override_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.settings.database_path());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
    }
    Ok(SqliteStore::open(&path, config.settings.busy_timeout())?)
}

fn read_samples(path: &Path) -> Result<Vec<VelocitySample>> {
    let payload =
        fs::read_to_string(path).with_context(|| format!("Failed to read samples file: {}", path.display()))?;
    decode_samples(&payload).map_err(|e| RehabError::from(e).into())
}

fn print_outcome(outcome: &RecommendationOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    let rec = &outcome.recommendation;
    println!("{}", "Workout recommendation".green().bold());
    println!("{}", outcome.message.dimmed());

    let mut rows = vec![
        FieldRow::new("Source", outcome.source),
        FieldRow::new(
            "Target velocity",
            format!("{:.2} m/s ({:.1} km/h)", rec.target_velocity_ms, rec.target_velocity_kmh()),
        ),
        FieldRow::new("Work", format!("{} s", rec.work_seconds)),
        FieldRow::new("Rest", format!("{} s", rec.rest_seconds)),
        FieldRow::new("Repetitions", rec.repetitions),
        FieldRow::new("Session", format_duration(outcome.session_duration_seconds)),
        FieldRow::new("Target distance", format!("{:.2} km", outcome.target_distance_km)),
        FieldRow::new("Target acceleration", format!("{:.2} m/s²", outcome.target_acceleration_ms2)),
        FieldRow::new("Confidence", format!("{}%", rec.confidence_percent)),
    ];
    if let Some(notes) = &rec.notes {
        rows.push(FieldRow::new("Notes", notes));
    }
    print_table(rows);

    if !outcome.similar_profiles.is_empty() {
        println!("{}", "Similar users".cyan().bold());
        print_table(
            outcome
                .similar_profiles
                .iter()
                .map(|p| PeerRow {
                    name: p.name.clone(),
                    age: p.age.map_or_else(|| "-".to_string(), |a| a.to_string()),
                    category: p.sci_category.clone().unwrap_or_else(|| "-".to_string()),
                    level: p.sci_level.clone().unwrap_or_else(|| "-".to_string()),
                    exercises: p.exercise_count,
                    distance: format!("{:.3}", p.distance),
                })
                .collect(),
        );
    }
    Ok(())
}

fn run_metrics(config: &AppConfig, file: &Path, duration: Option<u32>, series: bool, json: bool) -> Result<()> {
    let samples = read_samples(file)?;
    let engine = MetricsEngine::with_config(config.metrics.clone());
    let duration = duration.unwrap_or_else(|| sample_span_seconds(&samples));
    let metrics = engine.motion_statistics(&samples, duration).rounded();

    if json {
        let mut value = serde_json::json!({ "metrics": metrics });
        if series {
            value["series"] = serde_json::to_value(engine.motion_series(&samples))?;
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", format!("Exercise metrics ({} samples)", samples.len()).blue().bold());
    print_table(vec![
        FieldRow::new("Duration", format_duration(metrics.total_duration_seconds)),
        FieldRow::new("Distance", format!("{} m", metrics.total_distance_meters)),
        FieldRow::new("Average velocity", format!("{} m/s", metrics.avg_velocity_ms)),
        FieldRow::new("Max velocity", format!("{} m/s", metrics.max_velocity_ms)),
        FieldRow::new("Min velocity", format!("{} m/s", metrics.min_velocity_ms)),
        FieldRow::new("Average acceleration", format!("{} m/s²", metrics.avg_acceleration_ms2)),
    ]);

    if series {
        print_table(
            engine
                .motion_series(&samples)
                .into_iter()
                .map(|p| SeriesRow {
                    label: p.label,
                    velocity: format!("{:.2}", p.velocity_ms),
                    acceleration: format!("{:.4}", p.acceleration_ms2),
                    distance: format!("{:.3}", p.cumulative_distance_km),
                })
                .collect(),
        );
    }
    Ok(())
}

fn run_session(config: &AppConfig, store: &mut SqliteStore, user: &str, file: &Path, interval_ms: u64) -> Result<()> {
    let samples = read_samples(file)?;
    let span_seconds = i64::from(sample_span_seconds(&samples));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let started_at = Utc::now();
    let mut session = ExerciseSession::start(store, user, started_at, MetricsEngine::with_config(config.metrics.clone()))?;
    println!("{} {}", "Session started:".green().bold(), session.exercise_id());

    let reason = runtime.block_on(async {
        let (feed, subscription) = sensor_channel(64);
        let (stop_tx, stop_rx) = oneshot::channel();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = stop_tx.send(());
            }
        });

        let producer = tokio::spawn(async move {
            for sample in samples {
                if feed.send(sample).await.is_err() {
                    break;
                }
                if interval_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }
        });

        let reason = session.consume(subscription, stop_rx).await;
        producer.abort();
        reason
    });

    let ended_at = Utc::now().max(started_at + ChronoDuration::seconds(span_seconds));
    let exercise = session.finish(store, ended_at)?;

    println!("{} {:?}", "Session ended:".green().bold(), reason);
    let metrics = MetricsEngine::with_config(config.metrics.clone())
        .recompute(&exercise)
        .rounded();
    print_table(vec![
        FieldRow::new("Readings kept", exercise.samples.len()),
        FieldRow::new("Duration", format_duration(exercise.duration_seconds)),
        FieldRow::new("Distance", format!("{} m", metrics.total_distance_meters)),
        FieldRow::new("Average velocity", format!("{} m/s", metrics.avg_velocity_ms)),
    ]);
    Ok(())
}

fn run_config(action: ConfigAction, mut config: AppConfig, path: &Path) -> Result<()> {
    match action {
        ConfigAction::List => {
            println!("{} {}", "Configuration:".white().bold(), path.display());
            let rows = config
                .list()?
                .into_iter()
                .map(|(key, value)| FieldRow { field: key, value })
                .collect();
            print_table(rows);
        }
        ConfigAction::Get { key } => {
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save_to_file(path)?;
            println!("{} {} = {}", "✓ Updated".green(), key, value);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!("Config file already exists: {} (use --force to overwrite)", path.display());
            }
            AppConfig::default().save_to_file(path)?;
            println!("{} {}", "✓ Wrote default configuration to".green(), path.display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, config_path) = load_config(cli.config.as_deref())?;

    config.logging.level = match cli.verbose {
        0 => config.logging.level,
        1 => LogLevel::Info,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Metrics {
            file,
            duration,
            series,
            json,
        } => run_metrics(&config, &file, duration, series, json)?,

        Commands::Recommend { user, json } => {
            let mut store = open_store(&config, cli.database.as_deref())?;
            let engine = RecommendationEngine::with_config(config.recommendation.clone());
            match engine.get_recommendation(&mut store, &user, Utc::now())? {
                Some(outcome) => print_outcome(&outcome, json)?,
                None => println!(
                    "{}",
                    "No exercises recorded yet. Ask a clinician to create the workout manually.".yellow()
                ),
            }
        }

        Commands::AdminGenerate { user, strategy, json } => {
            let mut store = open_store(&config, cli.database.as_deref())?;
            let mut admin_config = config.admin.clone();
            if let Some(strategy) = strategy {
                admin_config.strategy = strategy;
            }
            let console = AdminConsole::new(
                admin_config,
                RecommendationEngine::with_config(config.recommendation.clone()),
            );
            match console.admin_generate(&mut store, &user, Utc::now()) {
                Ok(outcome) => print_outcome(&outcome, json)?,
                Err(err @ RehabError::InsufficientData { .. }) => {
                    println!("{}", err.user_message().yellow());
                }
                Err(err) => return Err(err.into()),
            }
        }

        Commands::Session {
            user,
            file,
            interval_ms,
        } => {
            let mut store = open_store(&config, cli.database.as_deref())?;
            run_session(&config, &mut store, &user, &file, interval_ms)?;
        }

        Commands::User { action } => match action {
            UserAction::Add {
                id,
                name,
                age,
                gender,
                sci_cause,
                sci_level,
                sci_category,
                sci_severity,
                sci_class,
                admin,
            } => {
                let mut store = open_store(&config, cli.database.as_deref())?;
                let mut user = UserProfile::new(id, name);
                user.demographic.age = age;
                user.demographic.gender = gender;
                user.clinical.sci_cause = sci_cause;
                user.clinical.sci_level = sci_level;
                user.clinical.sci_category = sci_category;
                user.clinical.sci_severity = sci_severity;
                user.clinical.sci_class = sci_class;
                user.is_admin = admin;
                store.upsert_user(&user)?;
                println!("{} {}", "✓ Saved user".green(), user.id);
            }
        },

        Commands::Config { action } => run_config(action, config, &config_path)?,
    }

    Ok(())
}
