//! `marksight`: operator CLI for the Marksight prediction engine.
//!
//! Reads `marksight.toml` (or the path given with `--config`), layered with
//! `MARKSIGHT_`-prefixed environment variables, opens the SQLite store and
//! runs one subcommand. Results are printed to stdout as JSON; logs go to
//! stderr.
//!
//! # Usage
//!
//! ```
//! marksight seed --students 2000
//! marksight train
//! marksight predict 0b3e7c9e-5f1a-4d8e-9a52-0f3c1f2b6d11 --subject Mathematics
//! MARKSIGHT_TRAINING__MIN_TRAINING_SAMPLES=200 marksight run-scheduler
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use marksight_engine::{
  PredictionService, Settings, SyntheticGenerator, SyntheticSource, SystemClock, TrainingPipeline,
  TrainingScheduler, Trigger,
};
use marksight_store_sqlite::SqliteStore;
use serde::Serialize;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Board-exam score prediction engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "marksight.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Generate synthetic students and import them into the store.
  Seed {
    #[arg(long, default_value_t = 1000)]
    students: usize,
    /// Years of history per student.
    #[arg(long, default_value_t = 3)]
    years:    u8,
    #[arg(long, default_value_t = 42)]
    seed:     u64,
  },
  /// Train a new model generation now.
  Train,
  /// Report whether the active model should be replaced, and why.
  ShouldRetrain,
  /// Predict board scores for one student.
  Predict {
    student_id: Uuid,
    /// Restrict to these subjects; repeatable. Defaults to the curriculum.
    #[arg(long = "subject")]
    subjects:   Vec<String>,
  },
  /// List a student's stored predictions, most recent first.
  History {
    student_id: Uuid,
    #[arg(long)]
    subject:    Option<String>,
    #[arg(long)]
    limit:      Option<usize>,
  },
  /// Record the actual board score of a prediction.
  RecordActual { prediction_id: Uuid, actual_score: f64 },
  /// Show active model performance.
  Performance {
    #[arg(long)]
    subject: Option<String>,
  },
  /// Summarise one student's results in a subject.
  Insights { student_id: Uuid, subject: String },
  /// Run the training scheduler until interrupted.
  RunScheduler,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = load_settings(&cli.config)?;

  let db_path = expand_tilde(&settings.database_path);
  let store = Arc::new(
    SqliteStore::open(&db_path)
      .await
      .with_context(|| format!("failed to open store at {db_path:?}"))?,
  );
  let clock = Arc::new(SystemClock);

  match cli.command {
    Command::Seed { students, years, seed } => {
      let generator = SyntheticGenerator::new(seed, years);
      let histories: Vec<_> = tokio::task::spawn_blocking(move || generator.generate(students))
        .await
        .context("synthetic generation panicked")?
        .into_iter()
        .map(|l| l.history)
        .collect();
      let imported = histories.len();
      let records = store
        .import_histories(histories)
        .await
        .context("failed to import synthetic students")?;
      info!(students = imported, records, "seeded store");
      print_json(&serde_json::json!({
        "students": imported,
        "records": records,
        "total_students": store.student_count().await?,
      }))
    }
    Command::Train => {
      let pipeline = TrainingPipeline::new(store, settings, clock);
      let outcome = pipeline.run(Trigger::Manual).await;
      print_json(&outcome)?;
      if !outcome.is_success() {
        bail!("training run did not succeed");
      }
      Ok(())
    }
    Command::ShouldRetrain => {
      let pipeline = TrainingPipeline::new(store, settings, clock);
      let decision = pipeline.retrain_decision().await?;
      print_json(&serde_json::json!({
        "should_retrain": decision.needs_retrain(),
        "reason": decision,
      }))
    }
    Command::Predict { student_id, subjects } => {
      let service = prediction_service(store, &settings, clock).await;
      let subjects = (!subjects.is_empty()).then_some(subjects);
      print_json(&service.predict(student_id, subjects).await?)
    }
    Command::History { student_id, subject, limit } => {
      let service = prediction_service(store, &settings, clock).await;
      print_json(&service.prediction_history(student_id, subject, limit).await?)
    }
    Command::RecordActual { prediction_id, actual_score } => {
      let service = prediction_service(store, &settings, clock).await;
      print_json(&service.record_actual(prediction_id, actual_score).await?)
    }
    Command::Performance { subject } => {
      let service = prediction_service(store, &settings, clock).await;
      print_json(&service.model_performance(subject).await?)
    }
    Command::Insights { student_id, subject } => {
      let service = prediction_service(store, &settings, clock).await;
      print_json(&service.subject_insights(student_id, &subject).await?)
    }
    Command::RunScheduler => run_scheduler(store, settings, clock).await,
  }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn load_settings(path: &Path) -> Result<Settings> {
  let raw = config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(
      config::Environment::with_prefix("MARKSIGHT")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let mut settings: Settings = raw
    .try_deserialize()
    .context("failed to deserialise Settings")?;
  settings.validate().context("invalid configuration")?;
  settings.model_dir = expand_tilde(&settings.model_dir);
  Ok(settings)
}

async fn prediction_service(
  store: Arc<SqliteStore>,
  settings: &Settings,
  clock: Arc<SystemClock>,
) -> PredictionService<SqliteStore> {
  PredictionService::load(store, settings.current_model_path(), clock).await
}

async fn run_scheduler(
  store: Arc<SqliteStore>,
  settings: Settings,
  clock: Arc<SystemClock>,
) -> Result<()> {
  if !settings.schedule.enabled {
    bail!("the scheduler is disabled (schedule.enabled = false)");
  }
  let schedule = settings.schedule.clone();
  let pipeline = TrainingPipeline::new(store, settings, clock.clone());
  let scheduler = TrainingScheduler::new(pipeline, clock, &schedule)?;

  scheduler.start().await;
  print_json(&scheduler.status().await)?;

  tokio::signal::ctrl_c()
    .await
    .context("failed to listen for ctrl-c")?;
  info!("shutdown requested");
  scheduler.stop().await;
  print_json(&scheduler.status().await)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
