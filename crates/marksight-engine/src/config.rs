//! Engine settings, deserialised from the binary's layered configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.

use std::path::{Path, PathBuf};

use chrono::{NaiveTime, Weekday};
use marksight_ml::EnsembleConfig;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub database_path: PathBuf,
  /// Directory holding `current.json` and the `generations/` archive.
  pub model_dir:     PathBuf,
  pub training:      TrainingSettings,
  pub model:         EnsembleConfig,
  pub schedule:      ScheduleSettings,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      database_path: PathBuf::from("marksight.db"),
      model_dir:     PathBuf::from("models"),
      training:      TrainingSettings::default(),
      model:         EnsembleConfig::default(),
      schedule:      ScheduleSettings::default(),
    }
  }
}

impl Settings {
  /// Path of the artifact the prediction service serves.
  pub fn current_model_path(&self) -> PathBuf { current_model_path(&self.model_dir) }

  /// Path of the archived artifact for one generation.
  pub fn generation_path(&self, version: &str) -> PathBuf {
    self.model_dir.join("generations").join(format!("{version}.json"))
  }

  /// Reject values the engine cannot work with.
  pub fn validate(&self) -> Result<()> {
    let t = &self.training;
    if !(0.0..1.0).contains(&t.validation_fraction) {
      return Err(Error::Config(format!(
        "training.validation_fraction must be in [0, 1), got {}",
        t.validation_fraction
      )));
    }
    if t.min_subject_samples == 0 {
      return Err(Error::Config("training.min_subject_samples must be positive".into()));
    }
    if self.model.families.is_empty() {
      return Err(Error::Config("model.families must name at least one family".into()));
    }
    if self.schedule.tick_seconds == 0 {
      return Err(Error::Config("schedule.tick_seconds must be positive".into()));
    }
    self.schedule.daily_time()?;
    self.schedule.weekly_time()?;
    Ok(())
  }
}

pub fn current_model_path(model_dir: &Path) -> PathBuf { model_dir.join("current.json") }

// ─── Training ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
  /// Fewer feature rows than this fails the run as `insufficient_data`.
  pub min_training_samples:       usize,
  /// Subjects with fewer non-zero targets are skipped.
  pub min_subject_samples:        usize,
  pub retrain_accuracy_threshold: f64,
  pub max_model_age_days:         i64,
  /// Always add synthetic students, even when real data is plentiful.
  pub use_synthetic:              bool,
  pub synthetic_students:         usize,
  pub synthetic_years:            u8,
  pub validation_fraction:        f64,
  pub random_seed:                u64,
}

impl Default for TrainingSettings {
  fn default() -> Self {
    Self {
      min_training_samples:       1000,
      min_subject_samples:        100,
      retrain_accuracy_threshold: 0.85,
      max_model_age_days:         30,
      use_synthetic:              true,
      synthetic_students:         5000,
      synthetic_years:            3,
      validation_fraction:        0.2,
      random_seed:                42,
    }
  }
}

// ─── Schedule ────────────────────────────────────────────────────────────────

/// Times are UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
  pub enabled:       bool,
  pub tick_seconds:  u64,
  pub daily_hour:    u32,
  pub daily_minute:  u32,
  pub weekly_day:    Weekday,
  pub weekly_hour:   u32,
  pub weekly_minute: u32,
}

impl Default for ScheduleSettings {
  fn default() -> Self {
    Self {
      enabled:       true,
      tick_seconds:  60,
      daily_hour:    2,
      daily_minute:  0,
      weekly_day:    Weekday::Sun,
      weekly_hour:   1,
      weekly_minute: 0,
    }
  }
}

impl ScheduleSettings {
  pub fn daily_time(&self) -> Result<NaiveTime> {
    slot_time("daily", self.daily_hour, self.daily_minute)
  }

  pub fn weekly_time(&self) -> Result<NaiveTime> {
    slot_time("weekly", self.weekly_hour, self.weekly_minute)
  }
}

fn slot_time(slot: &str, hour: u32, minute: u32) -> Result<NaiveTime> {
  NaiveTime::from_hms_opt(hour, minute, 0)
    .ok_or_else(|| Error::Config(format!("invalid {slot} time {hour:02}:{minute:02}")))
}
