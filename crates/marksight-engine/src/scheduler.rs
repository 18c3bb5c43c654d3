//! Background training scheduler.
//!
//! One [`TrainingScheduler`] owns a training job, a clock and the schedule.
//! Runs are serialised by a run lock: a scheduled slot that comes due while a
//! run is in flight is skipped, and [`TrainingScheduler::trigger_now`] reports
//! [`TriggerResult::Busy`] instead of queueing.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::Serialize;
use strum::Display;
use tokio::{
  sync::{Mutex, OwnedMutexGuard, watch},
  task::JoinHandle,
  time::MissedTickBehavior,
};
use tracing::{error, info, warn};

use crate::{
  Result,
  clock::Clock,
  config::ScheduleSettings,
  pipeline::{TrainingOutcome, Trigger},
};

/// The work a scheduler drives.
pub trait TrainingJob: Send + Sync + 'static {
  fn should_retrain(&self) -> impl Future<Output = Result<bool>> + Send + '_;

  fn run(&self, trigger: Trigger) -> impl Future<Output = TrainingOutcome> + Send + '_;
}

// ─── Schedule ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
  Daily,
  Weekly,
}

impl JobKind {
  pub fn name(self) -> &'static str {
    match self {
      Self::Daily => "daily_retrain_check",
      Self::Weekly => "weekly_full_retrain",
    }
  }

  fn trigger(self) -> Trigger {
    match self {
      Self::Daily => Trigger::Daily,
      Self::Weekly => Trigger::Weekly,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slots {
  daily:       NaiveTime,
  weekly_day:  Weekday,
  weekly_time: NaiveTime,
}

impl Slots {
  fn next_run(&self, kind: JobKind, after: DateTime<Utc>) -> DateTime<Utc> {
    match kind {
      JobKind::Daily => next_daily(after, self.daily),
      JobKind::Weekly => next_weekly(after, self.weekly_day, self.weekly_time),
    }
  }

  /// Jobs whose slot falls in `(since, now]`, weekly first.
  fn due(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Vec<JobKind> {
    [JobKind::Weekly, JobKind::Daily]
      .into_iter()
      .filter(|&kind| self.next_run(kind, since) <= now)
      .collect()
  }
}

/// First instant strictly after `after` whose time of day is `at`.
pub fn next_daily(after: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
  let candidate = after.date_naive().and_time(at).and_utc();
  if candidate > after { candidate } else { candidate + chrono::Duration::days(1) }
}

/// First instant strictly after `after` falling on `day` at `at`.
pub fn next_weekly(after: DateTime<Utc>, day: Weekday, at: NaiveTime) -> DateTime<Utc> {
  let ahead = (7 + day.num_days_from_monday() - after.weekday().num_days_from_monday()) % 7;
  let candidate = (after.date_naive() + chrono::Duration::days(i64::from(ahead)))
    .and_time(at)
    .and_utc();
  if candidate > after { candidate } else { candidate + chrono::Duration::days(7) }
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PendingJob {
  pub name:     &'static str,
  pub kind:     JobKind,
  pub next_run: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
  pub running:              bool,
  pub training_in_progress: bool,
  pub last_outcome:         Option<TrainingOutcome>,
  /// Empty while the scheduler is stopped.
  pub pending_jobs:         Vec<PendingJob>,
  pub now:                  DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TriggerResult {
  Completed(TrainingOutcome),
  /// Another run holds the lock; carries the last finished outcome.
  Busy { last: Option<TrainingOutcome> },
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

pub struct TrainingScheduler<J> {
  inner: Arc<Inner<J>>,
}

impl<J> Clone for TrainingScheduler<J> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

struct Inner<J> {
  job:      J,
  clock:    Arc<dyn Clock>,
  slots:    Slots,
  tick:     Duration,
  run_lock: Arc<Mutex<()>>,
  last:     std::sync::Mutex<Option<TrainingOutcome>>,
  control:  Mutex<Option<Control>>,
}

struct Control {
  shutdown: watch::Sender<bool>,
  handle:   JoinHandle<()>,
}

impl<J: TrainingJob> TrainingScheduler<J> {
  pub fn new(job: J, clock: Arc<dyn Clock>, schedule: &ScheduleSettings) -> Result<Self> {
    let slots = Slots {
      daily:       schedule.daily_time()?,
      weekly_day:  schedule.weekly_day,
      weekly_time: schedule.weekly_time()?,
    };
    Ok(Self {
      inner: Arc::new(Inner {
        job,
        clock,
        slots,
        tick: Duration::from_secs(schedule.tick_seconds.max(1)),
        run_lock: Arc::new(Mutex::new(())),
        last: std::sync::Mutex::new(None),
        control: Mutex::new(None),
      }),
    })
  }

  pub fn job(&self) -> &J { &self.inner.job }

  /// Start the schedule: begin ticking, then check once whether a retrain is
  /// needed and launch a run if so. Ticking continues until
  /// [`stop`](Self::stop). Calling `start` on a running scheduler does nothing.
  pub async fn start(&self) {
    {
      let mut control = self.inner.control.lock().await;
      if control.is_some() {
        info!("training scheduler is already running");
        return;
      }
      let (shutdown, rx) = watch::channel(false);
      let handle = tokio::spawn(self.inner.clone().tick_loop(rx));
      *control = Some(Control { shutdown, handle });
    }
    info!("training scheduler started");

    // Checked outside the control lock.
    match self.inner.job.should_retrain().await {
      Ok(true) => {
        info!("retrain needed at startup");
        self.inner.clone().spawn_run(Trigger::Startup);
      }
      Ok(false) => info!("model is up to date; no startup run"),
      Err(e) => error!(error = %e, "startup retrain check failed"),
    }
  }

  /// Stop ticking. A run already in flight finishes on its own.
  pub async fn stop(&self) {
    let Some(control) = self.inner.control.lock().await.take() else {
      return;
    };
    control.shutdown.send_replace(true);
    if let Err(e) = control.handle.await {
      warn!(error = %e, "scheduler loop ended abnormally");
    }
    info!("training scheduler stopped");
  }

  pub async fn is_running(&self) -> bool { self.inner.control.lock().await.is_some() }

  /// Run now on the caller's task, unless a run is already in progress.
  pub async fn trigger_now(&self) -> TriggerResult {
    match self.inner.run_lock.clone().try_lock_owned() {
      Ok(guard) => TriggerResult::Completed(self.inner.run(guard, Trigger::Manual).await),
      Err(_) => {
        info!("manual trigger refused: training already in progress");
        TriggerResult::Busy { last: self.inner.last_outcome() }
      }
    }
  }

  pub async fn status(&self) -> SchedulerStatus {
    let running = self.is_running().await;
    let now = self.inner.clock.now();
    let pending_jobs = if running {
      [JobKind::Daily, JobKind::Weekly]
        .into_iter()
        .map(|kind| PendingJob {
          name: kind.name(),
          kind,
          next_run: self.inner.slots.next_run(kind, now),
        })
        .collect()
    } else {
      Vec::new()
    };
    SchedulerStatus {
      running,
      training_in_progress: self.inner.run_lock.try_lock().is_err(),
      last_outcome: self.inner.last_outcome(),
      pending_jobs,
      now,
    }
  }

  pub fn last_outcome(&self) -> Option<TrainingOutcome> { self.inner.last_outcome() }
}

impl<J: TrainingJob> Inner<J> {
  fn last_outcome(&self) -> Option<TrainingOutcome> {
    self
      .last
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner)
      .clone()
  }

  async fn run(&self, guard: OwnedMutexGuard<()>, trigger: Trigger) -> TrainingOutcome {
    let outcome = self.job.run(trigger).await;
    info!(%trigger, status = %outcome.status, "training job finished");
    *self
      .last
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(outcome.clone());
    drop(guard);
    outcome
  }

  /// Launch a run on its own task, or skip it if one is already running.
  fn spawn_run(self: Arc<Self>, trigger: Trigger) {
    match self.run_lock.clone().try_lock_owned() {
      Ok(guard) => {
        tokio::spawn(async move {
          self.run(guard, trigger).await;
        });
      }
      Err(_) => info!(%trigger, "training already in progress; slot skipped"),
    }
  }

  async fn tick_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(self.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut since = self.clock.now();
    loop {
      tokio::select! {
        _ = ticker.tick() => {}
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
          continue;
        }
      }
      let now = self.clock.now();
      for kind in self.slots.due(since, now) {
        info!(job = kind.name(), "scheduled job due");
        self.clone().spawn_run(kind.trigger());
      }
      since = now;
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    // March 2025: the 2nd is a Sunday.
    Utc.with_ymd_and_hms(2025, 3, d, h, m, 0).unwrap()
  }

  fn slots() -> Slots {
    Slots {
      daily:       NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
      weekly_day:  Weekday::Sun,
      weekly_time: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
    }
  }

  #[test]
  fn daily_slot_is_strictly_after() {
    let two = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
    assert_eq!(next_daily(at(3, 1, 59), two), at(3, 2, 0));
    assert_eq!(next_daily(at(3, 2, 0), two), at(4, 2, 0));
    assert_eq!(next_daily(at(31, 23, 0), two), Utc.with_ymd_and_hms(2025, 4, 1, 2, 0, 0).unwrap());
  }

  #[test]
  fn weekly_slot_lands_on_the_weekday() {
    let one = NaiveTime::from_hms_opt(1, 0, 0).unwrap();
    assert_eq!(next_weekly(at(3, 12, 0), Weekday::Sun, one), at(9, 1, 0));
    assert_eq!(next_weekly(at(9, 0, 59), Weekday::Sun, one), at(9, 1, 0));
    assert_eq!(next_weekly(at(9, 1, 0), Weekday::Sun, one), at(16, 1, 0));
    assert_eq!(next_weekly(at(8, 23, 0), Weekday::Sat, one), at(15, 1, 0));
  }

  #[test]
  fn due_covers_the_tick_window() {
    let s = slots();
    assert!(s.due(at(3, 1, 0), at(3, 1, 59)).is_empty());
    assert_eq!(s.due(at(3, 1, 59), at(3, 2, 0)), vec![JobKind::Daily]);
    assert_eq!(s.due(at(9, 0, 59), at(9, 1, 0)), vec![JobKind::Weekly]);
    // A long gap catches both, weekly first.
    assert_eq!(s.due(at(8, 23, 0), at(9, 3, 0)), vec![JobKind::Weekly, JobKind::Daily]);
  }
}
