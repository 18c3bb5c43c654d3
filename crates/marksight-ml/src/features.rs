//! Feature engineering: profile + record history → fixed-length vector.
//!
//! Every extraction produces the same set of named features regardless of how
//! sparse the history is; absent signal is encoded as `0`. The feature order
//! is alphabetical by name and is frozen the first time an engineer is used
//! (or injected from a trained generation via [`FeatureEngineer::with_layout`]).

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Arc, OnceLock},
};

use chrono::{Datelike, NaiveDate, Utc};
use marksight_core::{
  curriculum::{
    COMMERCE_STREAM, CORE_SUBJECTS, HUMANITIES, LANGUAGES, SCIENCE_STREAM,
    SUBJECTS, subject_slug,
  },
  student::{AcademicRecord, ExamType, StudentProfile},
};
use serde::{Deserialize, Serialize};

use crate::{
  FeatureError,
  stats::{linear_slope, mean, pearson, quadratic_fit, sample_std},
};

/// Longest look-back reported by `days_since_last_exam`.
const MAX_RECENCY_DAYS: i64 = 365;

// ─── Layout ──────────────────────────────────────────────────────────────────

/// An immutable, shareable feature-name ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureLayout(Arc<[String]>);

impl FeatureLayout {
  pub fn new(names: Vec<String>) -> Self { Self(names.into()) }

  pub fn names(&self) -> &[String] { &self.0 }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn position(&self, name: &str) -> Option<usize> {
    self.0.iter().position(|n| n == name)
  }
}

// ─── Vector ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FeatureVector {
  layout: FeatureLayout,
  values: Vec<f64>,
}

impl FeatureVector {
  pub fn layout(&self) -> &FeatureLayout { &self.layout }

  pub fn values(&self) -> &[f64] { &self.values }

  pub fn into_values(self) -> Vec<f64> { self.values }

  pub fn len(&self) -> usize { self.values.len() }

  pub fn is_empty(&self) -> bool { self.values.is_empty() }

  /// Value of a named feature, if the layout has it.
  pub fn get(&self, name: &str) -> Option<f64> {
    self.layout.position(name).map(|i| self.values[i])
  }
}

// ─── Engineer ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FeatureEngineer {
  layout:         OnceLock<FeatureLayout>,
  reference_date: Option<NaiveDate>,
}

impl FeatureEngineer {
  pub fn new() -> Self { Self::default() }

  /// An engineer whose ordering is already fixed, e.g. by a trained model.
  pub fn with_layout(layout: FeatureLayout) -> Self {
    Self {
      layout:         OnceLock::from(layout),
      reference_date: None,
    }
  }

  /// Pin "today" for recency features; defaults to the current UTC date.
  pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
    self.reference_date = Some(date);
    self
  }

  /// The frozen ordering, if extraction has happened or a layout was given.
  pub fn layout(&self) -> Option<&FeatureLayout> { self.layout.get() }

  /// Freeze the ordering now (if not already frozen) and return it.
  pub fn freeze(&self) -> &FeatureLayout {
    self.layout.get_or_init(canonical_layout)
  }

  pub fn extract(
    &self,
    profile: &StudentProfile,
    records: &[AcademicRecord],
  ) -> Result<FeatureVector, FeatureError> {
    validate(records)?;

    let today = self
      .reference_date
      .unwrap_or_else(|| Utc::now().date_naive());
    let history = History::new(records);

    let mut f = Features::default();
    demographic_features(&mut f, profile)?;
    curriculum_features(&mut f, profile, &history);
    subject_features(&mut f, &history);
    exam_type_features(&mut f, &history);
    overall_features(&mut f, &history);
    temporal_features(&mut f, &history, today);
    humanities_features(&mut f, &history);

    let layout = self.freeze().clone();
    let values = layout
      .names()
      .iter()
      .map(|name| f.0.get(name).copied().filter(|v| v.is_finite()).unwrap_or(0.0))
      .collect();
    Ok(FeatureVector { layout, values })
  }
}

/// The layout every extraction produces: the names of the default feature
/// map, alphabetically.
fn canonical_layout() -> FeatureLayout {
  let profile = StudentProfile {
    student_id:    Default::default(),
    current_class: 0,
    gender:        Default::default(),
    school_code:   None,
    academic_year: "2000-01".into(),
  };
  let history = History::new(&[]);
  let mut f = Features::default();
  // The placeholder profile always parses.
  let _ = demographic_features(&mut f, &profile);
  curriculum_features(&mut f, &profile, &history);
  subject_features(&mut f, &history);
  exam_type_features(&mut f, &history);
  overall_features(&mut f, &history);
  temporal_features(&mut f, &history, NaiveDate::MIN);
  humanities_features(&mut f, &history);
  FeatureLayout::new(f.0.into_keys().collect())
}

fn validate(records: &[AcademicRecord]) -> Result<(), FeatureError> {
  for r in records {
    if !(r.max_score > 0.0) || !r.max_score.is_finite() {
      return Err(FeatureError::NonPositiveMaxScore {
        record_id: r.record_id,
        max_score: r.max_score,
      });
    }
    if !(r.score >= 0.0) || !r.score.is_finite() {
      return Err(FeatureError::InvalidScore { record_id: r.record_id, score: r.score });
    }
  }
  Ok(())
}

// ─── Internals ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct Features(BTreeMap<String, f64>);

impl Features {
  fn set(&mut self, name: impl Into<String>, value: f64) {
    self.0.insert(name.into(), value);
  }
}

#[derive(Clone, Copy)]
struct Observation<'a> {
  subject:   &'a str,
  pct:       f64,
  exam_type: ExamType,
  date:      NaiveDate,
}

/// Records reduced to percentages, in chronological order.
struct History<'a> {
  obs: Vec<Observation<'a>>,
}

impl<'a> History<'a> {
  fn new(records: &'a [AcademicRecord]) -> Self {
    let mut obs: Vec<_> = records
      .iter()
      .map(|r| Observation {
        subject:   &r.subject,
        pct:       r.percentage(),
        exam_type: r.exam_type,
        date:      r.exam_date,
      })
      .collect();
    obs.sort_by_key(|o| o.date);
    Self { obs }
  }

  fn is_empty(&self) -> bool { self.obs.is_empty() }

  fn pcts(&self) -> Vec<f64> { self.obs.iter().map(|o| o.pct).collect() }

  fn subject(&self, subject: &str) -> Vec<Observation<'a>> {
    self.obs.iter().filter(|o| o.subject == subject).copied().collect()
  }

  fn subjects(&self) -> BTreeSet<&'a str> {
    self.obs.iter().map(|o| o.subject).collect()
  }

  /// Mean percentage per exam date for one subject.
  fn daily_means(&self, subject: &str) -> BTreeMap<NaiveDate, f64> {
    let mut acc: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for o in self.obs.iter().filter(|o| o.subject == subject) {
      let e = acc.entry(o.date).or_default();
      e.0 += o.pct;
      e.1 += 1;
    }
    acc.into_iter().map(|(d, (s, n))| (d, s / n as f64)).collect()
  }
}

fn monthly_means(obs: &[Observation<'_>]) -> Vec<f64> {
  let mut acc: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
  for o in obs {
    let e = acc.entry(o.date.month()).or_default();
    e.0 += o.pct;
    e.1 += 1;
  }
  acc.into_values().map(|(s, n)| s / n as f64).collect()
}

/// Correlation over the exam dates both subjects share.
fn date_aligned_correlation(history: &History<'_>, a: &str, b: &str) -> f64 {
  let (da, db) = (history.daily_means(a), history.daily_means(b));
  let (xs, ys): (Vec<f64>, Vec<f64>) = da
    .iter()
    .filter_map(|(d, x)| db.get(d).map(|y| (*x, *y)))
    .unzip();
  pearson(&xs, &ys)
}

fn school_type(code: Option<&str>) -> f64 {
  match code.and_then(|c| c.trim().chars().next()) {
    Some('1') => 1.0, // government
    Some('2') => 2.0, // private
    Some('3') => 3.0, // international
    _ => 0.0,
  }
}

fn class_difficulty(class: u8) -> f64 {
  match class {
    9 => 0.6,
    10 | 12 => 1.0,
    11 => 0.8,
    _ => 0.5,
  }
}

// ─── Feature groups ──────────────────────────────────────────────────────────

fn demographic_features(
  f: &mut Features,
  profile: &StudentProfile,
) -> Result<(), FeatureError> {
  f.set("current_class", f64::from(profile.current_class));
  f.set("gender_encoded", f64::from(profile.gender.encoded()));
  f.set("school_type", school_type(profile.school_code.as_deref()));
  f.set("academic_year_numeric", f64::from(profile.academic_year_start()?));
  Ok(())
}

fn curriculum_features(f: &mut Features, profile: &StudentProfile, h: &History<'_>) {
  let class = profile.current_class;
  f.set("is_board_class", if class == 10 || class == 12 { 1.0 } else { 0.0 });
  f.set("class_difficulty_factor", class_difficulty(class));

  let taken = h.subjects();
  let has_all = |set: &[&str]| set.iter().all(|s| taken.contains(s));
  let is_core = |s: &str| CORE_SUBJECTS.contains(&s);

  let core: Vec<f64> = h.obs.iter().filter(|o| is_core(o.subject)).map(|o| o.pct).collect();
  let elective: Vec<f64> =
    h.obs.iter().filter(|o| !is_core(o.subject)).map(|o| o.pct).collect();
  let (core_avg, elective_avg) = (mean(&core), mean(&elective));

  f.set("science_stream", if !h.is_empty() && has_all(&SCIENCE_STREAM) { 1.0 } else { 0.0 });
  f.set("commerce_stream", if !h.is_empty() && has_all(&COMMERCE_STREAM) { 1.0 } else { 0.0 });
  f.set("subject_diversity", taken.len() as f64);
  f.set("core_subjects_avg", core_avg);
  f.set("elective_subjects_avg", elective_avg);
  f.set("core_elective_gap", core_avg - elective_avg);
}

fn subject_features(f: &mut Features, h: &History<'_>) {
  for subject in SUBJECTS {
    let slug = subject_slug(subject);
    let pcts: Vec<f64> = h.subject(subject).iter().map(|o| o.pct).collect();
    f.set(format!("{slug}_avg"), mean(&pcts));
    f.set(format!("{slug}_std"), sample_std(&pcts).unwrap_or(0.0));
    f.set(format!("{slug}_count"), pcts.len() as f64);
  }
}

fn exam_type_features(f: &mut Features, h: &History<'_>) {
  for exam_type in ExamType::ALL {
    let pcts: Vec<f64> = h
      .obs
      .iter()
      .filter(|o| o.exam_type == exam_type)
      .map(|o| o.pct)
      .collect();
    f.set(format!("{exam_type}_avg"), mean(&pcts));
  }
}

fn overall_features(f: &mut Features, h: &History<'_>) {
  let pcts = h.pcts();
  let std = sample_std(&pcts);
  let (min, max) = pcts
    .iter()
    .fold(None, |acc: Option<(f64, f64)>, &p| match acc {
      None => Some((p, p)),
      Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
    })
    .unwrap_or((0.0, 0.0));

  f.set("overall_avg", mean(&pcts));
  f.set("overall_std", std.unwrap_or(0.0));
  f.set("overall_min", min);
  f.set("overall_max", max);
  f.set("performance_trend", if pcts.len() >= 3 { linear_slope(&pcts) } else { 0.0 });
  f.set("consistency_score", std.map(|s| 1.0 / (1.0 + s)).unwrap_or(0.0));
}

fn temporal_features(f: &mut Features, h: &History<'_>, today: NaiveDate) {
  let (Some(first), Some(last)) = (h.obs.first(), h.obs.last()) else {
    f.set("days_since_last_exam", MAX_RECENCY_DAYS as f64);
    f.set("exam_frequency", 0.0);
    f.set("best_month_performance", 0.0);
    f.set("worst_month_performance", 0.0);
    return;
  };

  let since = (today - last.date).num_days().clamp(0, MAX_RECENCY_DAYS);
  f.set("days_since_last_exam", since as f64);

  let span = (last.date - first.date).num_days();
  let frequency = if span > 0 {
    h.obs.len() as f64 / (span as f64 / 30.0)
  } else {
    0.0
  };
  f.set("exam_frequency", frequency);

  let monthly = monthly_means(&h.obs);
  let best = monthly.iter().copied().fold(f64::MIN, f64::max);
  let worst = monthly.iter().copied().fold(f64::MAX, f64::min);
  f.set("best_month_performance", best);
  f.set("worst_month_performance", worst);
}

fn humanities_features(f: &mut Features, h: &History<'_>) {
  for subject in HUMANITIES {
    let slug = subject_slug(subject);
    for lang in LANGUAGES {
      let corr = date_aligned_correlation(h, subject, lang);
      f.set(format!("{slug}_{}_correlation", subject_slug(lang)), corr);
    }

    let obs = h.subject(subject);
    let pcts: Vec<f64> = obs.iter().map(|o| o.pct).collect();
    let (mut seasonal, mut quad, mut lin, mut momentum, mut stability) =
      (0.0, 0.0, 0.0, 0.0, 0.0);
    if pcts.len() >= 3 {
      let monthly = monthly_means(&obs);
      seasonal = if monthly.len() > 1 { sample_std(&monthly).unwrap_or(0.0) } else { 0.0 };
      if let Some([a, b, _]) = quadratic_fit(&pcts) {
        quad = a;
        lin = b;
      }
      let n = pcts.len();
      momentum = pcts[n - 1] - (pcts[n - 2] + pcts[n - 3]) / 2.0;
      stability = 1.0 / (1.0 + sample_std(&pcts).unwrap_or(0.0));
    }
    f.set(format!("{slug}_seasonal_variation"), seasonal);
    f.set(format!("{slug}_trend_quadratic"), quad);
    f.set(format!("{slug}_trend_linear"), lin);
    f.set(format!("{slug}_recent_momentum"), momentum);
    f.set(format!("{slug}_stability"), stability);
  }

  let humanities: Vec<f64> = h
    .obs
    .iter()
    .filter(|o| HUMANITIES.contains(&o.subject))
    .map(|o| o.pct)
    .collect();
  f.set("humanities_overall_avg", mean(&humanities));
  f.set("humanities_overall_std", sample_std(&humanities).unwrap_or(0.0));

  for (i, a) in HUMANITIES.iter().enumerate() {
    for b in &HUMANITIES[i + 1..] {
      let name = format!("{}_{}_correlation", subject_slug(a), subject_slug(b));
      f.set(name, date_aligned_correlation(h, a, b));
    }
  }
}
