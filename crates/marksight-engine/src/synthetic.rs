//! Synthetic CBSE student histories used to bootstrap training volume.
//!
//! Each student gets a latent ability, per-subject abilities shaped by
//! subject difficulty and cross-subject correlation, and one academic year of
//! exams per class they have passed through. Board targets are derived from
//! the generated history rather than sampled independently, so the features
//! carry real signal about the label.

use std::{
  collections::BTreeMap,
  f64::consts::PI,
};

use chrono::{Datelike, Duration, NaiveDate, Utc};
use marksight_core::{
  curriculum,
  student::{
    AcademicRecord, ExamType, Gender, LabelledHistory, StudentHistory, StudentProfile, Term,
  },
};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};
use uuid::Uuid;

/// A source of labelled histories.
pub trait SyntheticSource: Send + Sync + 'static {
  /// Generate up to `count` labelled students. Students that end up without
  /// any target are dropped, so fewer may be returned.
  fn generate(&self, count: usize) -> Vec<LabelledHistory>;
}

// ─── Curriculum parameters ───────────────────────────────────────────────────

/// Multiplier applied to a student's ability in each subject.
const SUBJECT_DIFFICULTY: [(&str, f64); 14] = [
  ("Mathematics", 0.75),
  ("Physics", 0.80),
  ("Chemistry", 0.78),
  ("Biology", 0.72),
  ("English", 0.85),
  ("Hindi", 0.88),
  ("Computer Science", 0.82),
  ("Physical Education", 0.95),
  ("Economics", 0.80),
  ("Business Studies", 0.83),
  ("Accountancy", 0.77),
  ("Political Science", 0.85),
  ("History", 0.87),
  ("Geography", 0.84),
];

/// Pulled towards the first subject, applied in order.
const SUBJECT_CORRELATIONS: [(&str, &str, f64); 9] = [
  ("Mathematics", "Physics", 0.8),
  ("Physics", "Chemistry", 0.7),
  ("Chemistry", "Biology", 0.6),
  ("Mathematics", "Computer Science", 0.75),
  ("English", "Hindi", 0.4),
  ("Economics", "Business Studies", 0.85),
  ("Business Studies", "Accountancy", 0.9),
  ("History", "Political Science", 0.7),
  ("Geography", "History", 0.6),
];

const BASE_SUBJECTS: [&str; 4] = ["Mathematics", "English", "Hindi", "Physical Education"];

/// Combined subjects of the secondary classes. They are not modelled
/// individually but still show up in a student's history.
const SECONDARY_SUBJECTS: [&str; 2] = ["Science", "Social Science"];

const STREAMS: [&[&str]; 3] = [
  &["Physics", "Chemistry", "Biology", "Computer Science"],
  &["Economics", "Business Studies", "Accountancy"],
  &["History", "Political Science", "Geography", "Economics"],
];

/// Unknown subjects fall back to this difficulty.
const DEFAULT_DIFFICULTY: f64 = 0.8;

/// One sitting in the yearly exam calendar: days after the start of the
/// year, exam type, term.
const EXAM_CALENDAR: [(i64, ExamType, Term); 4] = [
  (30, ExamType::UnitTest, Term::FirstTerm),
  (90, ExamType::MidTerm, Term::FirstTerm),
  (150, ExamType::UnitTest, Term::SecondTerm),
  (210, ExamType::Final, Term::SecondTerm),
];

const BOARD_EXAM_DAY: i64 = 270;

fn exam_multiplier(exam_type: ExamType) -> f64 {
  match exam_type {
    ExamType::UnitTest => 1.05,
    ExamType::MidTerm => 1.0,
    ExamType::Final => 0.95,
    ExamType::Board => 0.90,
    ExamType::PreBoard => 0.92,
    ExamType::PracticeTest => 1.0,
  }
}

fn class_multiplier(class: u8) -> f64 {
  match class {
    9 => 1.1,
    10 => 1.0,
    11 => 0.95,
    12 => 0.9,
    _ => 1.0,
  }
}

fn difficulty(subject: &str) -> f64 {
  SUBJECT_DIFFICULTY
    .iter()
    .find(|(s, _)| *s == subject)
    .map_or(DEFAULT_DIFFICULTY, |&(_, d)| d)
}

// ─── Generator ───────────────────────────────────────────────────────────────

/// Seeded generator: the same seed, count and reference date always produce
/// the same students, ids included.
#[derive(Debug, Clone)]
pub struct SyntheticGenerator {
  seed:  u64,
  years: u8,
  today: Option<NaiveDate>,
}

impl SyntheticGenerator {
  pub fn new(seed: u64, years: u8) -> Self { Self { seed, years: years.max(1), today: None } }

  /// Pin the date exam calendars are laid out from; defaults to today (UTC).
  pub fn with_today(mut self, today: NaiveDate) -> Self {
    self.today = Some(today);
    self
  }

  fn student(&self, rng: &mut StdRng, today: NaiveDate) -> LabelledHistory {
    let student_id = random_uuid(rng);
    let current_class = *curriculum::CLASSES.choose(rng).unwrap_or(&10);
    let gender = *[Gender::Male, Gender::Female, Gender::Other]
      .choose(rng)
      .unwrap_or(&Gender::Other);
    let school_prefix = ["10", "20", "30"].choose(rng).copied().unwrap_or("10");
    let school_code = format!("{school_prefix}{}", rng.random_range(1000..=9999));
    let profile = StudentProfile {
      student_id,
      current_class,
      gender,
      school_code: Some(school_code),
      academic_year: academic_year_of(today),
    };

    let abilities = subject_abilities(rng);
    let stream = STREAMS.choose(rng).copied().unwrap_or(STREAMS[0]);

    let mut records = Vec::new();
    let years = i64::from(self.years);
    for offset in 0..years {
      let behind = u8::try_from(years - 1 - offset).unwrap_or(u8::MAX);
      let class = current_class.saturating_sub(behind).max(9);
      // The final year is the current one; earlier classes lie further back.
      let start = today - Duration::days(365 * (years - offset));
      records.extend(year_records(rng, &profile, &abilities, stream, class, start));
    }

    let history = StudentHistory::new(profile, records);
    let targets = board_targets(rng, &history);
    LabelledHistory { history, targets }
  }
}

impl SyntheticSource for SyntheticGenerator {
  fn generate(&self, count: usize) -> Vec<LabelledHistory> {
    let mut rng = StdRng::seed_from_u64(self.seed);
    let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
    (0..count)
      .map(|_| self.student(&mut rng, today))
      .filter(|s| !s.targets.is_empty())
      .collect()
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn random_uuid(rng: &mut StdRng) -> Uuid { uuid::Builder::from_random_bytes(rng.random()).into_uuid() }

/// Box–Muller draw from `N(mean, std²)`.
fn normal(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
  let u1 = 1.0 - rng.random::<f64>();
  let u2 = rng.random::<f64>();
  mean + std * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn round1(v: f64) -> f64 { (v * 10.0).round() / 10.0 }

/// Academic years start in April: `"2024-2025"` for any date from
/// April 2024 to March 2025.
fn academic_year_of(date: NaiveDate) -> String {
  let start = if date.month() >= 4 { date.year() } else { date.year() - 1 };
  format!("{start}-{}", start + 1)
}

fn subject_abilities(rng: &mut StdRng) -> BTreeMap<&'static str, f64> {
  let base = normal(rng, 75.0, 15.0).clamp(30.0, 95.0);
  let mut abilities: BTreeMap<&'static str, f64> = curriculum::SUBJECTS
    .iter()
    .chain(&SECONDARY_SUBJECTS)
    .map(|&subject| {
      let ability = (base + normal(rng, 0.0, 8.0)) * difficulty(subject);
      (subject, ability.clamp(20.0, 98.0))
    })
    .collect();

  for (leader, follower, correlation) in SUBJECT_CORRELATIONS {
    let (Some(&a), Some(&b)) = (abilities.get(leader), abilities.get(follower)) else {
      continue;
    };
    let mean = (a + b) / 2.0;
    let pulled = mean + (a - mean) * correlation;
    abilities.insert(follower, pulled.clamp(20.0, 98.0));
  }
  abilities
}

fn class_subjects(class: u8, stream: &[&'static str]) -> Vec<&'static str> {
  let mut subjects = BASE_SUBJECTS.to_vec();
  if class <= 10 {
    subjects.extend(SECONDARY_SUBJECTS);
  } else {
    subjects.extend(stream);
  }
  subjects
}

fn year_records(
  rng: &mut StdRng,
  profile: &StudentProfile,
  abilities: &BTreeMap<&'static str, f64>,
  stream: &[&'static str],
  class: u8,
  start: NaiveDate,
) -> Vec<AcademicRecord> {
  let mut calendar = EXAM_CALENDAR.to_vec();
  if curriculum::BOARD_CLASSES.contains(&class) {
    calendar.push((BOARD_EXAM_DAY, ExamType::Board, Term::SecondTerm));
  }

  let subjects = class_subjects(class, stream);
  let mut out = Vec::with_capacity(calendar.len() * subjects.len());
  for (day, exam_type, term) in calendar {
    let exam_date = start + Duration::days(day);
    for subject in &subjects {
      let Some(&ability) = abilities.get(subject) else {
        continue;
      };
      let score = exam_score(rng, ability, exam_type, class, term);
      out.push(AcademicRecord {
        record_id: random_uuid(rng),
        student_id: profile.student_id,
        subject: (*subject).to_owned(),
        score,
        max_score: 100.0,
        exam_type,
        exam_date,
        academic_year: academic_year_of(exam_date),
        term,
      });
    }
  }
  out
}

fn exam_score(rng: &mut StdRng, ability: f64, exam_type: ExamType, class: u8, term: Term) -> f64 {
  let mut score = ability * exam_multiplier(exam_type) * class_multiplier(class);
  if term == Term::SecondTerm {
    score *= 0.98;
  }
  score += normal(rng, 0.0, 5.0);
  round1(score.clamp(15.0, 98.0))
}

/// Board target per curriculum subject with at least two results: a
/// recency-weighted average (weights rising linearly from 0.5 to 1.0),
/// discounted by 5% and jittered.
fn board_targets(rng: &mut StdRng, history: &StudentHistory) -> BTreeMap<String, f64> {
  let mut by_subject: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
  for r in &history.records {
    by_subject.entry(r.subject.as_str()).or_default().push(r.percentage());
  }

  let mut targets = BTreeMap::new();
  for (subject, scores) in by_subject {
    if scores.len() < 2 || !curriculum::is_curriculum_subject(subject) {
      continue;
    }
    let last = (scores.len() - 1) as f64;
    let (mut sum, mut total) = (0.0, 0.0);
    for (i, s) in scores.iter().enumerate() {
      let w = 0.5 + 0.5 * i as f64 / last;
      sum += w * s;
      total += w;
    }
    let target = (sum / total) * 0.95 + normal(rng, 0.0, 3.0);
    targets.insert(subject.to_owned(), round1(target.clamp(25.0, 95.0)));
  }
  targets
}

#[cfg(test)]
mod tests {
  use super::*;

  fn generator() -> SyntheticGenerator {
    SyntheticGenerator::new(7, 3).with_today(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
  }

  #[test]
  fn same_seed_same_students() {
    let a = generator().generate(20);
    let b = generator().generate(20);
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(&b) {
      assert_eq!(x.history.profile, y.history.profile);
      assert_eq!(x.history.records, y.history.records);
      assert_eq!(x.targets, y.targets);
    }

    let other = SyntheticGenerator::new(8, 3)
      .with_today(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
      .generate(20);
    assert_ne!(a[0].history.profile.student_id, other[0].history.profile.student_id);
  }

  #[test]
  fn records_are_well_formed() {
    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    for s in generator().generate(50) {
      let p = &s.history.profile;
      assert!(curriculum::CLASSES.contains(&p.current_class));
      assert_eq!(p.academic_year, "2025-2026");
      assert!(p.school_code.as_deref().is_some_and(|c| c.len() == 6));
      assert!(!s.history.records.is_empty());
      for r in &s.history.records {
        assert_eq!(r.student_id, p.student_id);
        assert!((15.0..=98.0).contains(&r.score), "score {}", r.score);
        assert!(r.exam_date < today);
      }
      assert!(s.history.records.windows(2).all(|w| w[0].exam_date <= w[1].exam_date));
    }
  }

  #[test]
  fn targets_cover_curriculum_subjects_only() {
    for s in generator().generate(50) {
      assert!(!s.targets.is_empty());
      for (subject, target) in &s.targets {
        assert!(curriculum::is_curriculum_subject(subject), "{subject}");
        assert!((25.0..=95.0).contains(target));
        assert!(s.history.records_for(subject).count() >= 2);
      }
    }
  }

  #[test]
  fn board_exams_only_in_board_classes() {
    for s in generator().generate(30) {
      let current = s.history.profile.current_class;
      let has_board = s.history.records.iter().any(|r| r.exam_type == ExamType::Board);
      // Three years always pass through class 10 or 12 unless the student is
      // in class 9 (every year maps to class 9).
      assert_eq!(has_board, current >= 10, "class {current}");
    }
  }

  #[test]
  fn academic_year_turns_over_in_april() {
    assert_eq!(academic_year_of(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()), "2024-2025");
    assert_eq!(academic_year_of(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()), "2025-2026");
  }

  #[test]
  fn normal_draws_centre_on_the_mean() {
    let mut rng = StdRng::seed_from_u64(1);
    let n = 20_000;
    let mean = (0..n).map(|_| normal(&mut rng, 10.0, 2.0)).sum::<f64>() / f64::from(n);
    assert!((mean - 10.0).abs() < 0.1, "mean {mean}");
  }
}
