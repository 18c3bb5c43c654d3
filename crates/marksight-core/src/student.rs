//! Student profiles and academic records, the inputs the engine reads.
//!
//! Both are owned by the host application; from the engine's point of view
//! they are immutable snapshots.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, curriculum};

// ─── Enumerations ────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExamType {
  UnitTest,
  MidTerm,
  Final,
  Board,
  PreBoard,
  PracticeTest,
}

impl ExamType {
  pub const ALL: [ExamType; 6] = [
    Self::UnitTest,
    Self::MidTerm,
    Self::Final,
    Self::Board,
    Self::PreBoard,
    Self::PracticeTest,
  ];

  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownExamType(s.to_owned()))
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Term {
  FirstTerm,
  SecondTerm,
}

impl Term {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownTerm(s.to_owned()))
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Gender {
  Male,
  Female,
  #[default]
  Other,
}

impl Gender {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownGender(s.to_owned()))
  }

  /// Label-encoded value; categories are numbered alphabetically.
  pub fn encoded(self) -> u8 {
    match self {
      Self::Female => 0,
      Self::Male => 1,
      Self::Other => 2,
    }
  }
}

// ─── Profile ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
  pub student_id:    Uuid,
  /// 9 through 12.
  pub current_class: u8,
  pub gender:        Gender,
  /// School affiliation code; the leading digit encodes the school type.
  pub school_code:   Option<String>,
  /// e.g. `"2024-25"`.
  pub academic_year: String,
}

impl StudentProfile {
  /// The calendar year the academic year starts in.
  pub fn academic_year_start(&self) -> Result<i32> {
    parse_academic_year_start(&self.academic_year)
  }
}

/// Parse the starting year out of `"2024-25"`, `"2024-2025"` or `"2024"`.
pub fn parse_academic_year_start(s: &str) -> Result<i32> {
  s.split('-')
    .next()
    .map(str::trim)
    .filter(|y| y.len() == 4)
    .and_then(|y| y.parse().ok())
    .ok_or_else(|| Error::InvalidAcademicYear(s.to_owned()))
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// One exam result for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicRecord {
  pub record_id:     Uuid,
  pub student_id:    Uuid,
  pub subject:       String,
  pub score:         f64,
  pub max_score:     f64,
  pub exam_type:     ExamType,
  pub exam_date:     NaiveDate,
  pub academic_year: String,
  pub term:          Term,
}

impl AcademicRecord {
  /// `score / max_score × 100`; zero when `max_score` is not positive.
  pub fn percentage(&self) -> f64 {
    if self.max_score > 0.0 {
      self.score / self.max_score * 100.0
    } else {
      0.0
    }
  }
}

/// Input to `SqliteStore::add_record`. The id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewAcademicRecord {
  pub student_id:    Uuid,
  pub subject:       String,
  pub score:         f64,
  pub max_score:     f64,
  pub exam_type:     ExamType,
  pub exam_date:     NaiveDate,
  pub academic_year: String,
  pub term:          Term,
}

/// Input to `SqliteStore::add_student`.
#[derive(Debug, Clone)]
pub struct NewStudent {
  pub current_class: u8,
  pub gender:        Gender,
  pub school_code:   Option<String>,
  pub academic_year: String,
}

// ─── Histories ───────────────────────────────────────────────────────────────

/// A profile together with every record the student owns, ordered by exam
/// date (ties keep their original order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentHistory {
  pub profile: StudentProfile,
  pub records: Vec<AcademicRecord>,
}

impl StudentHistory {
  pub fn new(profile: StudentProfile, mut records: Vec<AcademicRecord>) -> Self {
    records.sort_by_key(|r| r.exam_date);
    Self { profile, records }
  }

  /// Board-exam percentage per curriculum subject. When a subject has several
  /// board records the most recent one wins.
  pub fn board_targets(&self) -> BTreeMap<String, f64> {
    self
      .records
      .iter()
      .filter(|r| r.exam_type == ExamType::Board)
      .filter(|r| curriculum::is_curriculum_subject(&r.subject))
      .map(|r| (r.subject.clone(), r.percentage()))
      .collect()
  }

  /// Records for one subject, oldest first.
  pub fn records_for<'a>(
    &'a self,
    subject: &'a str,
  ) -> impl Iterator<Item = &'a AcademicRecord> + 'a {
    self.records.iter().filter(move |r| r.subject == subject)
  }
}

/// A history paired with its regression labels (board-exam percentages).
#[derive(Debug, Clone)]
pub struct LabelledHistory {
  pub history: StudentHistory,
  pub targets: BTreeMap<String, f64>,
}

impl LabelledHistory {
  /// Label a real history from its own board records. Returns `None` for
  /// students who have not sat any board exam yet.
  pub fn from_board_records(history: StudentHistory) -> Option<Self> {
    let targets = history.board_targets();
    (!targets.is_empty()).then_some(Self { history, targets })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(subject: &str, score: f64, exam_type: ExamType, day: u32) -> AcademicRecord {
    AcademicRecord {
      record_id: Uuid::new_v4(),
      student_id: Uuid::nil(),
      subject: subject.into(),
      score,
      max_score: 80.0,
      exam_type,
      exam_date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
      academic_year: "2023-24".into(),
      term: Term::SecondTerm,
    }
  }

  fn profile() -> StudentProfile {
    StudentProfile {
      student_id:    Uuid::nil(),
      current_class: 10,
      gender:        Gender::Female,
      school_code:   Some("20451".into()),
      academic_year: "2023-24".into(),
    }
  }

  #[test]
  fn percentage_uses_max_score() {
    let r = record("Mathematics", 60.0, ExamType::Final, 1);
    assert!((r.percentage() - 75.0).abs() < 1e-9);
  }

  #[test]
  fn percentage_of_zero_max_is_zero() {
    let mut r = record("Mathematics", 60.0, ExamType::Final, 1);
    r.max_score = 0.0;
    assert_eq!(r.percentage(), 0.0);
  }

  #[test]
  fn history_sorts_records_by_date() {
    let h = StudentHistory::new(profile(), vec![
      record("English", 40.0, ExamType::Final, 20),
      record("English", 50.0, ExamType::UnitTest, 2),
    ]);
    assert_eq!(h.records[0].exam_date.format("%d").to_string(), "02");
  }

  #[test]
  fn board_targets_keep_latest_board_record() {
    let h = StudentHistory::new(profile(), vec![
      record("Mathematics", 40.0, ExamType::Board, 1),
      record("Mathematics", 72.0, ExamType::Board, 28),
      record("English", 70.0, ExamType::MidTerm, 5),
      record("Sanskrit", 70.0, ExamType::Board, 5),
    ]);
    let targets = h.board_targets();
    assert_eq!(targets.len(), 1);
    assert!((targets["Mathematics"] - 90.0).abs() < 1e-9);
  }

  #[test]
  fn unlabelled_history_is_rejected() {
    let h = StudentHistory::new(profile(), vec![record(
      "English",
      70.0,
      ExamType::MidTerm,
      5,
    )]);
    assert!(LabelledHistory::from_board_records(h).is_none());
  }

  #[test]
  fn enum_string_forms() {
    assert_eq!(ExamType::PreBoard.to_string(), "pre_board");
    assert_eq!(ExamType::parse("practice_test").unwrap(), ExamType::PracticeTest);
    assert!(matches!(ExamType::parse("quiz"), Err(Error::UnknownExamType(_))));
    assert_eq!(Term::parse("first_term").unwrap(), Term::FirstTerm);
    assert_eq!(Gender::parse("female").unwrap(), Gender::Female);
  }

  #[test]
  fn academic_year_start_accepts_common_forms() {
    assert_eq!(parse_academic_year_start("2024-25").unwrap(), 2024);
    assert_eq!(parse_academic_year_start("2023-2024").unwrap(), 2023);
    assert_eq!(parse_academic_year_start("2022").unwrap(), 2022);
    assert!(parse_academic_year_start("next year").is_err());
  }
}
