//! The fixed CBSE curriculum the engine is trained against.
//!
//! Subject names are matched exactly (case-sensitive) against
//! [`AcademicRecord::subject`](crate::student::AcademicRecord::subject).

/// Every subject the engine knows how to model, in canonical order.
pub const SUBJECTS: [&str; 14] = [
  "Mathematics",
  "Physics",
  "Chemistry",
  "Biology",
  "English",
  "Hindi",
  "Computer Science",
  "Physical Education",
  "Economics",
  "Business Studies",
  "Accountancy",
  "Political Science",
  "History",
  "Geography",
];

/// Class levels the engine accepts.
pub const CLASSES: [u8; 4] = [9, 10, 11, 12];

/// Class levels that end in a board exam.
pub const BOARD_CLASSES: [u8; 2] = [10, 12];

// ─── Streams ─────────────────────────────────────────────────────────────────

pub const SCIENCE_STREAM: [&str; 4] =
  ["Physics", "Chemistry", "Biology", "Mathematics"];

pub const COMMERCE_STREAM: [&str; 3] =
  ["Business Studies", "Accountancy", "Economics"];

/// Core subjects; everything else a student takes counts as an elective.
pub const CORE_SUBJECTS: [&str; 3] = ["Mathematics", "English", "Hindi"];

pub const HUMANITIES: [&str; 4] =
  ["History", "Geography", "Economics", "Political Science"];

pub const LANGUAGES: [&str; 2] = ["English", "Hindi"];

/// Percentage a student should reach; the gap to it is reported with every
/// prediction.
pub const TARGET_PERCENTAGE: f64 = 75.0;

/// Whether `subject` is part of the modelled curriculum.
pub fn is_curriculum_subject(subject: &str) -> bool {
  SUBJECTS.contains(&subject)
}

/// Lower-case, underscore-separated form of a subject name, used as a feature
/// name prefix: `"Computer Science"` → `"computer_science"`.
pub fn subject_slug(subject: &str) -> String {
  subject
    .split_whitespace()
    .map(str::to_lowercase)
    .collect::<Vec<_>>()
    .join("_")
}
