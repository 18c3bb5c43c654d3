//! The CBSE eight-band grading scale.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// A CBSE grade band. Each band includes its lower edge.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
pub enum Grade {
  A1,
  A2,
  B1,
  B2,
  C1,
  C2,
  D,
  E,
}

impl Grade {
  /// Map a percentage to its band. Total over all inputs; anything below 33
  /// (including NaN) is an `E`.
  pub fn from_score(score: f64) -> Self {
    match score {
      s if s >= 91.0 => Self::A1,
      s if s >= 81.0 => Self::A2,
      s if s >= 71.0 => Self::B1,
      s if s >= 61.0 => Self::B2,
      s if s >= 51.0 => Self::C1,
      s if s >= 41.0 => Self::C2,
      s if s >= 33.0 => Self::D,
      _ => Self::E,
    }
  }
}
