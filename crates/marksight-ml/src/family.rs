//! The closed set of model families and their hyperparameters.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
  Error, Result, boosting::BoostingParams, forest::ForestParams,
  ridge::RidgeParams,
};

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
pub enum ModelFamily {
  RandomForest,
  GradientBoosting,
  Ridge,
}

impl ModelFamily {
  pub const ALL: [ModelFamily; 3] =
    [Self::RandomForest, Self::GradientBoosting, Self::Ridge];

  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownFamily(s.to_owned()))
  }

  /// Whether predictions come with a per-member spread that can back a
  /// confidence estimate.
  pub fn is_tree_ensemble(self) -> bool { matches!(self, Self::RandomForest) }
}

/// Hyperparameters for one family, tagged with the family name when
/// serialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Hyperparameters {
  RandomForest(ForestParams),
  GradientBoosting(BoostingParams),
  Ridge(RidgeParams),
}

impl Hyperparameters {
  pub fn family(&self) -> ModelFamily {
    match self {
      Self::RandomForest(_) => ModelFamily::RandomForest,
      Self::GradientBoosting(_) => ModelFamily::GradientBoosting,
      Self::Ridge(_) => ModelFamily::Ridge,
    }
  }

  pub fn to_json(&self) -> serde_json::Value {
    serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn family_string_forms() {
    assert_eq!(ModelFamily::GradientBoosting.to_string(), "gradient_boosting");
    assert_eq!(ModelFamily::parse("ridge").unwrap(), ModelFamily::Ridge);
    assert!(matches!(
      ModelFamily::parse("svm"),
      Err(Error::UnknownFamily(s)) if s == "svm"
    ));
  }

  #[test]
  fn hyperparameters_are_tagged_with_their_family() {
    let hp = Hyperparameters::Ridge(RidgeParams { alpha: 10.0 });
    let json = hp.to_json();
    assert_eq!(json["family"], "ridge");
    assert_eq!(json["alpha"], 10.0);

    let back: Hyperparameters = serde_json::from_value(json).unwrap();
    assert_eq!(back.family(), ModelFamily::Ridge);
  }

  #[test]
  fn missing_fields_take_defaults() {
    let hp: Hyperparameters =
      serde_json::from_str(r#"{"family":"random_forest","n_trees":7}"#).unwrap();
    let Hyperparameters::RandomForest(p) = hp else { panic!("wrong family") };
    assert_eq!(p.n_trees, 7);
    assert_eq!(p.max_depth, ForestParams::default().max_depth);
  }
}
