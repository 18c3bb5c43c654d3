//! Random forest: bootstrap-bagged CART trees with a random feature subset
//! per split.

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::tree::{self, RegressionTree, TreeParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
  pub n_trees:               usize,
  pub max_depth:             usize,
  pub min_samples_split:     usize,
  pub min_samples_leaf:      usize,
  /// Share of the features considered at each split.
  pub max_features_fraction: f64,
  pub seed:                  u64,
}

impl Default for ForestParams {
  fn default() -> Self {
    Self {
      n_trees:               100,
      max_depth:             10,
      min_samples_split:     5,
      min_samples_leaf:      2,
      max_features_fraction: 1.0 / 3.0,
      seed:                  42,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
  trees: Vec<RegressionTree>,
}

impl RandomForest {
  /// Fit on every row of `x`. Returns the forest and its normalised impurity
  /// importances.
  pub fn fit(
    x: ArrayView2<'_, f64>,
    y: &[f64],
    params: &ForestParams,
  ) -> (Self, Vec<f64>) {
    let (n, n_features) = x.dim();
    let max_features =
      ((n_features as f64 * params.max_features_fraction).round() as usize)
        .clamp(1, n_features.max(1));
    let tree_params = TreeParams {
      max_depth:         params.max_depth,
      min_samples_split: params.min_samples_split,
      min_samples_leaf:  params.min_samples_leaf,
      max_features:      Some(max_features),
    };

    let mut importance = vec![0.0; n_features];
    let trees = (0..params.n_trees.max(1))
      .map(|t| {
        let mut rng = tree::member_rng(params.seed, t);
        let rows = tree::bootstrap(&mut rng, n);
        RegressionTree::fit(x, y, rows, &tree_params, &mut rng, &mut importance)
      })
      .collect();
    tree::normalise(&mut importance);
    (Self { trees }, importance)
  }

  /// Each tree's prediction for one row.
  pub fn tree_predictions(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
    self.trees.iter().map(|t| t.predict(row)).collect()
  }

  pub fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
    crate::stats::mean(&self.tree_predictions(row))
  }

  pub fn n_trees(&self) -> usize { self.trees.len() }
}
