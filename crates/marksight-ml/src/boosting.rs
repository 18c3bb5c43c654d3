//! Gradient boosting with squared loss over shallow CART trees.

use ndarray::{ArrayView1, ArrayView2};
use rand::seq::index;
use serde::{Deserialize, Serialize};

use crate::{
  stats::mean,
  tree::{self, RegressionTree, TreeParams},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
  pub n_rounds:         usize,
  pub max_depth:        usize,
  pub learning_rate:    f64,
  /// Share of rows each round is fitted on, drawn without replacement.
  pub subsample:        f64,
  pub min_samples_leaf: usize,
  pub seed:             u64,
}

impl Default for BoostingParams {
  fn default() -> Self {
    Self {
      n_rounds:         100,
      max_depth:        6,
      learning_rate:    0.1,
      subsample:        0.8,
      min_samples_leaf: 2,
      seed:             42,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoosting {
  base:          f64,
  learning_rate: f64,
  trees:         Vec<RegressionTree>,
}

impl GradientBoosting {
  pub fn fit(
    x: ArrayView2<'_, f64>,
    y: &[f64],
    params: &BoostingParams,
  ) -> (Self, Vec<f64>) {
    let (n, n_features) = x.dim();
    let tree_params = TreeParams {
      max_depth:         params.max_depth,
      min_samples_split: 2 * params.min_samples_leaf.max(1),
      min_samples_leaf:  params.min_samples_leaf,
      max_features:      None,
    };
    let per_round = ((n as f64 * params.subsample.clamp(0.0, 1.0)).round() as usize)
      .clamp(n.min(1), n);

    let base = mean(y);
    let mut fitted = vec![base; n];
    let mut residuals = vec![0.0; n];
    let mut importance = vec![0.0; n_features];
    let mut trees = Vec::with_capacity(params.n_rounds);

    for round in 0..params.n_rounds {
      for i in 0..n {
        residuals[i] = y[i] - fitted[i];
      }
      let mut rng = tree::member_rng(params.seed, round);
      let rows = if per_round < n {
        index::sample(&mut rng, n, per_round).into_vec()
      } else {
        (0..n).collect()
      };
      let tree =
        RegressionTree::fit(x, &residuals, rows, &tree_params, &mut rng, &mut importance);
      for (i, row) in x.rows().into_iter().enumerate() {
        fitted[i] += params.learning_rate * tree.predict(row);
      }
      trees.push(tree);
    }
    tree::normalise(&mut importance);

    let model = Self { base, learning_rate: params.learning_rate, trees };
    (model, importance)
  }

  pub fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
    self.base
      + self
        .trees
        .iter()
        .map(|t| self.learning_rate * t.predict(row))
        .sum::<f64>()
  }
}
