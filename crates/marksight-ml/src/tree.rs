//! CART regression trees, the building block of the forest and boosting
//! families.
//!
//! Nodes live in a flat vector and refer to their children by index, so a
//! serialised tree is a list rather than a deeply nested document.

use ndarray::{ArrayView1, ArrayView2};
use rand::{Rng, rngs::StdRng, seq::index};
use serde::{Deserialize, Serialize};

/// Minimum impurity decrease for a split to be kept.
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
  pub max_depth:         usize,
  pub min_samples_split: usize,
  pub min_samples_leaf:  usize,
  /// Number of candidate features drawn per split; `None` considers all.
  pub max_features:      Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
  Leaf {
    value: f64,
  },
  Split {
    feature:   usize,
    threshold: f64,
    left:      usize,
    right:     usize,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
  nodes: Vec<Node>,
}

struct Candidate {
  feature:   usize,
  threshold: f64,
  gain:      f64,
}

struct Builder<'x, 'a> {
  x:          ArrayView2<'x, f64>,
  y:          &'a [f64],
  params:     &'a TreeParams,
  rng:        &'a mut StdRng,
  importance: &'a mut [f64],
  nodes:      Vec<Node>,
}

impl RegressionTree {
  /// Grow a tree over `rows` of `x` (duplicates allowed, as in a bootstrap
  /// sample). Impurity decreases are added to `importance`, indexed by
  /// feature.
  pub fn fit(
    x: ArrayView2<'_, f64>,
    y: &[f64],
    rows: Vec<usize>,
    params: &TreeParams,
    rng: &mut StdRng,
    importance: &mut [f64],
  ) -> Self {
    let mut builder = Builder { x, y, params, rng, importance, nodes: Vec::new() };
    builder.grow(rows, 0);
    Self { nodes: builder.nodes }
  }

  pub fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
    let mut at = 0;
    loop {
      match self.nodes.get(at) {
        Some(Node::Leaf { value }) => return *value,
        Some(Node::Split { feature, threshold, left, right }) => {
          at = if row[*feature] <= *threshold { *left } else { *right };
        }
        None => return 0.0,
      }
    }
  }

  pub fn node_count(&self) -> usize { self.nodes.len() }

  /// Length of the longest root-to-leaf path.
  pub fn depth(&self) -> usize { self.depth_from(0) }

  fn depth_from(&self, at: usize) -> usize {
    match self.nodes.get(at) {
      Some(Node::Split { left, right, .. }) => {
        1 + self.depth_from(*left).max(self.depth_from(*right))
      }
      _ => 0,
    }
  }
}

impl Builder<'_, '_> {
  /// Append the subtree for `rows` and return the index of its root.
  fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
    let at = self.nodes.len();
    let value = rows.iter().map(|&r| self.y[r]).sum::<f64>() / rows.len().max(1) as f64;
    self.nodes.push(Node::Leaf { value });

    if depth >= self.params.max_depth
      || rows.len() < self.params.min_samples_split.max(2)
      || rows.len() < 2 * self.params.min_samples_leaf.max(1)
    {
      return at;
    }
    let Some(best) = self.best_split(&rows) else {
      return at;
    };

    self.importance[best.feature] += best.gain;
    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
      .into_iter()
      .partition(|&r| self.x[[r, best.feature]] <= best.threshold);
    let left = self.grow(left_rows, depth + 1);
    let right = self.grow(right_rows, depth + 1);
    self.nodes[at] = Node::Split {
      feature: best.feature,
      threshold: best.threshold,
      left,
      right,
    };
    at
  }

  /// Features in the order they are examined. With a feature budget the
  /// order is a random permutation; the search only runs past the budget
  /// while no valid split has been found.
  fn feature_order(&mut self) -> (Vec<usize>, usize) {
    let n = self.x.ncols();
    match self.params.max_features {
      Some(k) if k < n => (index::sample(&mut *self.rng, n, n).into_vec(), k.max(1)),
      _ => ((0..n).collect(), n),
    }
  }

  fn best_split(&mut self, rows: &[usize]) -> Option<Candidate> {
    let n = rows.len();
    let min_leaf = self.params.min_samples_leaf.max(1);
    let (sum, sum_sq) = rows.iter().fold((0.0, 0.0), |(s, q), &r| {
      let v = self.y[r];
      (s + v, q + v * v)
    });
    let parent_sse = sum_sq - sum * sum / n as f64;

    let mut best: Option<Candidate> = None;
    let mut order = rows.to_vec();
    let (features, budget) = self.feature_order();
    for (examined, feature) in features.into_iter().enumerate() {
      if examined >= budget && best.is_some() {
        break;
      }
      let col = self.x.column(feature);
      order.sort_by(|&a, &b| col[a].total_cmp(&col[b]));

      let (mut ls, mut lq) = (0.0, 0.0);
      for i in 0..n - 1 {
        let v = self.y[order[i]];
        ls += v;
        lq += v * v;

        let left_n = i + 1;
        let right_n = n - left_n;
        if left_n < min_leaf {
          continue;
        }
        if right_n < min_leaf {
          break;
        }
        let (here, next) = (col[order[i]], col[order[i + 1]]);
        if here == next {
          continue;
        }

        let (rs, rq) = (sum - ls, sum_sq - lq);
        let sse = (lq - ls * ls / left_n as f64) + (rq - rs * rs / right_n as f64);
        let gain = parent_sse - sse;
        if gain > MIN_GAIN && best.as_ref().is_none_or(|b| gain > b.gain) {
          let mid = here + (next - here) / 2.0;
          // Rounding can land the midpoint on `next`; fall back to `here`.
          let threshold = if mid < next { mid } else { here };
          best = Some(Candidate { feature, threshold, gain });
        }
      }
    }
    best
  }
}

/// Normalise raw importances to sum to one; all zeros stay zeros.
pub fn normalise(importance: &mut [f64]) {
  let total: f64 = importance.iter().sum();
  if total > 0.0 && total.is_finite() {
    importance.iter_mut().for_each(|v| *v /= total);
  } else {
    importance.iter_mut().for_each(|v| *v = 0.0);
  }
}

/// A fresh generator for one member of an ensemble.
pub(crate) fn member_rng(seed: u64, member: usize) -> StdRng {
  use rand::SeedableRng;
  StdRng::seed_from_u64(seed.wrapping_add(member as u64))
}

/// `n` row indices drawn with replacement.
pub(crate) fn bootstrap(rng: &mut StdRng, n: usize) -> Vec<usize> {
  (0..n).map(|_| rng.random_range(0..n)).collect()
}
