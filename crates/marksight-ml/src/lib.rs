//! Model layer for Marksight: feature engineering, per-subject regressors,
//! the blended ensemble and the on-disk artifact format.
//!
//! Everything in this crate is synchronous and CPU-bound. Callers running on
//! an async runtime should drive training through `spawn_blocking`.

pub mod artifact;
pub mod boosting;
pub mod ensemble;
pub mod error;
pub mod family;
pub mod features;
pub mod forest;
pub mod metrics;
pub mod regressor;
pub mod ridge;
pub mod stats;
pub mod tree;
pub mod tuning;

pub use artifact::ModelGeneration;
pub use ensemble::{EnsembleConfig, ModelEnsemble};
pub use error::{Error, FeatureError, Result};
pub use family::{Hyperparameters, ModelFamily};
pub use features::{FeatureEngineer, FeatureLayout, FeatureVector};
pub use regressor::SubjectRegressor;
