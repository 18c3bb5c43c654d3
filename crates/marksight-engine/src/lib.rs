//! Orchestration layer for Marksight: the training pipeline, the retraining
//! policy, the prediction service and the background training scheduler.
//!
//! The engine is generic over [`marksight_core::store::ScoreStore`]; it never
//! touches a database directly. Model fitting is delegated to
//! [`marksight_ml`] and always runs on tokio's blocking pool.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod clock;
pub mod config;
pub mod error;
pub mod insights;
pub mod pipeline;
pub mod prediction;
pub mod retrain;
pub mod scheduler;
pub mod synthetic;

pub use clock::{Clock, SystemClock};
pub use config::Settings;
pub use error::{Error, Result};
pub use pipeline::{TrainingOutcome, TrainingPipeline, Trigger};
pub use prediction::PredictionService;
pub use scheduler::{TrainingJob, TrainingScheduler, TriggerResult};
pub use synthetic::{SyntheticGenerator, SyntheticSource};

#[cfg(test)]
mod tests;
