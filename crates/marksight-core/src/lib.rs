//! Core types and trait definitions for the Marksight prediction engine.
//!
//! This crate is deliberately free of model, HTTP and database dependencies.
//! Every other crate depends on it; it depends on nothing proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod curriculum;
pub mod error;
pub mod grade;
pub mod performance;
pub mod prediction;
pub mod store;
pub mod student;

pub use error::{Error, Result};
