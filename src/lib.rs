//! Weak-supervision training orchestrator.
//!
//! Resolves a layered run configuration, aggregates labeling-function votes
//! into training marginals, selects LF dependencies and trains a
//! discriminative classifier by grid search, stage by stage.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod learning;
pub mod logging;
pub mod pipeline;
pub mod supervision;

pub use error::{Error, Result};
