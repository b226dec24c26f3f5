//! Error taxonomy for weaksup runs.

use std::time::Duration;

use thiserror::Error;

use crate::{data::Split, pipeline::Stage};

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a run can surface. None of these are retried.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start_at` or `end_at` was not provided.
    #[error("at least one of 'start_at' or 'end_at' is not defined")]
    MissingStageRange,

    #[error("invalid value for 'supervision': {0}")]
    UnknownSupervision(String),

    #[error("unknown project '{0}' (expected one of: babble, qalf)")]
    UnknownProject(String),

    /// No local config file for the requested domain.
    #[error("the config for the {domain} domain was not found at {path}")]
    LocalConfigNotFound { domain: String, path: String },

    /// A hard precondition on the run's data did not hold.
    #[error("precondition failed in {context}: {message}")]
    Precondition { context: String, message: String },

    /// The store holds nothing of this kind for the split.
    #[error("no {kind} stored for split {split}")]
    NoSuchData { kind: &'static str, split: Split },

    /// Capability or combination with no implementation.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Failure inside a trainable model.
    #[error("model error: {0}")]
    Model(String),

    /// A stage aborted the run.
    #[error("stage [{}] {stage} failed after {elapsed:.2?}: {source}", stage.rank())]
    Stage {
        stage: Stage,
        elapsed: Duration,
        #[source]
        source: Box<Error>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parquet store error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    /// Shorthand for a precondition failure naming its context.
    pub fn precondition(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Precondition {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Stage-wrapped errors expose the underlying condition here.
    pub fn root(&self) -> &Error {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}
