//! Trainable model capability, grid-search harness, scoring and the
//! discriminative classifier.

pub mod logreg;
pub mod score;
pub mod search;

use serde_json::Value;

use crate::{data::Marginals, error::Result};

pub use logreg::LogisticClassifier;
pub use score::{error_analysis, f_beta, score_marginals, ErrorAnalysis, Score};
pub use search::{train_model, ModelSearchSpec, ParamRanges, Params, SearchRequest, TrainedModel};

/// A model the grid-search harness can construct, fit and query.
pub trait TrainableModel: Sized {
    /// Matrix type the model reads.
    type Input;

    /// Construct an untrained model from its init params.
    fn new(init: &Params) -> Result<Self>;

    /// Fit on `x`. Discriminative models need `y`; label models ignore it.
    fn train(&mut self, x: &Self::Input, y: Option<&Marginals>, params: &Params) -> Result<()>;

    /// Probability of the positive class per row of `x`.
    fn marginals(&self, x: &Self::Input, batch_size: Option<usize>) -> Result<Marginals>;

    /// Serializable snapshot written next to each search checkpoint.
    fn checkpoint(&self) -> Option<Value> {
        None
    }
}

/// Read a numeric hyperparameter, falling back to `default` when absent or null.
pub fn param_f64(params: &Params, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

pub fn param_usize(params: &Params, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub fn param_bool(params: &Params, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}
