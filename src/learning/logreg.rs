//! Logistic-regression discriminative model trained on aggregated labels.

use linfa::{
    dataset::DatasetBase,
    prelude::{Fit, Predict},
};
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::{s, Array1, Array2};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    data::{FeatureMatrix, Marginals},
    error::{Error, Result},
    learning::{param_f64, param_usize, Params, TrainableModel},
};

/// Sparse-feature logistic regression over soft or hard training labels.
///
/// Recognised params: `l2_penalty`, `n_epochs` (iteration cap) and `rebalance`,
/// the target positive fraction reached by subsampling negatives (0 disables it).
///
/// Known limitations:
/// - marginals are binarised at 0.5 before fitting, so soft labels from the
///   soft-majority and generative aggregators only contribute their side of 0.5;
/// - the feature matrix is densified for `linfa`, so memory grows with
///   rows x features.
///
/// When every training label falls on one side of 0.5 the model degenerates to
/// a constant predictor at the mean training marginal.
pub struct LogisticClassifier {
    seed: u64,
    fitted: Option<Fitted>,
    params: Params,
}

enum Fitted {
    Logistic {
        model: FittedLogisticRegression<f64, bool>,
        /// Whether `predict_probabilities` reports P(true) rather than P(false).
        reports_true: bool,
    },
    Constant(f64),
}

impl std::fmt::Debug for LogisticClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fitted = match &self.fitted {
            None => "none".to_string(),
            Some(Fitted::Logistic { .. }) => "logistic".to_string(),
            Some(Fitted::Constant(p)) => format!("constant({p})"),
        };
        f.debug_struct("LogisticClassifier")
            .field("seed", &self.seed)
            .field("fitted", &fitted)
            .field("params", &self.params)
            .finish()
    }
}

impl TrainableModel for LogisticClassifier {
    type Input = FeatureMatrix;

    fn new(init: &Params) -> Result<Self> {
        Ok(Self {
            seed: param_usize(init, "seed", 123) as u64,
            fitted: None,
            params: Params::new(),
        })
    }

    fn train(&mut self, x: &FeatureMatrix, y: Option<&Marginals>, params: &Params) -> Result<()> {
        let y = y.ok_or_else(|| {
            Error::precondition("logreg training", "training labels are required")
        })?;
        if x.n_rows() != y.len() {
            return Err(Error::precondition(
                "logreg training",
                format!("{} feature rows but {} labels", x.n_rows(), y.len()),
            ));
        }
        self.params = params.clone();
        let targets: Vec<bool> = y.iter().map(|&p| p >= 0.5).collect();
        let positives = targets.iter().filter(|&&t| t).count();
        if positives == 0 || positives == targets.len() {
            let prior = y.mean().unwrap_or(0.5);
            warn!(
                rows = targets.len(),
                positives,
                prior,
                "training labels hold a single class; using a constant model"
            );
            self.fitted = Some(Fitted::Constant(prior));
            return Ok(());
        }
        let rows = rebalance(&targets, param_f64(params, "rebalance", 0.0), self.seed);

        let dense = x.to_dense();
        let x_train = dense.select(ndarray::Axis(0), &rows);
        let y_train: Array1<bool> = rows.iter().map(|&i| targets[i]).collect();
        debug!(
            rows = rows.len(),
            features = x.n_features(),
            positives = y_train.iter().filter(|&&t| t).count(),
            "fitting logistic regression"
        );

        let dataset = DatasetBase::new(x_train.clone(), y_train);
        let model = LogisticRegression::default()
            .alpha(param_f64(params, "l2_penalty", 0.0))
            .max_iterations(param_usize(params, "n_epochs", 100).max(1) as u64)
            .fit(&dataset)
            .map_err(|e| Error::Model(e.to_string()))?;

        let reports_true = orientation(&model, &x_train);
        self.fitted = Some(Fitted::Logistic {
            model,
            reports_true,
        });
        Ok(())
    }

    fn marginals(&self, x: &FeatureMatrix, batch_size: Option<usize>) -> Result<Marginals> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| Error::precondition("logreg marginals", "model is not trained"))?;
        let (model, reports_true) = match fitted {
            Fitted::Constant(p) => return Ok(Array1::from_elem(x.n_rows(), *p)),
            Fitted::Logistic {
                model,
                reports_true,
            } => (model, *reports_true),
        };
        let dense = x.to_dense();
        let batch = batch_size.filter(|&b| b > 0).unwrap_or(dense.nrows().max(1));
        let mut out = Vec::with_capacity(dense.nrows());
        let mut start = 0;
        while start < dense.nrows() {
            let end = (start + batch).min(dense.nrows());
            let probs = model.predict_probabilities(&dense.slice(s![start..end, ..]));
            out.extend(probs.iter().map(|&p| if reports_true { p } else { 1.0 - p }));
            start = end;
        }
        Ok(Array1::from(out))
    }

    fn checkpoint(&self) -> Option<Value> {
        match self.fitted.as_ref()? {
            Fitted::Logistic {
                model,
                reports_true,
            } => Some(json!({
                "params": model.params().to_vec(),
                "intercept": model.intercept(),
                "reports_true": reports_true,
            })),
            Fitted::Constant(p) => Some(json!({ "constant": p })),
        }
    }
}

/// Row indices kept so positives make up `target` of the training set.
fn rebalance(targets: &[bool], target: f64, seed: u64) -> Vec<usize> {
    let all: Vec<usize> = (0..targets.len()).collect();
    if !(target > 0.0 && target < 1.0) {
        return all;
    }
    let (positives, mut negatives): (Vec<usize>, Vec<usize>) =
        all.into_iter().partition(|&i| targets[i]);
    // keep at least one negative so both classes reach the solver
    let wanted = (((positives.len() as f64) * (1.0 - target) / target).round() as usize).max(1);
    if wanted >= negatives.len() {
        warn!(
            positives = positives.len(),
            negatives = negatives.len(),
            target,
            "not enough negatives to rebalance; using all rows"
        );
        return (0..targets.len()).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    negatives.shuffle(&mut rng);
    negatives.truncate(wanted);
    let mut rows: Vec<usize> = positives.into_iter().chain(negatives).collect();
    rows.sort_unstable();
    rows
}

/// The fitted model predicts `true` exactly where its probability is >= 0.5,
/// which tells us which class the probabilities refer to.
fn orientation(fitted: &FittedLogisticRegression<f64, bool>, x: &Array2<f64>) -> bool {
    if x.nrows() == 0 {
        return true;
    }
    let first = x.slice(s![0..1, ..]).to_owned();
    let predicted: Array1<bool> = fitted.predict(&first);
    let prob = fitted.predict_probabilities(&first)[0];
    predicted[0] == (prob >= 0.5)
}
