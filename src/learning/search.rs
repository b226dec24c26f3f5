//! Hyperparameter search shared by label-model and classifier training.
//!
//! With a search size of one (or no dev data) the model is trained once at its
//! defaults. Otherwise `N` combinations are drawn from the configured ranges,
//! each parameter independently, and the candidate with the best dev F-score
//! wins.

use std::path::Path;

use indexmap::IndexMap;
use rand::{rngs::StdRng, seq::SliceRandom};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::{
    data::GoldLabels,
    error::Result,
    learning::{score::error_analysis, score_marginals, f_beta, Score, TrainableModel},
};

/// Hyperparameter name to value.
pub type Params = IndexMap<String, Value>;

/// Hyperparameter name to the values a search may draw from.
pub type ParamRanges = IndexMap<String, Vec<Value>>;

/// Defaults, optional ranges and the number of combinations to try.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSearchSpec {
    pub defaults: Params,
    pub ranges: ParamRanges,
    pub search_size: usize,
}

impl ModelSearchSpec {
    /// Draw `search_size` combinations, each overlaying sampled values on the defaults.
    pub fn sample(&self, rng: &mut StdRng) -> Vec<Params> {
        (0..self.search_size)
            .map(|_| {
                let mut params = self.defaults.clone();
                for (name, choices) in &self.ranges {
                    if let Some(value) = choices.choose(rng) {
                        params.insert(name.clone(), value.clone());
                    }
                }
                params
            })
            .collect()
    }
}

/// Thresholds tried when tuning the decision threshold; ties keep the earliest.
const THRESHOLD_GRID: [f64; 17] = [
    0.5, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.55, 0.6, 0.65, 0.7, 0.75, 0.8, 0.85, 0.9,
];

/// Everything one training call needs.
pub struct SearchRequest<'a, M: TrainableModel> {
    pub train_x: &'a M::Input,
    pub train_y: Option<&'a ndarray::Array1<f64>>,
    pub dev: Option<(&'a M::Input, &'a GoldLabels)>,
    pub spec: &'a ModelSearchSpec,
    pub init_params: &'a Params,
    pub rng: &'a mut StdRng,
    /// Forwarded to the model as `n_threads` unless its init params set one.
    pub parallelism: Option<usize>,
    /// F-beta used for selection; F1 when `None`.
    pub beta: Option<f64>,
    pub tune_b: bool,
    pub eval_batch_size: Option<usize>,
    pub model_name: &'a str,
    pub save_dir: Option<&'a Path>,
}

/// Winner of a training call.
#[derive(Debug)]
pub struct TrainedModel<M> {
    pub model: M,
    pub params: Params,
    pub threshold: f64,
    /// Dev score of the winner at `threshold`, when dev data was supplied.
    pub dev_score: Option<Score>,
}

#[derive(Serialize)]
struct Checkpoint<'a> {
    model_name: &'a str,
    index: usize,
    params: &'a Params,
    threshold: f64,
    score: Option<Score>,
    model: Option<Value>,
}

/// Train `M` at its defaults or by random search over `spec.ranges`.
#[instrument(skip_all, fields(model = req.model_name, search_size = req.spec.search_size))]
pub fn train_model<M: TrainableModel>(req: SearchRequest<'_, M>) -> Result<TrainedModel<M>> {
    let mut init = req.init_params.clone();
    if let Some(threads) = req.parallelism {
        init.entry("n_threads".to_string()).or_insert(Value::from(threads));
    }
    let beta = req.beta.unwrap_or(1.0);

    let candidates = match req.dev {
        Some(_) if req.spec.search_size > 1 => req.spec.sample(req.rng),
        _ => vec![req.spec.defaults.clone()],
    };
    info!(candidates = candidates.len(), "training");

    let mut best: Option<(TrainedModel<M>, f64)> = None;
    for (index, params) in candidates.into_iter().enumerate() {
        let mut model = M::new(&init)?;
        model.train(req.train_x, req.train_y, &params)?;

        let (threshold, dev_score, metric) = match req.dev {
            Some((dev_x, dev_y)) => {
                let marginals = model.marginals(dev_x, req.eval_batch_size)?;
                let (threshold, metric) = if req.tune_b {
                    tune_threshold(&marginals, dev_y, beta)?
                } else {
                    (0.5, fscore_at(&marginals, dev_y, 0.5, beta)?)
                };
                let score = score_marginals(&marginals, dev_y, threshold)?;
                debug!(
                    index,
                    threshold,
                    precision = score.precision,
                    recall = score.recall,
                    f1 = score.f1,
                    "scored candidate"
                );
                (threshold, Some(score), metric)
            }
            None => (0.5, None, 0.0),
        };

        if let Some(dir) = req.save_dir {
            save_checkpoint(dir, req.model_name, index, &params, threshold, dev_score, &model)?;
        }

        let improves = best.as_ref().map_or(true, |(_, best_metric)| metric > *best_metric);
        if improves {
            best = Some((
                TrainedModel {
                    model,
                    params,
                    threshold,
                    dev_score,
                },
                metric,
            ));
        }
    }

    let (trained, metric) = best.ok_or_else(|| {
        crate::error::Error::precondition(req.model_name, "search produced no candidates")
    })?;
    info!(threshold = trained.threshold, metric, "selected model");
    Ok(trained)
}

fn fscore_at(marginals: &ndarray::Array1<f64>, gold: &GoldLabels, b: f64, beta: f64) -> Result<f64> {
    let analysis = error_analysis(marginals, gold, b)?;
    Ok(f_beta(analysis.precision(), analysis.recall(), beta))
}

/// Threshold maximising the F-score on dev.
pub fn tune_threshold(
    marginals: &ndarray::Array1<f64>,
    gold: &GoldLabels,
    beta: f64,
) -> Result<(f64, f64)> {
    let mut best = (0.5, f64::NEG_INFINITY);
    for b in THRESHOLD_GRID {
        let metric = fscore_at(marginals, gold, b, beta)?;
        if metric > best.1 {
            best = (b, metric);
        }
    }
    Ok(best)
}

fn save_checkpoint<M: TrainableModel>(
    dir: &Path,
    model_name: &str,
    index: usize,
    params: &Params,
    threshold: f64,
    score: Option<Score>,
    model: &M,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{model_name}_{index}.json"));
    let checkpoint = Checkpoint {
        model_name,
        index,
        params,
        threshold,
        score,
        model: model.checkpoint(),
    };
    std::fs::write(&path, serde_json::to_vec_pretty(&checkpoint)?)?;
    debug!(path = %path.display(), "saved checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ndarray::Array1;
    use rand::SeedableRng;
    use serde_json::json;

    use super::*;
    use crate::{data::Marginals, learning::param_f64};

    thread_local! {
        static TRAINED_WITH: RefCell<Vec<Params>> = const { RefCell::new(Vec::new()) };
    }

    /// Predicts `offset` for every row; the offset comes from the params.
    struct Constant {
        offset: f64,
    }

    impl TrainableModel for Constant {
        type Input = usize;

        fn new(_init: &Params) -> Result<Self> {
            Ok(Self { offset: 0.0 })
        }

        fn train(&mut self, _x: &usize, _y: Option<&Marginals>, params: &Params) -> Result<()> {
            TRAINED_WITH.with(|log| log.borrow_mut().push(params.clone()));
            self.offset = param_f64(params, "offset", 0.0);
            Ok(())
        }

        fn marginals(&self, x: &usize, _batch: Option<usize>) -> Result<Marginals> {
            Ok(Array1::from_elem(*x, self.offset))
        }
    }

    fn spec(search_size: usize) -> ModelSearchSpec {
        let mut defaults = Params::new();
        defaults.insert("offset".into(), json!(0.2));
        defaults.insert("fixed".into(), json!("kept"));
        let mut ranges = ParamRanges::new();
        ranges.insert("offset".into(), vec![json!(0.3), json!(0.7), json!(0.9)]);
        ModelSearchSpec {
            defaults,
            ranges,
            search_size,
        }
    }

    fn request<'a>(
        spec: &'a ModelSearchSpec,
        init: &'a Params,
        rng: &'a mut StdRng,
        dev: Option<(&'a usize, &'a GoldLabels)>,
        tune_b: bool,
    ) -> SearchRequest<'a, Constant> {
        SearchRequest {
            train_x: &3,
            train_y: None,
            dev,
            spec,
            init_params: init,
            rng,
            parallelism: Some(4),
            beta: None,
            tune_b,
            eval_batch_size: None,
            model_name: "constant",
            save_dir: None,
        }
    }

    #[test]
    fn search_size_one_trains_the_default_params() {
        TRAINED_WITH.with(|log| log.borrow_mut().clear());
        let spec = spec(1);
        let init = Params::new();
        let mut rng = StdRng::seed_from_u64(1);
        let gold = GoldLabels::from_labels(vec![1, 1, -1]).unwrap();
        let trained = train_model(request(&spec, &init, &mut rng, Some((&3, &gold)), false)).unwrap();
        assert_eq!(trained.params, spec.defaults);
        TRAINED_WITH.with(|log| assert_eq!(*log.borrow(), vec![spec.defaults.clone()]));
    }

    #[test]
    fn no_dev_data_means_defaults_and_half_threshold() {
        let spec = spec(5);
        let init = Params::new();
        let mut rng = StdRng::seed_from_u64(1);
        let trained = train_model(request(&spec, &init, &mut rng, None, true)).unwrap();
        assert_eq!(trained.params, spec.defaults);
        assert_eq!(trained.threshold, 0.5);
        assert!(trained.dev_score.is_none());
    }

    #[test]
    fn search_keeps_best_dev_candidate() {
        let spec = spec(8);
        let init = Params::new();
        let mut rng = StdRng::seed_from_u64(42);
        let gold = GoldLabels::from_labels(vec![1, 1, 1]).unwrap();
        let trained = train_model(request(&spec, &init, &mut rng, Some((&3, &gold)), false)).unwrap();
        // only offsets >= 0.5 predict positives
        let offset = trained.params["offset"].as_f64().unwrap();
        assert!(offset >= 0.5);
        assert_eq!(trained.params["fixed"], json!("kept"));
        assert_eq!(trained.dev_score.unwrap().f1, 1.0);
    }

    #[test]
    fn sampling_is_reproducible_for_a_seed() {
        let spec = spec(6);
        let a = spec.sample(&mut StdRng::seed_from_u64(9));
        let b = spec.sample(&mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn threshold_tuning_finds_separating_cut() {
        let gold = GoldLabels::from_labels(vec![1, 1, -1, -1]).unwrap();
        let marginals = Array1::from(vec![0.35, 0.4, 0.2, 0.1]);
        let (b, f1) = tune_threshold(&marginals, &gold, 1.0).unwrap();
        assert!(b > 0.2 && b <= 0.35);
        assert_eq!(f1, 1.0);
    }

    #[test]
    fn checkpoints_are_written_per_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let spec = spec(3);
        let init = Params::new();
        let mut rng = StdRng::seed_from_u64(3);
        let gold = GoldLabels::from_labels(vec![1, -1, 1]).unwrap();
        let mut req = request(&spec, &init, &mut rng, Some((&3, &gold)), true);
        req.save_dir = Some(dir.path());
        train_model(req).unwrap();
        for i in 0..3 {
            assert!(dir.path().join(format!("constant_{i}.json")).exists());
        }
    }
}
