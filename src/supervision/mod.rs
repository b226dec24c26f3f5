//! Label aggregation: turn a train label matrix into marginals using the
//! strategy selected by the run's supervision mode.

pub mod categorical;
pub mod deps;
pub mod generative;
pub(crate) mod label_model;
pub mod majority;

use rand::rngs::StdRng;
use tracing::{info, instrument, warn};

use crate::{
    config::{PipelineConfig, Supervision},
    data::{GoldLabels, LabelMatrix, Marginals},
    error::{Error, Result},
    learning::{
        error_analysis, param_f64, param_usize, score_marginals, train_model, Score,
        SearchRequest, TrainableModel,
    },
};

pub use categorical::{CategoricalGrid, CategoricalLabelModel};
pub use deps::{
    CorrelationDetector, Dependency, DependencySelector, DependencySet, DependencyType,
    PearsonDetector, SweepOutcome,
};
pub use generative::GenerativeModel;
pub use majority::{majority_vote, soft_majority_vote};

/// A label matrix paired with the gold labels of its rows.
pub type LabeledSplit<'a> = (&'a LabelMatrix, &'a GoldLabels);

/// Matrices an aggregator may read.
#[derive(Debug, Clone, Copy)]
pub struct SupervisionInputs<'a> {
    /// Possibly row-subsampled train matrix.
    pub train: &'a LabelMatrix,
    pub dev: Option<LabeledSplit<'a>>,
    pub test: Option<LabeledSplit<'a>>,
    /// Labeling-function names by column; may be empty.
    pub lf_names: &'a [String],
}

/// Output of one aggregation.
#[derive(Debug, Clone)]
pub struct Aggregation {
    /// One marginal per row of the train matrix.
    pub marginals: Marginals,
    pub dev_score: Option<Score>,
    pub test_score: Option<Score>,
    /// Decision threshold the scores were computed at.
    pub threshold: f64,
    pub deps: DependencySet,
}

/// Run the aggregator named by `config.supervision`.
///
/// Returns `Ok(None)` for modes that do not aggregate, without reading any input.
#[instrument(skip_all, fields(supervision = config.supervision.name()))]
pub fn aggregate(
    config: &PipelineConfig,
    inputs: SupervisionInputs<'_>,
    rng: &mut StdRng,
) -> Result<Option<Aggregation>> {
    let aggregation = match &config.supervision {
        Supervision::Traditional { .. } | Supervision::JointTraining => {
            info!("supervision mode does not aggregate; skipping");
            return Ok(None);
        }
        Supervision::Majority => vote(inputs, majority_vote)?,
        Supervision::SoftMajority => vote(inputs, soft_majority_vote)?,
        Supervision::Generative {
            learn_deps,
            deps_thresh,
            deps_steps,
        } => {
            let deps = if *learn_deps {
                let selector = DependencySelector::new(PearsonDetector).with_steps(*deps_steps);
                match deps_thresh {
                    Some(threshold) => selector.select_at(inputs.train, *threshold)?,
                    None => selector.sweep(inputs.train)?.dependencies,
                }
            } else {
                DependencySet::new()
            };
            log_dependencies(&deps, inputs.lf_names);
            generative(config, inputs, deps, rng)?
        }
        Supervision::CategoricalDp => categorical_dp(config, inputs)?,
    };
    if let Some(score) = aggregation.dev_score {
        info!(
            precision = score.precision,
            recall = score.recall,
            f1 = score.f1,
            threshold = score.threshold,
            "aggregator score on dev"
        );
    }
    Ok(Some(aggregation))
}

fn check_aligned(matrix: &LabelMatrix, gold: &GoldLabels) -> Result<()> {
    if matrix.n_rows() != gold.len() {
        return Err(Error::precondition(
            "aggregation",
            format!(
                "label matrix has {} rows but gold has {} labels",
                matrix.n_rows(),
                gold.len()
            ),
        ));
    }
    Ok(())
}

/// Score `predict` on an optional labelled split.
fn score_split<F>(split: Option<LabeledSplit<'_>>, b: f64, predict: F) -> Result<Option<Score>>
where
    F: Fn(&LabelMatrix) -> Result<Marginals>,
{
    split
        .map(|(matrix, gold)| {
            check_aligned(matrix, gold)?;
            score_marginals(&predict(matrix)?, gold, b)
        })
        .transpose()
}

fn vote(inputs: SupervisionInputs<'_>, voter: fn(&LabelMatrix) -> Marginals) -> Result<Aggregation> {
    let predict = |m: &LabelMatrix| -> Result<Marginals> { Ok(voter(m)) };
    Ok(Aggregation {
        marginals: voter(inputs.train),
        dev_score: score_split(inputs.dev, 0.5, predict)?,
        test_score: score_split(inputs.test, 0.5, predict)?,
        threshold: 0.5,
        deps: DependencySet::new(),
    })
}

fn generative(
    config: &PipelineConfig,
    inputs: SupervisionInputs<'_>,
    deps: DependencySet,
    rng: &mut StdRng,
) -> Result<Aggregation> {
    let mut spec = config.gen_search_spec();
    spec.defaults
        .insert(generative::DEPS_PARAM.to_string(), generative::deps_to_param(&deps));
    if let Some((l_dev, gold)) = inputs.dev {
        check_aligned(l_dev, gold)?;
    }
    let checkpoints = config.checkpoint_dir();
    let model_name = format!("generative_{}", config.domain);

    let trained = train_model::<GenerativeModel>(SearchRequest {
        train_x: inputs.train,
        train_y: None,
        dev: inputs.dev,
        spec: &spec,
        init_params: &config.gen_init_params,
        rng,
        parallelism: config.parallelism,
        beta: config.gen_f_beta,
        tune_b: config.tune_b.unwrap_or(false),
        eval_batch_size: None,
        model_name: &model_name,
        save_dir: checkpoints.as_deref(),
    })?;
    let model = &trained.model;
    let marginals = model.marginals(inputs.train, None)?;

    if let Some((l_dev, gold)) = inputs.dev {
        let analysis = error_analysis(&model.marginals(l_dev, None)?, gold, trained.threshold)?;
        info!(
            tp = analysis.tp.len(),
            fp = analysis.fp.len(),
            tn = analysis.tn.len(),
            fn_ = analysis.fn_.len(),
            threshold = trained.threshold,
            "generative model error analysis on dev"
        );
    }
    let test_score = score_split(inputs.test, trained.threshold, |m| model.marginals(m, None))?;

    Ok(Aggregation {
        marginals,
        dev_score: trained.dev_score,
        test_score,
        threshold: trained.threshold,
        deps,
    })
}

/// Grid over `reg_param` x `step_size` from the generative ranges when a search
/// is configured, otherwise the single default point.
fn categorical_grid(config: &PipelineConfig) -> CategoricalGrid {
    let defaults = &config.gen_params_default;
    let default_point = CategoricalGrid::point(
        param_f64(defaults, "reg_param", 0.1),
        param_f64(defaults, "step_size", 0.01),
    );
    if config.gen_search_spec().search_size <= 1 {
        return default_point;
    }
    let axis = |key: &str, fallback: &[f64]| {
        let values = config
            .gen_params_range
            .get(key)
            .map(|values| CategoricalGrid::axis(values))
            .unwrap_or_default();
        if values.is_empty() {
            fallback.to_vec()
        } else {
            values
        }
    };
    CategoricalGrid {
        l2: axis("reg_param", &default_point.l2),
        step_size: axis("step_size", &default_point.step_size),
    }
}

fn categorical_dp(config: &PipelineConfig, inputs: SupervisionInputs<'_>) -> Result<Aggregation> {
    let (l_dev, gold_dev) = inputs.dev.ok_or_else(|| {
        Error::precondition("dp supervision", "the categorical model needs a dev split")
    })?;
    check_aligned(l_dev, gold_dev)?;

    let grid = categorical_grid(config);
    let n_steps = param_usize(&config.gen_params_default, "epochs", 50);
    let mut model = CategoricalLabelModel::new();
    let choice = model.grid_search_train(
        &inputs.train.to_categorical(),
        &l_dev.to_categorical(),
        gold_dev,
        &grid,
        n_steps,
    )?;
    let marginals = model.conditional_probs(&inputs.train.to_categorical())?;
    let test_score = score_split(inputs.test, 0.5, |m| model.conditional_probs(&m.to_categorical()))?;
    if let Some(score) = test_score {
        info!(
            precision = score.precision,
            recall = score.recall,
            f1 = score.f1,
            "categorical model score on test"
        );
    }

    Ok(Aggregation {
        marginals,
        dev_score: Some(choice.dev_score),
        test_score,
        threshold: 0.5,
        deps: DependencySet::new(),
    })
}

fn log_dependencies(deps: &DependencySet, lf_names: &[String]) {
    if deps.is_empty() {
        info!("training the generative model without dependencies");
        return;
    }
    if lf_names.is_empty() {
        warn!("store has no labeling-function names; showing column indices");
    }
    let name = |lf: usize| {
        lf_names
            .get(lf)
            .cloned()
            .unwrap_or_else(|| format!("lf_{lf}"))
    };
    for Dependency(a, b, kind) in deps {
        info!(lf1 = %name(*a), lf2 = %name(*b), %kind, "dependency");
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use serde_json::json;

    use super::*;
    use crate::config::{layers::global_defaults, merge::merge_into};

    fn config(overrides: serde_json::Value) -> PipelineConfig {
        let mut map = global_defaults();
        merge_into(&mut map, overrides.as_object().unwrap());
        PipelineConfig::from_map(map).unwrap()
    }

    fn train() -> LabelMatrix {
        LabelMatrix::from_rows(&[
            vec![1, 1, 0],
            vec![-1, -1, -1],
            vec![1, 0, 1],
            vec![-1, 0, -1],
            vec![1, 1, 1],
            vec![0, -1, -1],
        ])
        .unwrap()
    }

    #[test]
    fn traditional_short_circuits() {
        let cfg = config(json!({"domain": "d", "seed": 1, "supervision": "traditional"}));
        let l = train();
        let inputs = SupervisionInputs {
            train: &l,
            dev: None,
            test: None,
            lf_names: &[],
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(aggregate(&cfg, inputs, &mut rng).unwrap().is_none());
    }

    #[test]
    fn majority_scores_dev_at_half() {
        let cfg = config(json!({"domain": "d", "seed": 1, "supervision": "majority"}));
        let l = train();
        let gold = GoldLabels::from_labels(vec![1, -1, 1, -1, 1, -1]).unwrap();
        let inputs = SupervisionInputs {
            train: &l,
            dev: Some((&l, &gold)),
            test: None,
            lf_names: &[],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let agg = aggregate(&cfg, inputs, &mut rng).unwrap().unwrap();
        assert_eq!(agg.marginals.to_vec(), vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
        assert_eq!(agg.dev_score.unwrap().f1, 1.0);
        assert!(agg.test_score.is_none());
    }

    #[test]
    fn generative_without_dev_uses_defaults() {
        let cfg = config(json!({"domain": "d", "seed": 1, "supervision": "generative"}));
        let l = train();
        let inputs = SupervisionInputs {
            train: &l,
            dev: None,
            test: None,
            lf_names: &[],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let agg = aggregate(&cfg, inputs, &mut rng).unwrap().unwrap();
        assert_eq!(agg.marginals.len(), 6);
        assert_eq!(agg.threshold, 0.5);
        assert!(agg.dev_score.is_none());
        assert!(agg.marginals[4] > 0.5 && agg.marginals[1] < 0.5);
    }

    #[test]
    fn dp_requires_dev() {
        let cfg = config(json!({"domain": "d", "seed": 1, "supervision": "dp"}));
        let l = train();
        let inputs = SupervisionInputs {
            train: &l,
            dev: None,
            test: None,
            lf_names: &[],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let err = aggregate(&cfg, inputs, &mut rng).unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
    }

    #[test]
    fn dp_recodes_and_scores_dev() {
        let cfg = config(json!({
            "domain": "d", "seed": 1, "supervision": "dp",
            "gen_model_search_space": 1
        }));
        let l = train();
        let gold = GoldLabels::from_labels(vec![1, -1, 1, -1, 1, -1]).unwrap();
        let inputs = SupervisionInputs {
            train: &l,
            dev: Some((&l, &gold)),
            test: Some((&l, &gold)),
            lf_names: &[],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let agg = aggregate(&cfg, inputs, &mut rng).unwrap().unwrap();
        assert_eq!(agg.dev_score.unwrap().f1, 1.0);
        assert_eq!(agg.test_score.unwrap().f1, 1.0);
    }
}
