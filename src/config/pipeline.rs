//! Typed, immutable view of a resolved run configuration.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    data::Split,
    error::{Error, Result},
    learning::search::{ModelSearchSpec, ParamRanges, Params},
};

/// How training labels for the classifier are produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Supervision {
    /// Gold labels of `split` are used directly; no aggregation.
    Traditional { split: Split },
    Majority,
    SoftMajority,
    /// Dependency-aware generative label model.
    Generative {
        learn_deps: bool,
        deps_thresh: Option<f64>,
        deps_steps: usize,
    },
    /// Categorical label model over the {0, 1, 2} recoding.
    CategoricalDp,
    /// Joint training against collected explanations; no aggregation.
    JointTraining,
}

impl Supervision {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Traditional { .. } => "traditional",
            Self::Majority => "majority",
            Self::SoftMajority => "soft_majority",
            Self::Generative { .. } => "generative",
            Self::CategoricalDp => "dp",
            Self::JointTraining => "jt",
        }
    }

    /// Modes whose training labels do not come from an aggregator.
    pub fn skips_aggregation(&self) -> bool {
        matches!(self, Self::Traditional { .. } | Self::JointTraining)
    }
}

/// Discriminative model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscModelClass {
    LogReg,
    Lstm,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    domain: String,
    candidate_name: Option<String>,
    start_at: Option<usize>,
    end_at: Option<usize>,
    debug: Option<bool>,
    verbose: Option<bool>,
    seed: Option<u64>,
    parallelism: Option<usize>,
    max_docs: Option<usize>,
    splits: Option<Vec<Split>>,
    supervision: Option<String>,
    max_train: Option<usize>,
    max_dev: Option<usize>,
    learn_deps: Option<bool>,
    deps_thresh: Option<f64>,
    deps_steps: Option<usize>,
    gen_f_beta: Option<f64>,
    tune_b: Option<bool>,
    traditional_split: Option<Split>,
    gen_model_search_space: Option<usize>,
    #[serde(default)]
    gen_init_params: Params,
    #[serde(default)]
    gen_params_default: Params,
    #[serde(default)]
    gen_params_range: ParamRanges,
    disc_model_class: Option<String>,
    disc_model_search_space: Option<usize>,
    #[serde(default)]
    disc_init_params: Params,
    #[serde(default)]
    disc_params_default: Params,
    #[serde(default)]
    disc_params_range: ParamRanges,
    disc_eval_batch_size: Option<usize>,
    reports_dir: Option<PathBuf>,
}

/// Effective configuration of one run. Built once, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub domain: String,
    pub candidate_name: Option<String>,
    pub start_at: Option<usize>,
    pub end_at: Option<usize>,
    pub debug: bool,
    pub verbose: bool,
    pub seed: u64,
    pub parallelism: Option<usize>,
    pub max_docs: Option<usize>,
    pub splits: Vec<Split>,
    pub supervision: Supervision,
    pub max_train: Option<usize>,
    pub max_dev: Option<usize>,
    pub gen_f_beta: Option<f64>,
    pub tune_b: Option<bool>,
    pub gen_model_search_space: Option<usize>,
    pub gen_init_params: Params,
    pub gen_params_default: Params,
    pub gen_params_range: ParamRanges,
    pub disc_model_class: DiscModelClass,
    pub disc_model_search_space: Option<usize>,
    pub disc_init_params: Params,
    pub disc_params_default: Params,
    pub disc_params_range: ParamRanges,
    pub disc_eval_batch_size: Option<usize>,
    pub reports_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Type-check a merged configuration tree.
    pub fn from_map(raw: Map<String, Value>) -> Result<Self> {
        let parsed: RawConfig = serde_json::from_value(Value::Object(raw))
            .map_err(|e| Error::Config(e.to_string()))?;

        let supervision = match parsed.supervision.as_deref().unwrap_or("generative") {
            "traditional" => Supervision::Traditional {
                split: parsed.traditional_split.unwrap_or(Split::Train),
            },
            "majority" => Supervision::Majority,
            "soft_majority" => Supervision::SoftMajority,
            "generative" => Supervision::Generative {
                learn_deps: parsed.learn_deps.unwrap_or(false),
                deps_thresh: parsed.deps_thresh.filter(|thresh| *thresh > 0.0),
                deps_steps: parsed.deps_steps.unwrap_or(25),
            },
            "dp" => Supervision::CategoricalDp,
            "jt" => Supervision::JointTraining,
            other => return Err(Error::UnknownSupervision(other.to_string())),
        };
        let disc_model_class = match parsed.disc_model_class.as_deref().unwrap_or("logreg") {
            "logreg" => DiscModelClass::LogReg,
            "lstm" => DiscModelClass::Lstm,
            other => {
                return Err(Error::Config(format!(
                    "unknown disc_model_class '{other}' (expected logreg or lstm)"
                )))
            }
        };
        let seed = parsed
            .seed
            .filter(|seed| *seed != 0)
            .ok_or_else(|| Error::Config("seed must be resolved before the run starts".into()))?;

        Ok(Self {
            domain: parsed.domain,
            candidate_name: parsed.candidate_name,
            start_at: parsed.start_at,
            end_at: parsed.end_at,
            debug: parsed.debug.unwrap_or(false),
            verbose: parsed.verbose.unwrap_or(false),
            seed,
            parallelism: parsed.parallelism,
            max_docs: parsed.max_docs,
            splits: parsed.splits.unwrap_or_else(|| Split::ALL.to_vec()),
            supervision,
            max_train: parsed.max_train,
            max_dev: parsed.max_dev,
            gen_f_beta: parsed.gen_f_beta,
            tune_b: parsed.tune_b,
            gen_model_search_space: parsed.gen_model_search_space,
            gen_init_params: parsed.gen_init_params,
            gen_params_default: parsed.gen_params_default,
            gen_params_range: parsed.gen_params_range,
            disc_model_class,
            disc_model_search_space: parsed.disc_model_search_space,
            disc_init_params: parsed.disc_init_params,
            disc_params_default: parsed.disc_params_default,
            disc_params_range: parsed.disc_params_range,
            disc_eval_batch_size: parsed.disc_eval_batch_size,
            reports_dir: parsed.reports_dir,
        })
    }

    /// Apply run-time shrinking for debug runs.
    ///
    /// Must be called once, before any stage reads the affected fields.
    pub fn effective(mut self) -> Self {
        if !self.debug {
            return self;
        }
        tracing::warn!("debug run: shrinking max_docs, search spaces and epoch counts");
        self.max_docs = Some(100);
        self.gen_model_search_space = Some(2);
        self.disc_model_search_space = Some(2);
        self.gen_params_default.insert("epochs".into(), Value::from(25));
        self.disc_params_default.insert("n_epochs".into(), Value::from(5));
        self
    }

    /// Validated `[start_at, end_at)` stage range.
    pub fn stage_range(&self) -> Result<(usize, usize)> {
        match (self.start_at, self.end_at) {
            (Some(start), Some(end)) => Ok((start, end)),
            _ => Err(Error::MissingStageRange),
        }
    }

    pub fn uses_split(&self, split: Split) -> bool {
        self.splits.contains(&split)
    }

    pub fn gen_search_spec(&self) -> ModelSearchSpec {
        ModelSearchSpec {
            defaults: self.gen_params_default.clone(),
            ranges: self.gen_params_range.clone(),
            search_size: self.gen_model_search_space.unwrap_or(1),
        }
    }

    pub fn disc_search_spec(&self) -> ModelSearchSpec {
        ModelSearchSpec {
            defaults: self.disc_params_default.clone(),
            ranges: self.disc_params_range.clone(),
            search_size: self.disc_model_search_space.unwrap_or(1),
        }
    }

    pub fn checkpoint_dir(&self) -> Option<PathBuf> {
        self.reports_dir.as_ref().map(|dir| dir.join("checkpoints"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::layers::global_defaults;

    fn config(overrides: Value) -> PipelineConfig {
        let mut map = global_defaults();
        crate::config::merge::merge_into(&mut map, overrides.as_object().unwrap());
        PipelineConfig::from_map(map).unwrap()
    }

    #[test]
    fn supervision_string_becomes_tagged_variant() {
        let cfg = config(json!({"domain": "d", "seed": 1, "supervision": "generative", "learn_deps": true}));
        assert_eq!(
            cfg.supervision,
            Supervision::Generative {
                learn_deps: true,
                deps_thresh: None,
                deps_steps: 25
            }
        );
        let cfg = config(json!({"domain": "d", "seed": 1, "supervision": "traditional", "traditional_split": 1}));
        assert_eq!(cfg.supervision, Supervision::Traditional { split: Split::Dev });
    }

    #[test]
    fn zero_threshold_and_seed_count_as_unset() {
        let cfg = config(json!({"domain": "d", "seed": 1, "supervision": "generative", "deps_thresh": 0.0}));
        assert!(matches!(cfg.supervision, Supervision::Generative { deps_thresh: None, .. }));
        let cfg = config(json!({"domain": "d", "seed": 1, "supervision": "generative", "deps_thresh": 0.04}));
        assert!(matches!(cfg.supervision, Supervision::Generative { deps_thresh: Some(t), .. } if t == 0.04));

        let mut map = global_defaults();
        map.insert("domain".into(), json!("d"));
        map.insert("seed".into(), json!(0));
        assert!(matches!(PipelineConfig::from_map(map), Err(Error::Config(_))));
    }

    #[test]
    fn unknown_supervision_is_a_config_error() {
        let mut map = global_defaults();
        map.insert("domain".into(), json!("d"));
        map.insert("seed".into(), json!(1));
        map.insert("supervision".into(), json!("weird"));
        assert!(matches!(
            PipelineConfig::from_map(map),
            Err(Error::UnknownSupervision(_))
        ));
    }

    #[test]
    fn debug_transform_shrinks_budgets() {
        let cfg = config(json!({"domain": "d", "seed": 1, "debug": true})).effective();
        assert_eq!(cfg.max_docs, Some(100));
        assert_eq!(cfg.gen_search_spec().search_size, 2);
        assert_eq!(cfg.disc_search_spec().search_size, 2);
        assert_eq!(cfg.gen_params_default["epochs"], json!(25));
        assert_eq!(cfg.disc_params_default["n_epochs"], json!(5));

        let untouched = config(json!({"domain": "d", "seed": 1})).effective();
        assert_eq!(untouched.gen_params_default["epochs"], json!(50));
    }

    #[test]
    fn stage_range_requires_both_bounds() {
        let cfg = config(json!({"domain": "d", "seed": 1, "start_at": 6}));
        assert!(matches!(cfg.stage_range(), Err(Error::MissingStageRange)));
        let cfg = config(json!({"domain": "d", "seed": 1, "start_at": 6, "end_at": 8}));
        assert_eq!(cfg.stage_range().unwrap(), (6, 8));
    }
}
