//! Dependency-aware generative label model.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use super::{
    deps::{Dependency, DependencySet, DependencyType},
    label_model::{AccuracyModel, FitOptions, VoteRow},
};
use crate::{
    data::{LabelMatrix, Marginals},
    error::{Error, Result},
    learning::{param_bool, param_f64, param_usize, Params, TrainableModel},
};

/// Params key carrying the selected dependency triples.
pub const DEPS_PARAM: &str = "deps";

/// Learns per-LF accuracies from the label matrix alone.
///
/// Train params: `epochs`, `step_size`, `reg_param` and `deps`. LFs that sit in
/// a SIMILAR or REINFORCING pair have their vote weight divided by one plus the
/// number of such pairs, so correlated LFs are not double counted. Init param
/// `class_prior` (default false) also learns the positive-class prior.
#[derive(Debug)]
pub struct GenerativeModel {
    class_prior: bool,
    fitted: Option<AccuracyModel>,
    deps: DependencySet,
}

impl GenerativeModel {
    /// Learned accuracy per LF; empty before training.
    pub fn accuracies(&self) -> &[f64] {
        self.fitted
            .as_ref()
            .map(AccuracyModel::accuracies)
            .unwrap_or_default()
    }

    pub fn dependencies(&self) -> &DependencySet {
        &self.deps
    }
}

/// Dependencies stored under [`DEPS_PARAM`], or an empty set.
pub fn deps_from_params(params: &Params) -> Result<DependencySet> {
    match params.get(DEPS_PARAM) {
        None | Some(Value::Null) => Ok(DependencySet::new()),
        Some(value) => serde_json::from_value::<Vec<Dependency>>(value.clone())
            .map(|deps| deps.into_iter().collect())
            .map_err(|e| Error::Config(format!("invalid '{DEPS_PARAM}' param: {e}"))),
    }
}

pub fn deps_to_param(deps: &DependencySet) -> Value {
    json!(deps.iter().collect::<Vec<_>>())
}

fn weight_scale(n_lfs: usize, deps: &DependencySet) -> Vec<f64> {
    let mut correlated: HashMap<usize, usize> = HashMap::new();
    for Dependency(a, b, kind) in deps {
        if matches!(kind, DependencyType::Similar | DependencyType::Reinforcing) {
            *correlated.entry(*a).or_default() += 1;
            *correlated.entry(*b).or_default() += 1;
        }
    }
    (0..n_lfs)
        .map(|lf| 1.0 / (1.0 + correlated.get(&lf).copied().unwrap_or(0) as f64))
        .collect()
}

fn vote_rows(matrix: &LabelMatrix) -> Vec<VoteRow> {
    (0..matrix.n_rows())
        .map(|row| matrix.row_votes(row).map(|(lf, v)| (lf, v > 0)).collect())
        .collect()
}

impl TrainableModel for GenerativeModel {
    type Input = LabelMatrix;

    fn new(init: &Params) -> Result<Self> {
        Ok(Self {
            class_prior: param_bool(init, "class_prior", false),
            fitted: None,
            deps: DependencySet::new(),
        })
    }

    fn train(&mut self, x: &LabelMatrix, _y: Option<&Marginals>, params: &Params) -> Result<()> {
        let deps = deps_from_params(params)?;
        if let Some(bad) = deps.iter().find(|d| d.1 >= x.n_lfs() || d.0 >= d.1) {
            return Err(Error::precondition(
                "generative model",
                format!("dependency {bad:?} does not fit {} LFs", x.n_lfs()),
            ));
        }
        let opts = FitOptions {
            epochs: param_usize(params, "epochs", 50),
            step_size: param_f64(params, "step_size", 0.01),
            reg_param: param_f64(params, "reg_param", 0.1),
            class_prior: self.class_prior,
            weight_scale: weight_scale(x.n_lfs(), &deps),
        };
        debug!(
            rows = x.n_rows(),
            lfs = x.n_lfs(),
            deps = deps.len(),
            epochs = opts.epochs,
            "fitting generative model"
        );
        self.fitted = Some(AccuracyModel::fit(&vote_rows(x), x.n_lfs(), &opts));
        self.deps = deps;
        Ok(())
    }

    fn marginals(&self, x: &LabelMatrix, _batch_size: Option<usize>) -> Result<Marginals> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| Error::precondition("generative marginals", "model is not trained"))?;
        Ok(vote_rows(x).iter().map(|row| fitted.predict(row)).collect())
    }

    fn checkpoint(&self) -> Option<Value> {
        let fitted = self.fitted.as_ref()?;
        Some(json!({
            "model": fitted,
            "deps": deps_to_param(&self.deps),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> LabelMatrix {
        LabelMatrix::from_rows(&[
            vec![1, 1, 0],
            vec![-1, -1, 1],
            vec![1, 1, -1],
            vec![-1, -1, 0],
            vec![0, 0, 0],
        ])
        .unwrap()
    }

    #[test]
    fn marginals_follow_agreeing_lfs() {
        let mut model = GenerativeModel::new(&Params::new()).unwrap();
        let mut params = Params::new();
        params.insert("epochs".into(), json!(20));
        params.insert("step_size".into(), json!(0.05));
        model.train(&matrix(), None, &params).unwrap();
        let m = model.marginals(&matrix(), None).unwrap();
        assert!(m[0] > 0.5 && m[2] > 0.5);
        assert!(m[1] < 0.5 && m[3] < 0.5);
        assert_eq!(m[4], 0.5);
        assert_eq!(model.accuracies().len(), 3);
    }

    #[test]
    fn similar_pairs_are_damped() {
        let deps: DependencySet = [Dependency::new(0, 1, DependencyType::Similar)].into();
        assert_eq!(weight_scale(3, &deps), vec![0.5, 0.5, 1.0]);
        let mut params = Params::new();
        params.insert(DEPS_PARAM.into(), deps_to_param(&deps));
        assert_eq!(deps_from_params(&params).unwrap(), deps);
    }

    #[test]
    fn out_of_range_dependency_is_rejected() {
        let mut model = GenerativeModel::new(&Params::new()).unwrap();
        let mut params = Params::new();
        params.insert(DEPS_PARAM.into(), json!([[0, 7, "SIMILAR"]]));
        assert!(model.train(&matrix(), None, &params).is_err());
    }
}
