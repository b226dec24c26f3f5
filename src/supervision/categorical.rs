//! Categorical label model over the {0 = abstain, 1 = negative, 2 = positive} recoding.

use serde_json::Value;
use tracing::{debug, info};

use super::label_model::{AccuracyModel, FitOptions, VoteRow};
use crate::{
    data::{CategoricalMatrix, GoldLabels, Marginals},
    error::{Error, Result},
    learning::{score_marginals, Score},
};

const POSITIVE: u8 = 2;
const NEGATIVE: u8 = 1;

/// Candidate values for each grid axis.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalGrid {
    pub l2: Vec<f64>,
    pub step_size: Vec<f64>,
}

impl CategoricalGrid {
    /// Single-point grid used when no search is configured.
    pub fn point(l2: f64, step_size: f64) -> Self {
        Self {
            l2: vec![l2],
            step_size: vec![step_size],
        }
    }

    /// Numeric entries of a params range; non-numeric values are dropped.
    pub fn axis(values: &[Value]) -> Vec<f64> {
        values.iter().filter_map(Value::as_f64).collect()
    }
}

/// Winner of [`CategoricalLabelModel::grid_search_train`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridChoice {
    pub l2: f64,
    pub step_size: f64,
    pub dev_score: Score,
}

#[derive(Debug, Default)]
pub struct CategoricalLabelModel {
    fitted: Option<AccuracyModel>,
}

fn rows(matrix: &CategoricalMatrix) -> Result<Vec<VoteRow>> {
    (0..matrix.n_rows())
        .map(|row| {
            matrix
                .row_values(row)
                .into_iter()
                .map(|(lf, category)| match category {
                    POSITIVE => Ok((lf, true)),
                    NEGATIVE => Ok((lf, false)),
                    other => Err(Error::precondition(
                        "categorical label model",
                        format!("row {row} lf {lf}: category {other} outside {{1, 2}}"),
                    )),
                })
                .collect()
        })
        .collect()
}

impl CategoricalLabelModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit on `train` once for every `(l2, step_size)` pair and keep the pair
    /// with the best dev F1. Earlier grid points win ties.
    pub fn grid_search_train(
        &mut self,
        train: &CategoricalMatrix,
        dev: &CategoricalMatrix,
        gold_dev: &GoldLabels,
        grid: &CategoricalGrid,
        n_steps: usize,
    ) -> Result<GridChoice> {
        if grid.l2.is_empty() || grid.step_size.is_empty() {
            return Err(Error::precondition(
                "categorical grid search",
                "both l2 and step_size need at least one value",
            ));
        }
        let train_rows = rows(train)?;
        let mut best: Option<(AccuracyModel, GridChoice)> = None;
        for &l2 in &grid.l2 {
            for &step_size in &grid.step_size {
                let opts = FitOptions {
                    epochs: n_steps,
                    step_size,
                    reg_param: l2,
                    class_prior: true,
                    weight_scale: Vec::new(),
                };
                let model = AccuracyModel::fit(&train_rows, train.n_lfs(), &opts);
                let marginals = predict(&model, dev)?;
                let dev_score = score_marginals(&marginals, gold_dev, 0.5)?;
                debug!(l2, step_size, f1 = dev_score.f1, "categorical grid point");
                if best.as_ref().map_or(true, |(_, b)| dev_score.f1 > b.dev_score.f1) {
                    best = Some((
                        model,
                        GridChoice {
                            l2,
                            step_size,
                            dev_score,
                        },
                    ));
                }
            }
        }
        let (model, choice) = best.ok_or_else(|| {
            Error::precondition("categorical grid search", "grid produced no candidates")
        })?;
        info!(
            l2 = choice.l2,
            step_size = choice.step_size,
            f1 = choice.dev_score.f1,
            "selected categorical model"
        );
        self.fitted = Some(model);
        Ok(choice)
    }

    /// Probability of category 2 (positive) per row.
    pub fn conditional_probs(&self, matrix: &CategoricalMatrix) -> Result<Marginals> {
        let model = self
            .fitted
            .as_ref()
            .ok_or_else(|| Error::precondition("categorical marginals", "model is not trained"))?;
        predict(model, matrix)
    }

    /// Score on a labelled split at threshold 0.5.
    pub fn score(&self, matrix: &CategoricalMatrix, gold: &GoldLabels) -> Result<Score> {
        score_marginals(&self.conditional_probs(matrix)?, gold, 0.5)
    }
}

fn predict(model: &AccuracyModel, matrix: &CategoricalMatrix) -> Result<Marginals> {
    Ok(rows(matrix)?.iter().map(|row| model.predict(row)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LabelMatrix;

    fn votes() -> LabelMatrix {
        LabelMatrix::from_rows(&[
            vec![1, 1, 1],
            vec![-1, -1, 0],
            vec![1, 0, 1],
            vec![-1, -1, -1],
            vec![1, 1, 0],
            vec![0, -1, -1],
        ])
        .unwrap()
    }

    #[test]
    fn grid_search_scores_dev_and_predicts() {
        let train = votes().to_categorical();
        let gold = GoldLabels::from_labels(vec![1, -1, 1, -1, 1, -1]).unwrap();
        let grid = CategoricalGrid {
            l2: vec![0.0, 0.1],
            step_size: vec![0.01, 0.05],
        };
        let mut model = CategoricalLabelModel::new();
        let choice = model.grid_search_train(&train, &train, &gold, &grid, 20).unwrap();
        assert_eq!(choice.dev_score.f1, 1.0);
        // first grid point already separates dev perfectly
        assert_eq!((choice.l2, choice.step_size), (0.0, 0.01));

        let probs = model.conditional_probs(&train).unwrap();
        assert!(probs[0] > 0.5 && probs[3] < 0.5);
        assert_eq!(model.score(&train, &gold).unwrap().f1, 1.0);
    }

    #[test]
    fn empty_grid_is_rejected() {
        let train = votes().to_categorical();
        let gold = GoldLabels::from_labels(vec![1; 6]).unwrap();
        let grid = CategoricalGrid {
            l2: Vec::new(),
            step_size: vec![0.01],
        };
        assert!(CategoricalLabelModel::new()
            .grid_search_train(&train, &train, &gold, &grid, 5)
            .is_err());
    }

    #[test]
    fn axis_keeps_numeric_entries() {
        let values = vec![serde_json::json!(0.1), serde_json::json!("x"), serde_json::json!(1)];
        assert_eq!(CategoricalGrid::axis(&values), vec![0.1, 1.0]);
    }
}
