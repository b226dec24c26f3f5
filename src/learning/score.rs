//! Precision/recall/F1/coverage of marginals against gold labels.

use serde::Serialize;

use crate::{
    data::{CandidateId, GoldLabels, Marginals},
    error::{Error, Result},
};

/// Evaluation metrics at one decision threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub coverage: f64,
    pub threshold: f64,
}

/// Candidates bucketed by outcome; unlabeled gold entries land nowhere.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorAnalysis {
    pub tp: Vec<CandidateId>,
    pub fp: Vec<CandidateId>,
    pub tn: Vec<CandidateId>,
    pub fn_: Vec<CandidateId>,
}

impl ErrorAnalysis {
    pub fn precision(&self) -> f64 {
        ratio(self.tp.len(), self.tp.len() + self.fp.len())
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp.len(), self.tp.len() + self.fn_.len())
    }

    pub fn predicted(&self) -> usize {
        self.tp.len() + self.fp.len() + self.tn.len() + self.fn_.len()
    }
}

/// Split candidates into TP/FP/TN/FN, predicting positive when `marginal >= b`.
pub fn error_analysis(marginals: &Marginals, gold: &GoldLabels, b: f64) -> Result<ErrorAnalysis> {
    if marginals.len() != gold.len() {
        return Err(Error::precondition(
            "scoring",
            format!(
                "{} marginals but {} gold labels",
                marginals.len(),
                gold.len()
            ),
        ));
    }
    let mut out = ErrorAnalysis::default();
    for ((&p, &label), &id) in marginals
        .iter()
        .zip(gold.labels().iter())
        .zip(gold.candidates())
    {
        let predicted_positive = p >= b;
        match (label, predicted_positive) {
            (0, _) => {}
            (1, true) => out.tp.push(id),
            (1, false) => out.fn_.push(id),
            (_, true) => out.fp.push(id),
            (_, false) => out.tn.push(id),
        }
    }
    Ok(out)
}

/// Score `marginals` against `gold` at threshold `b`.
pub fn score_marginals(marginals: &Marginals, gold: &GoldLabels, b: f64) -> Result<Score> {
    let analysis = error_analysis(marginals, gold, b)?;
    let precision = analysis.precision();
    let recall = analysis.recall();
    let labeled = gold.labeled_count();
    Ok(Score {
        precision,
        recall,
        f1: f_beta(precision, recall, 1.0),
        coverage: ratio(analysis.predicted(), labeled),
        threshold: b,
    })
}

/// Weighted harmonic mean of precision and recall; 0 when both are 0.
pub fn f_beta(precision: f64, recall: f64, beta: f64) -> f64 {
    let b2 = beta * beta;
    let denom = b2 * precision + recall;
    if denom == 0.0 {
        0.0
    } else {
        (1.0 + b2) * precision * recall / denom
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}
