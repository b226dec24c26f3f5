//! Store contract for label, feature and gold matrices, plus an in-memory store.

use std::collections::HashMap;

use crate::{
    data::{CandidateId, FeatureMatrix, GoldLabels, LabelMatrix, Marginals, Split},
    error::{Error, Result},
};

/// Producer/consumer of the matrices a run works on.
///
/// Every load for a split with no prior data fails with [`Error::NoSuchData`].
pub trait LabelStore {
    fn load_label_matrix(&self, split: Split) -> Result<LabelMatrix>;
    fn load_feature_matrix(&self, split: Split) -> Result<FeatureMatrix>;
    fn load_gold_labels(&self, split: Split) -> Result<GoldLabels>;
    fn load_marginals(&self, split: Split) -> Result<Marginals>;

    /// Persist marginals for the candidates of `matrix`.
    fn save_marginals(&mut self, split: Split, matrix: &LabelMatrix, marginals: &Marginals)
        -> Result<()>;

    /// Human-readable labeling-function names, indexed by column.
    fn lf_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Store backed by hash maps; used by tests and by callers embedding the pipeline.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    labels: HashMap<Split, LabelMatrix>,
    features: HashMap<Split, FeatureMatrix>,
    gold: HashMap<Split, GoldLabels>,
    marginals: HashMap<Split, (Vec<CandidateId>, Marginals)>,
    lf_names: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_labels(mut self, split: Split, matrix: LabelMatrix) -> Self {
        self.labels.insert(split, matrix);
        self
    }

    pub fn with_features(mut self, split: Split, matrix: FeatureMatrix) -> Self {
        self.features.insert(split, matrix);
        self
    }

    pub fn with_gold(mut self, split: Split, gold: GoldLabels) -> Self {
        self.gold.insert(split, gold);
        self
    }

    pub fn with_lf_names(mut self, names: Vec<String>) -> Self {
        self.lf_names = names;
        self
    }

    /// Whether marginals were saved for `split`.
    pub fn has_marginals(&self, split: Split) -> bool {
        self.marginals.contains_key(&split)
    }

    /// Candidates the saved marginals of `split` belong to, in row order.
    pub fn marginal_candidates(&self, split: Split) -> Option<&[CandidateId]> {
        self.marginals.get(&split).map(|(ids, _)| ids.as_slice())
    }
}

impl LabelStore for MemoryStore {
    fn load_label_matrix(&self, split: Split) -> Result<LabelMatrix> {
        self.labels.get(&split).cloned().ok_or(Error::NoSuchData {
            kind: "label matrix",
            split,
        })
    }

    fn load_feature_matrix(&self, split: Split) -> Result<FeatureMatrix> {
        self.features.get(&split).cloned().ok_or(Error::NoSuchData {
            kind: "feature matrix",
            split,
        })
    }

    fn load_gold_labels(&self, split: Split) -> Result<GoldLabels> {
        self.gold.get(&split).cloned().ok_or(Error::NoSuchData {
            kind: "gold labels",
            split,
        })
    }

    fn load_marginals(&self, split: Split) -> Result<Marginals> {
        self.marginals.get(&split).map(|(_, m)| m.clone()).ok_or(Error::NoSuchData {
            kind: "marginals",
            split,
        })
    }

    fn save_marginals(
        &mut self,
        split: Split,
        matrix: &LabelMatrix,
        marginals: &Marginals,
    ) -> Result<()> {
        if matrix.n_rows() != marginals.len() {
            return Err(Error::precondition(
                format!("save_marginals [{split}]"),
                format!(
                    "{} marginals for {} candidates",
                    marginals.len(),
                    matrix.n_rows()
                ),
            ));
        }
        self.marginals
            .insert(split, (matrix.candidates().to_vec(), marginals.clone()));
        Ok(())
    }

    fn lf_names(&self) -> Vec<String> {
        self.lf_names.clone()
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn missing_split_is_no_such_data() {
        let store = MemoryStore::new();
        let err = store.load_label_matrix(Split::Dev).unwrap_err();
        assert!(matches!(
            err,
            Error::NoSuchData {
                split: Split::Dev,
                ..
            }
        ));
    }

    #[test]
    fn marginals_must_match_rows() {
        let matrix = LabelMatrix::from_rows(&[vec![1], vec![-1]]).unwrap();
        let mut store = MemoryStore::new();
        assert!(store
            .save_marginals(Split::Train, &matrix, &array![1.0])
            .is_err());
        store
            .save_marginals(Split::Train, &matrix, &array![1.0, 0.0])
            .unwrap();
        assert_eq!(store.load_marginals(Split::Train).unwrap(), array![1.0, 0.0]);
    }
}
