//! Sparse annotation matrices keyed by candidate.

use std::collections::HashSet;

use ndarray::{Array1, Array2};
use rand::{rngs::StdRng, seq::index::sample};
use sprs::{CsMat, TriMat};

use crate::{
    data::CandidateId,
    error::{Error, Result},
};

/// Per-candidate probability of the positive class.
pub type Marginals = Array1<f64>;

/// Labeling-function votes: rows are candidates, columns are LFs, values in {-1, 0, 1}.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatrix {
    candidates: Vec<CandidateId>,
    votes: CsMat<i8>,
}

impl LabelMatrix {
    /// Build from `(row, lf, vote)` entries. Zero votes are dropped; a repeated
    /// `(row, lf)` coordinate is rejected rather than summed.
    pub fn from_entries(
        candidates: Vec<CandidateId>,
        n_lfs: usize,
        entries: impl IntoIterator<Item = (usize, usize, i8)>,
    ) -> Result<Self> {
        let rows = candidates.len();
        let mut tri = TriMat::new((rows, n_lfs));
        let mut seen = HashSet::new();
        for (row, lf, vote) in entries {
            if row >= rows || lf >= n_lfs {
                return Err(Error::precondition(
                    "label matrix",
                    format!("entry ({row}, {lf}) outside shape ({rows}, {n_lfs})"),
                ));
            }
            if !seen.insert((row, lf)) {
                return Err(Error::precondition(
                    "label matrix",
                    format!("duplicate entry at ({row}, {lf})"),
                ));
            }
            if !(-1..=1).contains(&vote) {
                return Err(Error::precondition(
                    "label matrix",
                    format!("vote {vote} at ({row}, {lf}) is not in {{-1, 0, 1}}"),
                ));
            }
            if vote != 0 {
                tri.add_triplet(row, lf, vote);
            }
        }
        Ok(Self {
            candidates,
            votes: tri.to_csr(),
        })
    }

    /// Build from dense rows; candidate ids are the row positions.
    pub fn from_rows(rows: &[Vec<i8>]) -> Result<Self> {
        let n_lfs = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().position(|row| row.len() != n_lfs) {
            return Err(Error::precondition(
                "label matrix",
                format!("row {bad} has {} votes, expected {n_lfs}", rows[bad].len()),
            ));
        }
        let candidates = (0..rows.len() as CandidateId).collect();
        let entries = rows.iter().enumerate().flat_map(|(i, row)| {
            row.iter().enumerate().map(move |(j, &vote)| (i, j, vote))
        });
        Self::from_entries(candidates, n_lfs, entries)
    }

    pub fn candidates(&self) -> &[CandidateId] {
        &self.candidates
    }

    pub fn n_rows(&self) -> usize {
        self.votes.rows()
    }

    pub fn n_lfs(&self) -> usize {
        self.votes.cols()
    }

    pub fn nnz(&self) -> usize {
        self.votes.nnz()
    }

    pub fn votes(&self) -> &CsMat<i8> {
        &self.votes
    }

    /// Non-abstain votes of one row as `(lf, vote)`.
    pub fn row_votes(&self, row: usize) -> impl Iterator<Item = (usize, i8)> + '_ {
        self.votes
            .outer_view(row)
            .into_iter()
            .flat_map(|view| view.iter().map(|(lf, &vote)| (lf, vote)).collect::<Vec<_>>())
    }

    pub fn to_dense(&self) -> Array2<i8> {
        self.votes.to_dense()
    }

    /// Keep only `rows`, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            candidates: rows.iter().map(|&i| self.candidates[i]).collect(),
            votes: select_csr_rows(&self.votes, rows),
        }
    }

    /// Recode {-1, 0, 1} as {1, 0, 2} for categorical consumers.
    pub fn to_categorical(&self) -> CategoricalMatrix {
        let data = self
            .votes
            .data()
            .iter()
            .map(|&vote| if vote > 0 { 2 } else { 1 })
            .collect();
        let values = CsMat::new(
            (self.n_rows(), self.n_lfs()),
            self.votes.indptr().to_proper().into_owned(),
            self.votes.indices().to_vec(),
            data,
        );
        CategoricalMatrix {
            candidates: self.candidates.clone(),
            values,
        }
    }
}

/// Label matrix recoded to {0 = abstain, 1 = negative, 2 = positive}.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalMatrix {
    candidates: Vec<CandidateId>,
    values: CsMat<u8>,
}

impl CategoricalMatrix {
    pub fn candidates(&self) -> &[CandidateId] {
        &self.candidates
    }

    pub fn n_rows(&self) -> usize {
        self.values.rows()
    }

    pub fn n_lfs(&self) -> usize {
        self.values.cols()
    }

    /// Non-abstain categories of one row as `(lf, category)`.
    pub fn row_values(&self, row: usize) -> Vec<(usize, u8)> {
        self.values
            .outer_view(row)
            .map(|view| view.iter().map(|(lf, &v)| (lf, v)).collect())
            .unwrap_or_default()
    }
}

/// Sparse real-valued features per candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    candidates: Vec<CandidateId>,
    values: CsMat<f64>,
}

impl FeatureMatrix {
    pub fn from_entries(
        candidates: Vec<CandidateId>,
        n_features: usize,
        entries: impl IntoIterator<Item = (usize, usize, f64)>,
    ) -> Result<Self> {
        let rows = candidates.len();
        let mut tri = TriMat::new((rows, n_features));
        let mut seen = HashSet::new();
        for (row, col, value) in entries {
            if row >= rows || col >= n_features {
                return Err(Error::precondition(
                    "feature matrix",
                    format!("entry ({row}, {col}) outside shape ({rows}, {n_features})"),
                ));
            }
            if !seen.insert((row, col)) {
                return Err(Error::precondition(
                    "feature matrix",
                    format!("duplicate entry at ({row}, {col})"),
                ));
            }
            if value != 0.0 {
                tri.add_triplet(row, col, value);
            }
        }
        Ok(Self {
            candidates,
            values: tri.to_csr(),
        })
    }

    pub fn candidates(&self) -> &[CandidateId] {
        &self.candidates
    }

    pub fn n_rows(&self) -> usize {
        self.values.rows()
    }

    pub fn n_features(&self) -> usize {
        self.values.cols()
    }

    pub fn nnz(&self) -> usize {
        self.values.nnz()
    }

    pub fn values(&self) -> &CsMat<f64> {
        &self.values
    }

    pub fn to_dense(&self) -> Array2<f64> {
        self.values.to_dense()
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            candidates: rows.iter().map(|&i| self.candidates[i]).collect(),
            values: select_csr_rows(&self.values, rows),
        }
    }
}

/// Gold labels aligned 1:1 with a matrix's rows; 0 means unlabeled.
#[derive(Debug, Clone, PartialEq)]
pub struct GoldLabels {
    candidates: Vec<CandidateId>,
    labels: Array1<i8>,
}

impl GoldLabels {
    pub fn new(candidates: Vec<CandidateId>, labels: Vec<i8>) -> Result<Self> {
        if candidates.len() != labels.len() {
            return Err(Error::precondition(
                "gold labels",
                format!(
                    "{} candidates but {} labels",
                    candidates.len(),
                    labels.len()
                ),
            ));
        }
        if let Some(bad) = labels.iter().find(|l| !(-1..=1).contains(*l)) {
            return Err(Error::precondition(
                "gold labels",
                format!("label {bad} is not in {{-1, 0, 1}}"),
            ));
        }
        Ok(Self {
            candidates,
            labels: Array1::from(labels),
        })
    }

    /// Gold labels with candidate ids equal to positions.
    pub fn from_labels(labels: Vec<i8>) -> Result<Self> {
        let candidates = (0..labels.len() as CandidateId).collect();
        Self::new(candidates, labels)
    }

    pub fn candidates(&self) -> &[CandidateId] {
        &self.candidates
    }

    pub fn labels(&self) -> &Array1<i8> {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of candidates carrying a non-zero gold label.
    pub fn labeled_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l != 0).count()
    }

    pub fn positive_fraction(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|&&l| l == 1).count() as f64 / self.labels.len() as f64
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            candidates: rows.iter().map(|&i| self.candidates[i]).collect(),
            labels: rows.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    /// Hard training targets: positive labels become 1.0, everything else 0.0.
    pub fn to_targets(&self) -> Marginals {
        self.labels.mapv(|l| if l == 1 { 1.0 } else { 0.0 })
    }

    /// Recode {-1, 0, 1} as {1, 0, 2}.
    pub fn to_categorical(&self) -> Array1<u8> {
        self.labels.mapv(|l| match l {
            1 => 2,
            -1 => 1,
            _ => 0,
        })
    }
}

/// Uniform sample of `size` row indices out of `total`, without replacement.
pub fn sample_rows(rng: &mut StdRng, total: usize, size: usize) -> Result<Vec<usize>> {
    if size > total {
        return Err(Error::precondition(
            "row subsampling",
            format!("cannot sample {size} rows out of {total}"),
        ));
    }
    Ok(sample(rng, total, size).into_vec())
}

fn select_csr_rows<N: Copy>(matrix: &CsMat<N>, rows: &[usize]) -> CsMat<N> {
    let mut indptr = Vec::with_capacity(rows.len() + 1);
    let mut indices = Vec::new();
    let mut data = Vec::new();
    indptr.push(0);
    for &row in rows {
        if let Some(view) = matrix.outer_view(row) {
            for (col, &value) in view.iter() {
                indices.push(col);
                data.push(value);
            }
        }
        indptr.push(indices.len());
    }
    CsMat::new((rows.len(), matrix.cols()), indptr, indices, data)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn zero_votes_are_not_stored() {
        let matrix = LabelMatrix::from_rows(&[vec![1, 0], vec![0, 0], vec![-1, 1]]).unwrap();
        assert_eq!(matrix.n_rows(), 3);
        assert_eq!(matrix.n_lfs(), 2);
        assert_eq!(matrix.nnz(), 3);
        assert_eq!(matrix.row_votes(1).count(), 0);
    }

    #[test]
    fn out_of_range_vote_is_rejected() {
        let err = LabelMatrix::from_rows(&[vec![2]]).unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
    }

    #[test]
    fn repeated_coordinates_are_rejected() {
        let err = LabelMatrix::from_entries(vec![0, 1], 2, vec![(0, 1, 1), (1, 0, -1), (0, 1, 1)])
            .unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
        assert!(err.to_string().contains("duplicate entry at (0, 1)"));

        // A zero vote still occupies its coordinate.
        assert!(LabelMatrix::from_entries(vec![0], 1, vec![(0, 0, 0), (0, 0, 1)]).is_err());

        let err = FeatureMatrix::from_entries(vec![0], 2, vec![(0, 0, 1.0), (0, 0, 2.0)])
            .unwrap_err();
        assert!(matches!(err, Error::Precondition { .. }));
    }

    #[test]
    fn categorical_recoding_maps_negative_to_one_and_positive_to_two() {
        let matrix = LabelMatrix::from_rows(&[vec![1, -1, 0]]).unwrap();
        let categorical = matrix.to_categorical();
        assert_eq!(categorical.row_values(0), vec![(0, 2), (1, 1)]);
    }

    #[test]
    fn row_selection_keeps_candidate_identity() {
        let matrix = LabelMatrix::from_entries(
            vec![10, 20, 30],
            2,
            vec![(0, 0, 1), (1, 1, -1), (2, 0, -1), (2, 1, 1)],
        )
        .unwrap();
        let picked = matrix.select_rows(&[2, 0]);
        assert_eq!(picked.candidates(), &[30, 10]);
        assert_eq!(picked.row_votes(0).collect::<Vec<_>>(), vec![(0, -1), (1, 1)]);
        assert_eq!(picked.row_votes(1).collect::<Vec<_>>(), vec![(0, 1)]);
    }

    #[test]
    fn sampling_is_reproducible_and_without_replacement() {
        let mut a = StdRng::seed_from_u64(7);
        let mut b = StdRng::seed_from_u64(7);
        let first = sample_rows(&mut a, 50, 20).unwrap();
        assert_eq!(first, sample_rows(&mut b, 50, 20).unwrap());
        let mut sorted = first.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 20);
        assert!(sample_rows(&mut a, 3, 4).is_err());
    }
}
