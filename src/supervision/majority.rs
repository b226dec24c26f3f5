//! Hard and soft majority vote over labeling-function outputs.

use ndarray::Array1;

use crate::data::{LabelMatrix, Marginals};

/// 1.0 when the signed vote sum is positive, else 0.0. Ties go negative.
pub fn majority_row(votes: impl IntoIterator<Item = i8>) -> f64 {
    let net: i32 = votes.into_iter().map(i32::from).sum();
    if net <= 0 {
        0.0
    } else {
        1.0
    }
}

/// `(net + num) / (2 num)` over the row's votes; 0.5 for an all-abstain row.
pub fn soft_majority_row(votes: impl IntoIterator<Item = i8>) -> f64 {
    let (net, num) = votes
        .into_iter()
        .fold((0i32, 0i32), |(net, num), v| (net + i32::from(v), num + i32::from(v).abs()));
    if num == 0 {
        0.5
    } else {
        f64::from(net + num) / (2.0 * f64::from(num))
    }
}

pub fn majority_vote(matrix: &LabelMatrix) -> Marginals {
    apply_rows(matrix, |votes| majority_row(votes))
}

pub fn soft_majority_vote(matrix: &LabelMatrix) -> Marginals {
    apply_rows(matrix, |votes| soft_majority_row(votes))
}

fn apply_rows<F: Fn(Vec<i8>) -> f64>(matrix: &LabelMatrix, f: F) -> Marginals {
    Array1::from_iter((0..matrix.n_rows()).map(|row| {
        f(matrix.row_votes(row).map(|(_, vote)| vote).collect())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_resolve_negative() {
        let matrix = LabelMatrix::from_rows(&[vec![1, 1], vec![-1, -1], vec![1, -1], vec![0, 0]])
            .unwrap();
        assert_eq!(majority_vote(&matrix).to_vec(), vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn soft_vote_is_fraction_of_positive_votes() {
        let matrix =
            LabelMatrix::from_rows(&[vec![1, 1, -1], vec![0, 0, 0], vec![-1, 0, 0]]).unwrap();
        let marginals = soft_majority_vote(&matrix);
        assert!((marginals[0] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(marginals[1], 0.5);
        assert_eq!(marginals[2], 0.0);
    }
}
