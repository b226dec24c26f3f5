//! Accuracy-weighted label model shared by the generative and categorical aggregators.

/// One candidate's non-abstain votes as `(lf, voted_positive)`.
pub(crate) type VoteRow = Vec<(usize, bool)>;

const INITIAL_ACCURACY: f64 = 0.7;
const ACCURACY_BOUNDS: (f64, f64) = (0.01, 0.99);

#[derive(Debug, Clone)]
pub(crate) struct FitOptions {
    pub epochs: usize,
    pub step_size: f64,
    pub reg_param: f64,
    pub class_prior: bool,
    /// Per-LF multiplier on the vote weight; LFs sharing a correlated pair are damped.
    pub weight_scale: Vec<f64>,
}

/// Per-LF accuracies fitted by damped re-estimation against the model's own marginals.
#[derive(Debug, Clone, serde::Serialize)]
pub(crate) struct AccuracyModel {
    accuracies: Vec<f64>,
    weight_scale: Vec<f64>,
    prior_logit: f64,
    reg_param: f64,
}

impl AccuracyModel {
    pub fn fit(rows: &[VoteRow], n_lfs: usize, opts: &FitOptions) -> Self {
        let mut weight_scale = opts.weight_scale.clone();
        weight_scale.resize(n_lfs, 1.0);
        let mut model = Self {
            accuracies: vec![INITIAL_ACCURACY; n_lfs],
            weight_scale,
            prior_logit: 0.0,
            reg_param: opts.reg_param.max(0.0),
        };
        let step = opts.step_size.clamp(0.0, 1.0);

        for epoch in 0..opts.epochs {
            let marginals: Vec<f64> = rows.iter().map(|row| model.predict(row)).collect();
            let mut agree = vec![0.0; n_lfs];
            let mut count = vec![0usize; n_lfs];
            for (row, &mu) in rows.iter().zip(&marginals) {
                for &(lf, positive) in row {
                    if lf < n_lfs {
                        agree[lf] += if positive { mu } else { 1.0 - mu };
                        count[lf] += 1;
                    }
                }
            }
            for lf in 0..n_lfs {
                if count[lf] == 0 {
                    continue;
                }
                let target = agree[lf] / count[lf] as f64;
                // one damped step per vote cast
                let eta = 1.0 - (1.0 - step).powi(count[lf].min(i32::MAX as usize) as i32);
                let updated = model.accuracies[lf] + eta * (target - model.accuracies[lf]);
                model.accuracies[lf] = updated.clamp(ACCURACY_BOUNDS.0, ACCURACY_BOUNDS.1);
            }
            if opts.class_prior && !marginals.is_empty() {
                let mean = marginals.iter().sum::<f64>() / marginals.len() as f64;
                model.prior_logit = logit(mean.clamp(ACCURACY_BOUNDS.0, ACCURACY_BOUNDS.1));
            }
            tracing::trace!(epoch, accuracies = ?model.accuracies, "label model epoch");
        }
        model
    }

    pub fn predict(&self, row: &VoteRow) -> f64 {
        let z = row
            .iter()
            .filter(|(lf, _)| *lf < self.accuracies.len())
            .map(|&(lf, positive)| {
                let w = self.weight_scale[lf] * logit(self.accuracies[lf]) / (1.0 + self.reg_param);
                if positive {
                    w
                } else {
                    -w
                }
            })
            .sum::<f64>()
            + self.prior_logit;
        sigmoid(z)
    }

    pub fn accuracies(&self) -> &[f64] {
        &self.accuracies
    }
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(epochs: usize) -> FitOptions {
        FitOptions {
            epochs,
            step_size: 0.05,
            reg_param: 0.0,
            class_prior: false,
            weight_scale: Vec::new(),
        }
    }

    #[test]
    fn abstain_row_is_uncertain_without_prior() {
        let model = AccuracyModel::fit(&[vec![(0, true)]], 1, &opts(0));
        assert_eq!(model.predict(&Vec::new()), 0.5);
    }

    #[test]
    fn dissenting_lf_loses_accuracy() {
        // lf0 and lf1 always agree; lf2 always disagrees with them
        let rows: Vec<VoteRow> = (0..40)
            .map(|i| {
                let y = i % 2 == 0;
                vec![(0, y), (1, y), (2, !y)]
            })
            .collect();
        let model = AccuracyModel::fit(&rows, 3, &opts(30));
        let acc = model.accuracies();
        assert!(acc[0] > acc[2]);
        assert!(acc[1] > acc[2]);
        assert!(model.predict(&rows[0]) > 0.5);
        assert!(model.predict(&rows[1]) < 0.5);
    }
}
