//! Dependency structure between labeling functions.
//!
//! The selector sweeps detection thresholds 0.02, 0.04, ... and picks the
//! elbow of the dependency-count curve: the interior point with the largest
//! discrete second difference `count[i+1] + count[i-1] - 2 count[i]`.

use std::{collections::BTreeSet, fmt};

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    data::LabelMatrix,
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyType {
    Similar,
    Fixing,
    Reinforcing,
    Exclusive,
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Similar => "DEP_SIMILAR",
            Self::Fixing => "DEP_FIXING",
            Self::Reinforcing => "DEP_REINFORCING",
            Self::Exclusive => "DEP_EXCLUSIVE",
        };
        f.write_str(name)
    }
}

/// `(lf1, lf2, kind)` with `lf1 < lf2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency(pub usize, pub usize, pub DependencyType);

impl Dependency {
    /// Normalises the pair so the smaller LF index comes first.
    pub fn new(a: usize, b: usize, kind: DependencyType) -> Self {
        Self(a.min(b), a.max(b), kind)
    }
}

pub type DependencySet = BTreeSet<Dependency>;

/// Finds LF pairs whose correlation statistic clears `threshold`.
///
/// Raising the threshold may only remove dependencies, never add them.
pub trait CorrelationDetector {
    fn detect(&self, matrix: &LabelMatrix, threshold: f64) -> Result<DependencySet>;
}

impl<D: CorrelationDetector + ?Sized> CorrelationDetector for &D {
    fn detect(&self, matrix: &LabelMatrix, threshold: f64) -> Result<DependencySet> {
        (**self).detect(matrix, threshold)
    }
}

/// Pearson correlation of LF columns (abstain counted as 0).
///
/// Pairs above `threshold` are SIMILAR; pairs below `-threshold` are FIXING.
#[derive(Debug, Clone, Copy, Default)]
pub struct PearsonDetector;

impl CorrelationDetector for PearsonDetector {
    fn detect(&self, matrix: &LabelMatrix, threshold: f64) -> Result<DependencySet> {
        let dense = matrix.to_dense().mapv(f64::from);
        let mut deps = DependencySet::new();
        for a in 0..dense.ncols() {
            for b in (a + 1)..dense.ncols() {
                let Some(r) = pearson(dense.column(a), dense.column(b)) else {
                    continue;
                };
                if r > threshold {
                    deps.insert(Dependency::new(a, b, DependencyType::Similar));
                } else if r < -threshold {
                    deps.insert(Dependency::new(a, b, DependencyType::Fixing));
                }
            }
        }
        Ok(deps)
    }
}

fn pearson(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> Option<f64> {
    let n = x.len() as f64;
    if n < 2.0 {
        return None;
    }
    let (mx, my) = (x.sum() / n, y.sum() / n);
    let dx: Array1<f64> = x.mapv(|v| v - mx);
    let dy: Array1<f64> = y.mapv(|v| v - my);
    let denom = (dx.dot(&dx) * dy.dot(&dy)).sqrt();
    if denom <= f64::EPSILON {
        None
    } else {
        Some(dx.dot(&dy) / denom)
    }
}

/// Result of a threshold sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome {
    /// Thresholds evaluated, in order, up to and including the first empty result.
    pub thresholds: Vec<f64>,
    pub counts: Vec<usize>,
    /// Index into `thresholds` of the selected elbow.
    pub selected: usize,
    pub dependencies: DependencySet,
}

impl SweepOutcome {
    pub fn threshold(&self) -> f64 {
        self.thresholds[self.selected]
    }
}

pub const SWEEP_START: f64 = 0.02;
pub const SWEEP_STEP: f64 = 0.02;
pub const DEFAULT_SWEEP_STEPS: usize = 25;

/// Threshold-sweeping dependency selector over a pluggable detector.
#[derive(Debug, Clone)]
pub struct DependencySelector<D> {
    detector: D,
    steps: usize,
}

impl<D: CorrelationDetector> DependencySelector<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            steps: DEFAULT_SWEEP_STEPS,
        }
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    /// Dependencies at an explicitly configured threshold; no sweep.
    pub fn select_at(&self, matrix: &LabelMatrix, threshold: f64) -> Result<DependencySet> {
        let deps = self.detector.detect(matrix, threshold)?;
        info!(threshold, count = deps.len(), "selected dependencies");
        Ok(deps)
    }

    /// Sweep thresholds and keep the dependency set at maximum curvature.
    ///
    /// Fails when fewer than three thresholds were evaluated, since no interior
    /// point exists to pick from.
    pub fn sweep(&self, matrix: &LabelMatrix) -> Result<SweepOutcome> {
        let mut thresholds = Vec::new();
        let mut sets: Vec<DependencySet> = Vec::new();
        for step in 0..self.steps {
            let threshold = SWEEP_START + SWEEP_STEP * step as f64;
            let deps = self.detector.detect(matrix, threshold)?;
            debug!(threshold, count = deps.len(), "dependency sweep");
            let empty = deps.is_empty();
            thresholds.push(threshold);
            sets.push(deps);
            if empty {
                break;
            }
        }

        let counts: Vec<usize> = sets.iter().map(BTreeSet::len).collect();
        let selected = max_curvature(&counts).ok_or_else(|| {
            Error::precondition(
                "dependency sweep",
                format!(
                    "only {} threshold(s) evaluated (counts {counts:?}); set deps_thresh explicitly",
                    counts.len()
                ),
            )
        })?;
        let dependencies = sets.swap_remove(selected);
        info!(
            threshold = thresholds[selected],
            count = dependencies.len(),
            "selected dependency threshold"
        );
        Ok(SweepOutcome {
            thresholds,
            counts,
            selected,
            dependencies,
        })
    }
}

/// Interior index with the largest second difference; first wins ties.
pub fn max_curvature(counts: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for i in 1..counts.len().saturating_sub(1) {
        let curvature = counts[i + 1] as i64 + counts[i - 1] as i64 - 2 * counts[i] as i64;
        if best.map_or(true, |(_, c)| curvature > c) {
            best = Some((i, curvature));
        }
    }
    best.map(|(i, _)| i)
}
