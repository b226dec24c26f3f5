//! Stage pipeline runner.
//!
//! Runs the stages whose rank falls in `[start_at, end_at)` in order. The first
//! failing stage aborts the run; its error carries the stage and the time spent.

/// Log at `info` when the run is verbose, otherwise at `debug`.
macro_rules! verbose {
    ($on:expr, $($arg:tt)+) => {
        if $on {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

mod adapter;
mod report;
mod stage;

use std::time::{Duration, Instant};

use rand::{rngs::StdRng, SeedableRng};
use tracing::{info, info_span, instrument, warn};

use crate::{
    config::{DiscModelClass, PipelineConfig, Supervision},
    data::{
        sample_rows, CandidateId, FeatureMatrix, GoldLabels, LabelMatrix, LabelStore, Marginals,
        Split,
    },
    error::{Error, Result},
    learning::{score_marginals, train_model, LogisticClassifier, SearchRequest, TrainableModel},
    supervision::{aggregate, SupervisionInputs},
};

pub use adapter::{DomainAdapter, NoDomain, StageContext, StoreAdapter};
pub use report::{final_report, Scores};
pub use stage::Stage;

/// What a finished run hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Executed stages with their wall time.
    pub stages: Vec<(Stage, Duration)>,
    pub scores: Scores,
    /// Marginals produced by `supervise`, when it ran and aggregated.
    pub train_marginals: Option<Marginals>,
    /// Rows `classify` trained and evaluated on, when it ran.
    pub classify_rows: Option<ClassifyRows>,
}

/// Candidate ids of the matrices handed to the discriminative model.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyRows {
    pub train: Vec<CandidateId>,
    /// Empty when dev is not among the configured splits.
    pub dev: Vec<CandidateId>,
}

/// Intermediate results shared by later stages of the same run.
#[derive(Debug, Default)]
struct RunState {
    /// Train rows kept by `max_train`, in sample order.
    selected_train: Option<Vec<usize>>,
    train_marginals: Option<Marginals>,
    classify_rows: Option<ClassifyRows>,
    scores: Scores,
}

/// One run over a store, driven by an immutable effective configuration.
pub struct Pipeline<S, A> {
    config: PipelineConfig,
    store: S,
    adapter: A,
    rng: StdRng,
    state: RunState,
}

impl<S: LabelStore, A: DomainAdapter> Pipeline<S, A> {
    /// Build a pipeline. The debug transform is applied here, before any stage runs.
    pub fn new(config: PipelineConfig, store: S, adapter: A) -> Self {
        let config = config.effective();
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            store,
            adapter,
            rng,
            state: RunState::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Execute every stage in the configured range.
    pub fn run(&mut self) -> Result<RunSummary> {
        let (start_at, end_at) = self.config.stage_range()?;
        info!(
            domain = %self.config.domain,
            supervision = self.config.supervision.name(),
            start_at,
            end_at,
            seed = self.config.seed,
            "starting run"
        );

        let mut stages = Vec::new();
        for stage in Stage::in_range(start_at, end_at) {
            let span = info_span!("stage", name = stage.name(), rank = stage.rank());
            let _guard = span.enter();
            let started = Instant::now();
            info!("[{}] {}...", stage.rank(), stage);
            if let Err(source) = self.run_stage(stage, end_at) {
                let elapsed = started.elapsed();
                tracing::error!(?elapsed, error = %source, "stage failed");
                return Err(Error::Stage {
                    stage,
                    elapsed,
                    source: Box::new(source),
                });
            }
            let elapsed = started.elapsed();
            info!(?elapsed, "[{}] {} done", stage.rank(), stage);
            stages.push((stage, elapsed));
        }

        Ok(RunSummary {
            stages,
            scores: self.state.scores.clone(),
            train_marginals: self.state.train_marginals.clone(),
            classify_rows: self.state.classify_rows.clone(),
        })
    }

    fn run_stage(&mut self, stage: Stage, end_at: usize) -> Result<()> {
        let mut ctx = StageContext {
            config: &self.config,
            store: &mut self.store,
        };
        match stage {
            Stage::Parse => self.adapter.parse(&mut ctx),
            Stage::Extract => self.adapter.extract(&mut ctx),
            Stage::LoadGold => self.adapter.load_gold(&mut ctx),
            Stage::Featurize => self.adapter.featurize(&mut ctx),
            Stage::Collect => self.adapter.collect(&mut ctx),
            Stage::Label => self.adapter.label(&mut ctx),
            Stage::Supervise => self.supervise(end_at),
            Stage::Classify => self.classify(),
        }
    }

    /// Label matrix and gold labels of `split`, both required to be non-empty.
    fn labeled_split(&self, split: Split) -> Result<(LabelMatrix, GoldLabels)> {
        let matrix = self.store.load_label_matrix(split)?;
        if matrix.nnz() == 0 {
            return Err(Error::precondition(
                "supervise",
                format!("label matrix for split {split} has no votes"),
            ));
        }
        let gold = self.store.load_gold_labels(split)?;
        if gold.labeled_count() == 0 {
            return Err(Error::precondition(
                "supervise",
                format!("gold labels for split {split} are all zero"),
            ));
        }
        verbose!(
            self.config.verbose,
            %split,
            rows = matrix.n_rows(),
            lfs = matrix.n_lfs(),
            nnz = matrix.nnz(),
            positive_fraction = gold.positive_fraction(),
            "loaded split"
        );
        Ok((matrix, gold))
    }

    #[instrument(skip_all)]
    fn supervise(&mut self, end_at: usize) -> Result<()> {
        if self.config.supervision.skips_aggregation() {
            info!(
                supervision = self.config.supervision.name(),
                "supervision mode does not aggregate; skipping supervise"
            );
            return Ok(());
        }

        let full = self.store.load_label_matrix(Split::Train)?;
        if full.nnz() == 0 {
            return Err(Error::precondition("supervise", "train label matrix has no votes"));
        }
        let l_train = match self.config.max_train {
            Some(max) if max < full.n_rows() => {
                info!(max_train = max, rows = full.n_rows(), "trimming train label matrix");
                let rows = sample_rows(&mut self.rng, full.n_rows(), max)?;
                let trimmed = full.select_rows(&rows);
                self.state.selected_train = Some(rows);
                trimmed
            }
            Some(max) => {
                warn!(max_train = max, rows = full.n_rows(), "max_train covers every train row");
                full
            }
            None => full,
        };
        if self.config.verbose {
            if let Ok(gold) = self.store.load_gold_labels(Split::Train) {
                info!(
                    labeled = gold.labeled_count(),
                    positive_fraction = gold.positive_fraction(),
                    "train gold labels (approximate under max_train)"
                );
            }
        }

        let mut dev = if self.config.uses_split(Split::Dev) {
            Some(self.labeled_split(Split::Dev)?)
        } else {
            None
        };
        let test = if self.config.uses_split(Split::Test) {
            Some(self.labeled_split(Split::Test)?)
        } else {
            None
        };
        let generative = matches!(self.config.supervision, Supervision::Generative { .. });
        if let (true, Some(max_dev)) = (generative, self.config.max_dev) {
            if let Some((l_dev, gold)) = dev.take() {
                info!(max_dev, "restricting dev");
                let rows = sample_rows(&mut self.rng, l_dev.n_rows(), max_dev)?;
                dev = Some((l_dev.select_rows(&rows), gold.select_rows(&rows)));
            }
        }

        let lf_names = self.store.lf_names();
        let inputs = SupervisionInputs {
            train: &l_train,
            dev: dev.as_ref().map(|(l, g)| (l, g)),
            test: test.as_ref().map(|(l, g)| (l, g)),
            lf_names: &lf_names,
        };
        let Some(aggregation) = aggregate(&self.config, inputs, &mut self.rng)? else {
            return Ok(());
        };

        self.store
            .save_marginals(Split::Train, &l_train, &aggregation.marginals)?;
        info!(rows = aggregation.marginals.len(), "saved train marginals");

        if matches!(
            self.config.supervision,
            Supervision::Generative { .. } | Supervision::CategoricalDp
        ) {
            self.state.scores.gen = aggregation.test_score.or(aggregation.dev_score);
        }
        self.state.train_marginals = Some(aggregation.marginals);

        if end_at == Stage::Classify.rank() {
            final_report(&self.config, &self.state.scores)?;
        }
        Ok(())
    }

    /// Training features and labels for `traditional` supervision.
    fn traditional_training_set(&mut self, split: Split) -> Result<(FeatureMatrix, Marginals)> {
        if split != Split::Train {
            warn!(%split, "traditional supervision on a non-train split; evaluation is not fair");
        }
        let x = self.store.load_feature_matrix(split)?;
        let gold = self.store.load_gold_labels(split)?;
        if x.n_rows() != gold.len() {
            return Err(Error::precondition(
                "classify",
                format!(
                    "split {split} has {} feature rows but {} gold labels",
                    x.n_rows(),
                    gold.len()
                ),
            ));
        }
        let total = gold.len();
        let size = match self.config.max_train {
            None => total,
            Some(max) if max > total => {
                warn!(requested = max, available = total, "fewer gold labels than max_train");
                total
            }
            Some(max) => max,
        };
        info!(size, "using traditional gold labels");
        if size == total {
            return Ok((x, gold.to_targets()));
        }
        let mut rows = sample_rows(&mut self.rng, total, size)?;
        rows.sort_unstable();
        Ok((x.select_rows(&rows), gold.select_rows(&rows).to_targets()))
    }

    /// Training features and the aggregated labels for the other modes.
    fn aggregated_training_set(&mut self) -> Result<(FeatureMatrix, Marginals)> {
        let mut x = self.store.load_feature_matrix(Split::Train)?;
        if let Some(rows) = &self.state.selected_train {
            x = x.select_rows(rows);
        }
        let y = match &self.state.train_marginals {
            Some(marginals) => marginals.clone(),
            None => self.store.load_marginals(Split::Train)?,
        };
        if x.n_rows() != y.len() {
            return Err(Error::precondition(
                "classify",
                format!(
                    "{} train feature rows but {} marginals; \
                     run supervise in the same run when max_train is set",
                    x.n_rows(),
                    y.len()
                ),
            ));
        }
        Ok((x, y))
    }

    fn eval_split(&self, split: Split) -> Result<(FeatureMatrix, GoldLabels)> {
        let x = self.store.load_feature_matrix(split)?;
        let gold = self.store.load_gold_labels(split)?;
        if x.n_rows() != gold.len() {
            return Err(Error::precondition(
                "classify",
                format!(
                    "split {split} has {} feature rows but {} gold labels",
                    x.n_rows(),
                    gold.len()
                ),
            ));
        }
        Ok((x, gold))
    }

    #[instrument(skip_all)]
    fn classify(&mut self) -> Result<()> {
        self.rng = StdRng::seed_from_u64(self.config.seed);

        if self.config.disc_model_class == DiscModelClass::Lstm {
            return Err(Error::NotImplemented(
                "disc_model_class 'lstm' has no discriminative model".into(),
            ));
        }
        let (x_train, y_train) = match self.config.supervision {
            Supervision::JointTraining => {
                return Err(Error::NotImplemented(
                    "classify with 'jt' supervision and a logreg model".into(),
                ))
            }
            Supervision::Traditional { split } => self.traditional_training_set(split)?,
            _ => self.aggregated_training_set()?,
        };
        verbose!(
            self.config.verbose,
            rows = x_train.n_rows(),
            features = x_train.n_features(),
            "training set"
        );

        let mut dev = if self.config.uses_split(Split::Dev) {
            Some(self.eval_split(Split::Dev)?)
        } else {
            None
        };
        if let Some(max_dev) = self.config.max_dev {
            if let Some((x_dev, y_dev)) = dev.take() {
                info!(max_dev, "restricting dev");
                let rows = sample_rows(&mut self.rng, x_dev.n_rows(), max_dev)?;
                dev = Some((x_dev.select_rows(&rows), y_dev.select_rows(&rows)));
            }
        }

        self.state.classify_rows = Some(ClassifyRows {
            train: x_train.candidates().to_vec(),
            dev: dev
                .as_ref()
                .map(|(x, _)| x.candidates().to_vec())
                .unwrap_or_default(),
        });

        let spec = self.config.disc_search_spec();
        let checkpoints = self.config.checkpoint_dir();
        let model_name = format!("discriminative_{}", self.config.domain);
        let trained = train_model::<LogisticClassifier>(SearchRequest {
            train_x: &x_train,
            train_y: Some(&y_train),
            dev: dev.as_ref().map(|(x, y)| (x, y)),
            spec: &spec,
            init_params: &self.config.disc_init_params,
            rng: &mut self.rng,
            parallelism: self.config.parallelism,
            beta: None,
            tune_b: self.config.tune_b.unwrap_or(false),
            eval_batch_size: self.config.disc_eval_batch_size,
            model_name: &model_name,
            save_dir: checkpoints.as_deref(),
        })?;

        let batch = self.config.disc_eval_batch_size;
        if let Some((x_dev, y_dev)) = &dev {
            let marginals = trained.model.marginals(x_dev, batch)?;
            let score = score_marginals(&marginals, y_dev, trained.threshold)?;
            info!(
                precision = score.precision,
                recall = score.recall,
                f1 = score.f1,
                "disc on dev set"
            );
            self.state.scores.disc = Some(score);
        }
        if self.config.uses_split(Split::Test) {
            let (x_test, y_test) = self.eval_split(Split::Test)?;
            let marginals = trained.model.marginals(&x_test, batch)?;
            let score = score_marginals(&marginals, &y_test, trained.threshold)?;
            info!(
                precision = score.precision,
                recall = score.recall,
                f1 = score.f1,
                "disc on test set"
            );
            self.state.scores.disc = Some(score);
            info!("final performance on TEST");
        } else {
            info!("final performance on DEV");
        }

        final_report(&self.config, &self.state.scores)?;
        Ok(())
    }
}
