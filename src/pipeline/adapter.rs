//! Domain-specific stage implementations.

use crate::{
    config::{DiscModelClass, PipelineConfig},
    data::LabelStore,
    error::{Error, Result},
};

/// What a stage implementation may read and write.
pub struct StageContext<'a> {
    pub config: &'a PipelineConfig,
    pub store: &'a mut dyn LabelStore,
}

/// Per-domain stage implementations handed to the pipeline at construction.
///
/// `load_gold` and `collect` have no generic form and must be provided. The
/// remaining stages default to checking that the store already holds what the
/// stage would have produced.
pub trait DomainAdapter {
    fn load_gold(&mut self, ctx: &mut StageContext<'_>) -> Result<()>;

    fn collect(&mut self, ctx: &mut StageContext<'_>) -> Result<()>;

    fn parse(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        verbose!(
            ctx.config.verbose,
            max_docs = ?ctx.config.max_docs,
            parallelism = ?ctx.config.parallelism,
            "no document parser for this domain; documents are read from the store"
        );
        Ok(())
    }

    fn extract(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        verbose!(
            ctx.config.verbose,
            candidate = ?ctx.config.candidate_name,
            "no candidate extractor for this domain; candidates are read from the store"
        );
        Ok(())
    }

    fn featurize(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        if ctx.config.disc_model_class == DiscModelClass::Lstm {
            tracing::info!("disc_model_class is lstm; skipping featurize");
            return Ok(());
        }
        for &split in &ctx.config.splits {
            let features = ctx.store.load_feature_matrix(split)?;
            verbose!(
                ctx.config.verbose,
                %split,
                rows = features.n_rows(),
                features = features.n_features(),
                nnz = features.nnz(),
                "featurized split"
            );
        }
        Ok(())
    }

    fn label(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        for &split in &ctx.config.splits {
            let labels = ctx.store.load_label_matrix(split)?;
            verbose!(
                ctx.config.verbose,
                %split,
                rows = labels.n_rows(),
                lfs = labels.n_lfs(),
                nnz = labels.nnz(),
                "labeled split"
            );
        }
        Ok(())
    }
}

/// Adapter for runs with no domain integration; its required stages fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDomain;

impl DomainAdapter for NoDomain {
    fn load_gold(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        Err(Error::NotImplemented(format!(
            "load_gold for domain '{}'",
            ctx.config.domain
        )))
    }

    fn collect(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        Err(Error::NotImplemented(format!(
            "collect for domain '{}'",
            ctx.config.domain
        )))
    }
}

/// Adapter for data prepared ahead of time in a label store.
///
/// Gold labels are checked rather than loaded; explanation collection is not
/// available without a domain integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreAdapter;

impl DomainAdapter for StoreAdapter {
    fn load_gold(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        for &split in &ctx.config.splits {
            let gold = ctx.store.load_gold_labels(split)?;
            verbose!(
                ctx.config.verbose,
                %split,
                candidates = gold.len(),
                labeled = gold.labeled_count(),
                positive_fraction = gold.positive_fraction(),
                "gold labels present"
            );
        }
        Ok(())
    }

    fn collect(&mut self, ctx: &mut StageContext<'_>) -> Result<()> {
        Err(Error::NotImplemented(format!(
            "collect for domain '{}': explanations cannot be collected from a label store",
            ctx.config.domain
        )))
    }
}
