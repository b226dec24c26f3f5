//! CLI entry-point for executing a pipeline run.

use anyhow::Result;
use tracing::{info, instrument};

use crate::{
    cli::RunArgs,
    config::{self, PipelineConfig, Settings},
    data::ParquetStore,
    pipeline::{Pipeline, StoreAdapter},
};

#[instrument(skip_all, fields(domain = %args.domain))]
pub async fn run(args: RunArgs, settings: Settings) -> Result<()> {
    let resolved = config::resolve(&settings, args.overrides())?;
    let config = PipelineConfig::from_map(resolved)?;
    let store = ParquetStore::open(settings.data_dir.join(&config.domain))?;

    // stages are synchronous and CPU bound
    let summary = tokio::task::spawn_blocking(move || {
        let mut pipeline = Pipeline::new(config, store, StoreAdapter);
        pipeline.run()
    })
    .await??;

    info!(
        stages = summary.stages.len(),
        gen = ?summary.scores.gen.map(|s| s.f1),
        disc = ?summary.scores.disc.map(|s| s.f1),
        "run complete"
    );
    Ok(())
}
