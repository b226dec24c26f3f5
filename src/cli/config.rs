//! CLI entry-point for printing the resolved configuration.

use anyhow::Result;
use serde_json::Value;
use tracing::instrument;

use crate::{
    cli::RunArgs,
    config::{self, PipelineConfig, Settings},
};

#[instrument(skip_all, fields(domain = %args.domain))]
pub async fn run(args: RunArgs, settings: Settings) -> Result<()> {
    let resolved = config::resolve(&settings, args.overrides())?;
    // fail on the same errors a run would
    PipelineConfig::from_map(resolved.clone())?;
    println!("{}", serde_json::to_string_pretty(&Value::Object(resolved))?);
    Ok(())
}
