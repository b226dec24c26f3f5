//! Command-line interface wiring for weaksup.

use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::{
    config::{Project, Settings},
    pipeline::Stage,
};

pub mod config;
pub mod run;

/// Top-level CLI definition.
#[derive(Debug, Parser)]
#[command(author, version, about = "Weak-supervision training orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Parse CLI arguments from the environment.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Dispatch the selected sub-command.
    pub async fn dispatch(self, settings: Settings) -> Result<()> {
        match self.command {
            Commands::Run(args) => run::run(args, settings).await,
            Commands::Config(args) => config::run(args, settings).await,
        }
    }
}

/// Supported sub-commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the pipeline stages in [start_at, end_at).
    Run(RunArgs),
    /// Print the fully resolved run configuration as JSON.
    Config(RunArgs),
}

/// Run parameters; every flag left out defers to the lower configuration layers.
#[derive(Debug, Clone, ClapArgs)]
pub struct RunArgs {
    /// Project whose local domain configs are used.
    #[arg(long, value_enum, default_value = "babble")]
    pub project: Project,
    #[arg(long)]
    pub domain: String,
    /// First stage to run, as a rank (0-7) or a name such as `supervise`.
    #[arg(long, value_parser = parse_stage_bound)]
    pub start_at: Option<usize>,
    /// Stage to stop before, as a rank (1-8) or a name.
    #[arg(long, value_parser = parse_stage_bound)]
    pub end_at: Option<usize>,
    /// Shrink document caps, search spaces and epochs for a quick run.
    #[arg(long)]
    pub debug: bool,
    #[arg(long)]
    pub verbose: bool,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub parallelism: Option<usize>,
    #[arg(long)]
    pub max_docs: Option<usize>,
    /// One of traditional, majority, soft_majority, generative, dp, jt.
    #[arg(long)]
    pub supervision: Option<String>,
    #[arg(long)]
    pub max_train: Option<usize>,
    #[arg(long)]
    pub max_dev: Option<usize>,
    #[arg(long)]
    pub learn_deps: bool,
    /// Fixed dependency threshold; skips the threshold sweep.
    #[arg(long)]
    pub deps_thresh: Option<f64>,
    #[arg(long)]
    pub gen_f_beta: Option<f64>,
    #[arg(long)]
    pub tune_b: Option<bool>,
    #[arg(long)]
    pub gen_model_search_space: Option<usize>,
    #[arg(long)]
    pub disc_model_class: Option<String>,
    #[arg(long)]
    pub disc_model_search_space: Option<usize>,
    #[arg(long)]
    pub apply_filters: Option<bool>,
    #[arg(long)]
    pub gold_explanations: Option<bool>,
    #[arg(long)]
    pub lf_source: Option<String>,
    #[arg(long)]
    pub max_explanations: Option<usize>,
    #[arg(long)]
    pub reports_dir: Option<PathBuf>,
    /// Extra override, repeatable: `--set gen_params_default:epochs=100`.
    /// The value is parsed as JSON and kept as a string when that fails.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub set: Vec<(String, Value)>,
}

impl RunArgs {
    /// Flat override map; grouped keys are expanded during resolution.
    pub fn overrides(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                map.insert(key.to_string(), value);
            }
        };
        put("project", Some(Value::from(self.project.as_str())));
        put("domain", Some(Value::from(self.domain.as_str())));
        put("start_at", self.start_at.map(Value::from));
        put("end_at", self.end_at.map(Value::from));
        put("debug", self.debug.then_some(Value::Bool(true)));
        put("verbose", self.verbose.then_some(Value::Bool(true)));
        put("seed", self.seed.map(Value::from));
        put("parallelism", self.parallelism.map(Value::from));
        put("max_docs", self.max_docs.map(Value::from));
        put("supervision", self.supervision.clone().map(Value::from));
        put("max_train", self.max_train.map(Value::from));
        put("max_dev", self.max_dev.map(Value::from));
        put("learn_deps", self.learn_deps.then_some(Value::Bool(true)));
        put("deps_thresh", self.deps_thresh.map(Value::from));
        put("gen_f_beta", self.gen_f_beta.map(Value::from));
        put("tune_b", self.tune_b.map(Value::from));
        put("gen_model_search_space", self.gen_model_search_space.map(Value::from));
        put("disc_model_class", self.disc_model_class.clone().map(Value::from));
        put("disc_model_search_space", self.disc_model_search_space.map(Value::from));
        put("apply_filters", self.apply_filters.map(Value::from));
        put("gold_explanations", self.gold_explanations.map(Value::from));
        put("lf_source", self.lf_source.clone().map(Value::from));
        put("max_explanations", self.max_explanations.map(Value::from));
        put(
            "reports_dir",
            self.reports_dir
                .as_ref()
                .map(|dir| Value::from(dir.display().to_string())),
        );
        for (key, value) in &self.set {
            map.insert(key.clone(), value.clone());
        }
        map
    }
}

/// A stage rank, `8` for "through classify", or a stage name.
fn parse_stage_bound(s: &str) -> std::result::Result<usize, String> {
    if s == Stage::COUNT.to_string() {
        return Ok(Stage::COUNT);
    }
    s.parse::<Stage>()
        .map(Stage::rank)
        .map_err(|e| e.to_string())
}

fn parse_assignment(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stage_bounds_accept_names_and_ranks() {
        assert_eq!(parse_stage_bound("supervise"), Ok(6));
        assert_eq!(parse_stage_bound("8"), Ok(8));
        assert_eq!(parse_stage_bound("0"), Ok(0));
        assert!(parse_stage_bound("9").is_err());
    }

    #[test]
    fn assignments_parse_json_values() {
        assert_eq!(
            parse_assignment("gen_params_default:epochs=100"),
            Ok(("gen_params_default:epochs".to_string(), json!(100)))
        );
        assert_eq!(parse_assignment("lf_source=gold"), Ok(("lf_source".into(), json!("gold"))));
        assert!(parse_assignment("novalue").is_err());
    }

    #[test]
    fn unset_flags_are_left_out() {
        let cli = Cli::try_parse_from([
            "weaksup", "run", "--domain", "spouse", "--start-at", "6", "--end-at", "8",
            "--set", "max_train=50",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let overrides = args.overrides();
        assert_eq!(overrides["domain"], json!("spouse"));
        assert_eq!(overrides["start_at"], json!(6));
        assert_eq!(overrides["max_train"], json!(50));
        assert!(!overrides.contains_key("debug"));
        assert!(!overrides.contains_key("supervision"));
    }
}
