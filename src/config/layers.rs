//! The four configuration layers and their resolution order.
//!
//! Precedence, lowest first: global defaults, the domain's local config file,
//! the experiment rule table, explicit run overrides.

use std::{fmt, str::FromStr};

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::{
    config::{merge, Settings},
    error::{Error, Result},
};

static GLOBAL_DEFAULTS: Lazy<Value> = Lazy::new(|| {
    json!({
        "domain": null,
        "project": "babble",

        // control flow
        "start_at": null,
        "end_at": null,
        "debug": false,
        "verbose": false,
        "codalab": false,
        "seed": null,
        "parallelism": 1,

        // scaling
        "max_docs": null,
        "splits": [0, 1, 2],

        // babble
        "lf_source": null,
        "max_explanations": null,
        "gold_explanations": null,
        "apply_filters": null,

        // supervise
        "supervision": "generative",
        "max_train": null,
        "max_dev": null,
        "train_fraction": null,
        "learn_deps": false,
        "deps_thresh": null,
        "deps_steps": 25,
        "gen_f_beta": 1.0,
        "tune_b": true,
        "traditional_split": 0,
        "gen_model_search_space": 10,
        "gen_init_params": {
            "lf_propensity": false,
            "class_prior": false,
            "seed": 123,
        },
        "gen_params_default": {
            "step_size": 0.01,
            "reg_param": 0.1,
            "epochs": 50,
        },
        "gen_params_range": {
            "step_size": [0.01, 0.001, 0.0001],
            "reg_param": [0.0, 0.01, 0.1, 0.25, 0.5],
            "epochs": [25, 50, 100],
        },

        // classify
        "disc_model_class": "logreg",
        "disc_model_search_space": 10,
        "disc_init_params": {
            "n_threads": 1,
            "seed": 123,
        },
        "disc_params_default": {
            "rebalance": 0,
            "lr": 0.01,
            "batch_size": 32,
            "l1_penalty": 0,
            "l2_penalty": 0.01,
            "n_epochs": 100,
        },
        "disc_params_range": {
            "l2_penalty": [0.0, 0.0001, 0.001, 0.01, 0.1, 1.0],
            "rebalance": [0, 0.25, 0.5],
            "n_epochs": [50, 100, 200],
        },
        "disc_eval_batch_size": null,

        // display
        "display_marginals": false,
        "reports_dir": null,
    })
});

/// Process-wide baseline configuration.
pub fn global_defaults() -> Map<String, Value> {
    match &*GLOBAL_DEFAULTS {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

/// Experiment projects that carry local domain configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Project {
    Babble,
    Qalf,
}

impl Project {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Babble => "babble",
            Self::Qalf => "qalf",
        }
    }
}

impl FromStr for Project {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "babble" => Ok(Self::Babble),
            "qalf" => Ok(Self::Qalf),
            other => Err(Error::UnknownProject(other.to_string())),
        }
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load the local config for `(project, domain)`; a missing file is fatal.
pub fn local_config(settings: &Settings, project: Project, domain: &str) -> Result<Map<String, Value>> {
    let path = settings.local_config_path(project, domain);
    if !path.exists() {
        return Err(Error::LocalConfigNotFound {
            domain: domain.to_string(),
            path: path.display().to_string(),
        });
    }
    let text = std::fs::read_to_string(&path)?;
    match serde_json::from_str(&text)? {
        Value::Object(map) => {
            debug!(path = %path.display(), keys = map.len(), "loaded local config");
            Ok(map)
        }
        other => Err(Error::Config(format!(
            "local config {} must be a JSON object, found {}",
            path.display(),
            type_name(&other)
        ))),
    }
}

/// Discriminative defaults keyed by domain, supervision mode, filter flag and
/// explanation source. Pure function of the run parameters.
pub fn experiment_config(
    domain: &str,
    supervision: Option<&str>,
    apply_filters: Option<bool>,
    gold_explanations: Option<bool>,
) -> Map<String, Value> {
    let filters = apply_filters.unwrap_or(false);
    let gold = gold_explanations.unwrap_or(false);
    // (lr, l2_penalty, rebalance, batch_size)
    let params = match (domain, supervision) {
        ("spouse", Some("dp")) if !filters => Some((0.001, 0.0, 0.25, 128)),
        ("spouse", Some("dp")) if gold => Some((0.001, 0.001, 0.0, 32)),
        ("spouse", Some("jt")) => Some((0.1, 0.0001, 0.5, 64)),
        ("cdr", Some("dp")) if !filters => Some((0.01, 10.0, 0.5, 128)),
        ("cdr", Some("dp")) if gold => Some((0.001, 10.0, 0.5, 64)),
        ("cdr", Some("traditional")) => Some((0.001, 1.0, 0.5, 32)),
        ("cdr", Some("jt")) if gold => Some((0.01, 0.01, 0.5, 64)),
        ("cdr", Some("jt")) => Some((0.01, 0.01, 0.4, 64)),
        _ => None,
    };
    let disc = match params {
        Some((lr, l2_penalty, rebalance, batch_size)) => json!({
            "lr": lr,
            "l2_penalty": l2_penalty,
            "rebalance": rebalance,
            "batch_size": batch_size,
        }),
        None => json!({}),
    };
    let mut out = Map::new();
    out.insert("disc_params_default".to_string(), disc);
    out
}

/// Merge all four layers for a run described by `overrides`.
///
/// Overrides may use grouped keys (`group:key`); they are expanded before
/// merging. `domain` is mandatory. A missing or zero `seed` is replaced with a
/// random one so the run stays reproducible from its logs.
pub fn resolve(settings: &Settings, overrides: Map<String, Value>) -> Result<Map<String, Value>> {
    let overrides = merge::expand_grouped_keys(overrides)?;
    let domain = overrides
        .get("domain")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Config("config must have non-None value for 'domain'".into()))?
        .to_string();
    let project = match overrides.get("project").and_then(Value::as_str) {
        Some(name) => name.parse()?,
        None => Project::Babble,
    };
    let supervision = overrides.get("supervision").and_then(Value::as_str);
    let experiment = experiment_config(
        &domain,
        supervision,
        overrides.get("apply_filters").and_then(Value::as_bool),
        overrides.get("gold_explanations").and_then(Value::as_bool),
    );

    let mut config = global_defaults();
    merge::merge_into(&mut config, &local_config(settings, project, &domain)?);
    merge::merge_into(&mut config, &experiment);
    merge::merge_into(&mut config, &overrides);

    if config.get("seed").map_or(true, |seed| seed.is_null() || seed.as_u64() == Some(0)) {
        let seed: u32 = rand::random::<u32>() % 999_999 + 1;
        info!(seed, "chose random seed");
        config.insert("seed".into(), json!(seed));
    }
    if config.get("reports_dir").map_or(true, Value::is_null) {
        config.insert(
            "reports_dir".into(),
            json!(settings.reports_dir.display().to_string()),
        );
    }
    Ok(config)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_domain(domain: &str, body: Value) -> (tempfile::TempDir, Settings) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_dirs(
            dir.path().to_path_buf(),
            dir.path().join("data"),
            dir.path().join("reports"),
        )
        .unwrap();
        let path = settings.local_config_path(Project::Babble, domain);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body.to_string()).unwrap();
        (dir, settings)
    }

    fn overrides(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn layers_apply_in_precedence_order() {
        let (_dir, settings) = settings_with_domain(
            "spouse",
            json!({"candidate_name": "Spouse", "disc_params_default": {"lr": 0.5, "dim": 50}}),
        );
        let config = resolve(
            &settings,
            overrides(json!({
                "domain": "spouse",
                "supervision": "dp",
                "seed": 3,
                "max_train": null,
                "disc_params_default:batch_size": 16,
            })),
        )
        .unwrap();

        assert_eq!(config["candidate_name"], json!("Spouse"));
        // experiment table beats the local file, overrides beat the table
        assert_eq!(config["disc_params_default"]["lr"], json!(0.001));
        assert_eq!(config["disc_params_default"]["batch_size"], json!(16));
        assert_eq!(config["disc_params_default"]["dim"], json!(50));
        assert_eq!(config["disc_params_default"]["n_epochs"], json!(100));
        assert_eq!(config["seed"], json!(3));
        assert!(config["max_train"].is_null());
    }

    #[test]
    fn missing_local_config_is_fatal() {
        let (_dir, settings) = settings_with_domain("spouse", json!({}));
        let err = resolve(&settings, overrides(json!({"domain": "cdr"}))).unwrap_err();
        assert!(matches!(err, Error::LocalConfigNotFound { .. }));
    }

    #[test]
    fn unknown_project_and_missing_domain_are_rejected() {
        let (_dir, settings) = settings_with_domain("spouse", json!({}));
        assert!(matches!(
            resolve(&settings, overrides(json!({"domain": "spouse", "project": "x"}))),
            Err(Error::UnknownProject(_))
        ));
        assert!(matches!(
            resolve(&settings, overrides(json!({"seed": 1}))),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn random_seed_is_filled_in() {
        let (_dir, settings) = settings_with_domain("spouse", json!({}));
        let config = resolve(&settings, overrides(json!({"domain": "spouse"}))).unwrap();
        assert!(config["seed"].as_u64().is_some());
    }

    #[test]
    fn zero_seed_counts_as_unset() {
        let (_dir, settings) = settings_with_domain("spouse", json!({}));
        let config = resolve(&settings, overrides(json!({"domain": "spouse", "seed": 0}))).unwrap();
        let seed = config["seed"].as_u64().unwrap();
        assert!((1..1_000_000).contains(&seed));
    }

    #[test]
    fn experiment_rules_default_to_empty() {
        let empty = experiment_config("spouse", Some("generative"), None, None);
        assert_eq!(Value::Object(empty), json!({"disc_params_default": {}}));
        let cdr = experiment_config("cdr", Some("jt"), Some(true), Some(false));
        assert_eq!(cdr["disc_params_default"]["rebalance"], json!(0.4));
    }
}
