//! Runtime configuration: process settings plus the layered run configuration.

pub mod layers;
pub mod merge;
pub mod pipeline;

use std::{env, path::PathBuf};

use serde::Deserialize;

use crate::error::Result;

pub use layers::{resolve, Project};
pub use pipeline::{DiscModelClass, PipelineConfig, Supervision};

/// Process settings resolved from `.env` and defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root holding `experiments/<project>/<domain>/config.json`.
    pub home: PathBuf,
    /// Root folder of the label/feature store.
    pub data_dir: PathBuf,
    /// Root folder for score reports and checkpoints.
    pub reports_dir: PathBuf,
}

impl Settings {
    /// Load settings from environment with reasonable defaults.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let home = env::var("WEAKSUP_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let data_dir = env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let reports_dir = env::var("REPORTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./reports"));
        Self::with_dirs(home, data_dir, reports_dir)
    }

    /// Settings rooted at explicit directories, created if missing.
    pub fn with_dirs(home: PathBuf, data_dir: PathBuf, reports_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        std::fs::create_dir_all(&reports_dir)?;
        Ok(Self {
            home,
            data_dir,
            reports_dir,
        })
    }

    /// Location of a domain's local config file.
    pub fn local_config_path(&self, project: Project, domain: &str) -> PathBuf {
        self.home
            .join("experiments")
            .join(project.as_str())
            .join(domain)
            .join("config.json")
    }
}
