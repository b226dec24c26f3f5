//! End-of-run score report.

use std::{fs::OpenOptions, path::PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::{config::PipelineConfig, error::Result, learning::Score};

/// Scores recorded over a run, keyed by the model that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scores {
    /// Label aggregator (generative or categorical).
    pub gen: Option<Score>,
    /// Discriminative classifier.
    pub disc: Option<Score>,
}

impl Scores {
    pub fn is_empty(&self) -> bool {
        self.gen.is_none() && self.disc.is_none()
    }

    fn rows(&self) -> impl Iterator<Item = (&'static str, Score)> + '_ {
        [("Gen", self.gen), ("Disc", self.disc)]
            .into_iter()
            .filter_map(|(name, score)| score.map(|s| (name, s)))
    }
}

#[derive(Serialize)]
struct ReportRow<'a> {
    timestamp: &'a str,
    domain: &'a str,
    supervision: &'static str,
    seed: u64,
    model: &'static str,
    precision: f64,
    recall: f64,
    f1: f64,
    coverage: f64,
    threshold: f64,
}

/// Log the recorded scores and append them to `<reports_dir>/<domain>_scores.csv`.
///
/// Returns the report path when a reports directory is configured.
pub fn final_report(config: &PipelineConfig, scores: &Scores) -> Result<Option<PathBuf>> {
    for (model, score) in scores.rows() {
        info!(
            model,
            precision = format!("{:.3}", score.precision),
            recall = format!("{:.3}", score.recall),
            f1 = format!("{:.3}", score.f1),
            "final score"
        );
    }
    let Some(dir) = config.reports_dir.as_ref() else {
        return Ok(None);
    };
    if scores.is_empty() {
        return Ok(None);
    }

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}_scores.csv", config.domain));
    let is_new = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);

    let timestamp = Utc::now().to_rfc3339();
    for (model, score) in scores.rows() {
        writer.serialize(ReportRow {
            timestamp: &timestamp,
            domain: &config.domain,
            supervision: config.supervision.name(),
            seed: config.seed,
            model,
            precision: score.precision,
            recall: score.recall,
            f1: score.f1,
            coverage: score.coverage,
            threshold: score.threshold,
        })?;
    }
    writer.flush()?;
    info!(path = %path.display(), "wrote score report");
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::{layers::global_defaults, merge::merge_into};

    fn score(f1: f64) -> Score {
        Score {
            precision: f1,
            recall: f1,
            f1,
            coverage: 1.0,
            threshold: 0.5,
        }
    }

    #[test]
    fn appends_rows_with_a_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = global_defaults();
        merge_into(
            &mut map,
            json!({"domain": "spouse", "seed": 7, "reports_dir": dir.path()})
                .as_object()
                .unwrap(),
        );
        let config = PipelineConfig::from_map(map).unwrap();
        let scores = Scores {
            gen: Some(score(0.5)),
            disc: Some(score(0.75)),
        };

        let path = final_report(&config, &scores).unwrap().unwrap();
        final_report(&config, &scores).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("timestamp,domain,supervision"));
        assert!(lines[1].contains(",spouse,generative,7,Gen,"));
        assert!(lines[2].contains(",Disc,"));
    }

    #[test]
    fn nothing_is_written_without_scores() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = global_defaults();
        merge_into(
            &mut map,
            json!({"domain": "d", "seed": 1, "reports_dir": dir.path()})
                .as_object()
                .unwrap(),
        );
        let config = PipelineConfig::from_map(map).unwrap();
        assert_eq!(final_report(&config, &Scores::default()).unwrap(), None);
    }
}
