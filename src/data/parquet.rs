//! Directory of parquet files acting as the label/feature store.
//!
//! Layout under the store root:
//!
//! | File                          | Columns                         |
//! |-------------------------------|---------------------------------|
//! | `lfs.parquet`                 | `lf`, `name`                    |
//! | `feature_keys.parquet`        | `feature`, `key`                |
//! | `<split>/candidates.parquet`  | `candidate_id` (row order)      |
//! | `<split>/labels.parquet`      | `candidate_id`, `lf`, `value`   |
//! | `<split>/features.parquet`    | `candidate_id`, `feature`, `value` |
//! | `<split>/gold.parquet`        | `candidate_id`, `label`         |
//! | `<split>/marginals.parquet`   | `candidate_id`, `marginal`      |
//!
//! Matrix files hold only non-zero entries; row order always comes from
//! `candidates.parquet`.

use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
};

use ndarray::Array1;
use polars::prelude::{DataFrame, NamedFrom, ParquetReader, ParquetWriter, SerReader, Series};
use tracing::{debug, info};

use crate::{
    data::{CandidateId, FeatureMatrix, GoldLabels, LabelMatrix, LabelStore, Marginals, Split},
    error::{Error, Result},
};

/// Parquet-backed [`LabelStore`] rooted at a directory.
#[derive(Debug, Clone)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "opened parquet store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn split_path(&self, split: Split, file: &str) -> PathBuf {
        self.root.join(split.dir_name()).join(file)
    }

    /// Record the candidate order for a split.
    pub fn write_candidates(&self, split: Split, candidates: &[CandidateId]) -> Result<()> {
        let mut df = DataFrame::new(vec![Series::new(
            "candidate_id".into(),
            candidates.to_vec(),
        )])?;
        write_frame(&self.split_path(split, "candidates.parquet"), &mut df)
    }

    pub fn write_lf_names(&self, names: &[String]) -> Result<()> {
        let mut df = DataFrame::new(vec![
            Series::new("lf".into(), (0..names.len() as i64).collect::<Vec<_>>()),
            Series::new("name".into(), names.to_vec()),
        ])?;
        write_frame(&self.root.join("lfs.parquet"), &mut df)
    }

    pub fn write_label_matrix(&self, split: Split, matrix: &LabelMatrix) -> Result<()> {
        self.write_candidates(split, matrix.candidates())?;
        let mut ids = Vec::with_capacity(matrix.nnz());
        let mut lfs = Vec::with_capacity(matrix.nnz());
        let mut values = Vec::with_capacity(matrix.nnz());
        for row in 0..matrix.n_rows() {
            for (lf, vote) in matrix.row_votes(row) {
                ids.push(matrix.candidates()[row]);
                lfs.push(lf as i64);
                values.push(i64::from(vote));
            }
        }
        let mut df = DataFrame::new(vec![
            Series::new("candidate_id".into(), ids),
            Series::new("lf".into(), lfs),
            Series::new("value".into(), values),
        ])?;
        write_frame(&self.split_path(split, "labels.parquet"), &mut df)
    }

    pub fn write_feature_matrix(&self, split: Split, matrix: &FeatureMatrix) -> Result<()> {
        let mut ids = Vec::with_capacity(matrix.nnz());
        let mut features = Vec::with_capacity(matrix.nnz());
        let mut values = Vec::with_capacity(matrix.nnz());
        for (row, view) in matrix.values().outer_iterator().enumerate() {
            for (col, &value) in view.iter() {
                ids.push(matrix.candidates()[row]);
                features.push(col as i64);
                values.push(value);
            }
        }
        let mut df = DataFrame::new(vec![
            Series::new("candidate_id".into(), ids),
            Series::new("feature".into(), features),
            Series::new("value".into(), values),
        ])?;
        write_frame(&self.split_path(split, "features.parquet"), &mut df)
    }

    pub fn write_gold_labels(&self, split: Split, gold: &GoldLabels) -> Result<()> {
        let mut df = DataFrame::new(vec![
            Series::new("candidate_id".into(), gold.candidates().to_vec()),
            Series::new(
                "label".into(),
                gold.labels().iter().map(|&l| i64::from(l)).collect::<Vec<_>>(),
            ),
        ])?;
        write_frame(&self.split_path(split, "gold.parquet"), &mut df)
    }

    fn candidates(&self, split: Split, kind: &'static str) -> Result<Vec<CandidateId>> {
        let df = read_frame(&self.split_path(split, "candidates.parquet"), kind, split)?;
        Ok(df
            .column("candidate_id")?
            .i64()?
            .into_no_null_iter()
            .collect())
    }

    fn row_lookup(candidates: &[CandidateId]) -> HashMap<CandidateId, usize> {
        candidates
            .iter()
            .enumerate()
            .map(|(row, &id)| (id, row))
            .collect()
    }

    fn key_count(&self, file: &str) -> Result<Option<usize>> {
        let path = self.root.join(file);
        if !path.exists() {
            return Ok(None);
        }
        let df = ParquetReader::new(File::open(&path)?).finish()?;
        Ok(Some(df.height()))
    }
}

impl LabelStore for ParquetStore {
    fn load_label_matrix(&self, split: Split) -> Result<LabelMatrix> {
        const KIND: &str = "label matrix";
        let candidates = self.candidates(split, KIND)?;
        let df = read_frame(&self.split_path(split, "labels.parquet"), KIND, split)?;
        let lookup = Self::row_lookup(&candidates);
        let mut entries = Vec::with_capacity(df.height());
        let mut max_lf = 0usize;
        for ((id, lf), value) in df
            .column("candidate_id")?
            .i64()?
            .into_no_null_iter()
            .zip(df.column("lf")?.i64()?.into_no_null_iter())
            .zip(df.column("value")?.i64()?.into_no_null_iter())
        {
            let row = *lookup.get(&id).ok_or_else(|| {
                Error::precondition(
                    format!("label matrix [{split}]"),
                    format!("candidate {id} is not in the split's candidate list"),
                )
            })?;
            let lf = usize::try_from(lf).map_err(|_| {
                Error::precondition(format!("label matrix [{split}]"), "negative LF index")
            })?;
            let vote = i8::try_from(value).map_err(|_| {
                Error::precondition(
                    format!("label matrix [{split}]"),
                    format!("vote {value} out of range"),
                )
            })?;
            max_lf = max_lf.max(lf + 1);
            entries.push((row, lf, vote));
        }
        let n_lfs = self.key_count("lfs.parquet")?.unwrap_or(max_lf).max(max_lf);
        LabelMatrix::from_entries(candidates, n_lfs, entries)
    }

    fn load_feature_matrix(&self, split: Split) -> Result<FeatureMatrix> {
        const KIND: &str = "feature matrix";
        let candidates = self.candidates(split, KIND)?;
        let df = read_frame(&self.split_path(split, "features.parquet"), KIND, split)?;
        let lookup = Self::row_lookup(&candidates);
        let mut entries = Vec::with_capacity(df.height());
        let mut max_feature = 0usize;
        for ((id, feature), value) in df
            .column("candidate_id")?
            .i64()?
            .into_no_null_iter()
            .zip(df.column("feature")?.i64()?.into_no_null_iter())
            .zip(df.column("value")?.f64()?.into_no_null_iter())
        {
            let Some(&row) = lookup.get(&id) else {
                continue;
            };
            let feature = usize::try_from(feature).map_err(|_| {
                Error::precondition(format!("feature matrix [{split}]"), "negative feature index")
            })?;
            max_feature = max_feature.max(feature + 1);
            entries.push((row, feature, value));
        }
        let n_features = self
            .key_count("feature_keys.parquet")?
            .unwrap_or(max_feature)
            .max(max_feature);
        FeatureMatrix::from_entries(candidates, n_features, entries)
    }

    fn load_gold_labels(&self, split: Split) -> Result<GoldLabels> {
        const KIND: &str = "gold labels";
        let candidates = self.candidates(split, KIND)?;
        let df = read_frame(&self.split_path(split, "gold.parquet"), KIND, split)?;
        let lookup = Self::row_lookup(&candidates);
        let mut labels = vec![0i8; candidates.len()];
        for (id, label) in df
            .column("candidate_id")?
            .i64()?
            .into_no_null_iter()
            .zip(df.column("label")?.i64()?.into_no_null_iter())
        {
            if let Some(&row) = lookup.get(&id) {
                labels[row] = i8::try_from(label).map_err(|_| {
                    Error::precondition(
                        format!("gold labels [{split}]"),
                        format!("label {label} out of range"),
                    )
                })?;
            }
        }
        GoldLabels::new(candidates, labels)
    }

    fn load_marginals(&self, split: Split) -> Result<Marginals> {
        const KIND: &str = "marginals";
        let candidates = self.candidates(split, KIND)?;
        let df = read_frame(&self.split_path(split, "marginals.parquet"), KIND, split)?;
        let by_id: HashMap<CandidateId, f64> = df
            .column("candidate_id")?
            .i64()?
            .into_no_null_iter()
            .zip(df.column("marginal")?.f64()?.into_no_null_iter())
            .collect();
        // Marginals may cover a subsample; keep the stored order in that case.
        if by_id.len() < candidates.len() {
            return Ok(df.column("marginal")?.f64()?.into_no_null_iter().collect());
        }
        let mut out = Vec::with_capacity(candidates.len());
        for id in &candidates {
            let value = by_id.get(id).copied().ok_or(Error::NoSuchData { kind: KIND, split })?;
            out.push(value);
        }
        Ok(Array1::from(out))
    }

    fn save_marginals(
        &mut self,
        split: Split,
        matrix: &LabelMatrix,
        marginals: &Marginals,
    ) -> Result<()> {
        if matrix.n_rows() != marginals.len() {
            return Err(Error::precondition(
                format!("save_marginals [{split}]"),
                format!(
                    "{} marginals for {} candidates",
                    marginals.len(),
                    matrix.n_rows()
                ),
            ));
        }
        let mut df = DataFrame::new(vec![
            Series::new("candidate_id".into(), matrix.candidates().to_vec()),
            Series::new("marginal".into(), marginals.to_vec()),
        ])?;
        write_frame(&self.split_path(split, "marginals.parquet"), &mut df)
    }

    fn lf_names(&self) -> Vec<String> {
        let path = self.root.join("lfs.parquet");
        let Ok(file) = File::open(&path) else {
            return Vec::new();
        };
        let Ok(df) = ParquetReader::new(file).finish() else {
            return Vec::new();
        };
        df.column("name")
            .and_then(|col| col.str().map(|s| s.into_no_null_iter().map(str::to_string).collect()))
            .unwrap_or_default()
    }
}

fn read_frame(path: &Path, kind: &'static str, split: Split) -> Result<DataFrame> {
    if !path.exists() {
        return Err(Error::NoSuchData { kind, split });
    }
    Ok(ParquetReader::new(File::open(path)?).finish()?)
}

fn write_frame(path: &Path, df: &mut DataFrame) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    ParquetWriter::new(file).finish(df)?;
    info!(path = %path.display(), rows = df.height(), "wrote parquet");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_matrix_survives_the_store_with_abstain_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ParquetStore::open(dir.path()).unwrap();
        let matrix =
            LabelMatrix::from_entries(vec![7, 8, 9], 3, vec![(0, 0, 1), (2, 2, -1)]).unwrap();
        store
            .write_lf_names(&["a".into(), "b".into(), "c".into()])
            .unwrap();
        store.write_label_matrix(Split::Train, &matrix).unwrap();

        let loaded = store.load_label_matrix(Split::Train).unwrap();
        assert_eq!(loaded, matrix);
        assert_eq!(store.lf_names(), vec!["a", "b", "c"]);

        let marginals = Array1::from(vec![1.0, 0.5, 0.0]);
        store
            .save_marginals(Split::Train, &matrix, &marginals)
            .unwrap();
        assert_eq!(store.load_marginals(Split::Train).unwrap(), marginals);
    }

    #[test]
    fn unlabeled_candidates_default_to_zero_gold() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetStore::open(dir.path()).unwrap();
        store.write_candidates(Split::Dev, &[1, 2, 3]).unwrap();
        let partial = GoldLabels::new(vec![3, 1], vec![1, -1]).unwrap();
        store.write_gold_labels(Split::Dev, &partial).unwrap();

        let gold = store.load_gold_labels(Split::Dev).unwrap();
        assert_eq!(gold.labels().to_vec(), vec![-1, 0, 1]);
        assert!(matches!(
            store.load_label_matrix(Split::Dev),
            Err(Error::NoSuchData { .. })
        ));
    }
}
