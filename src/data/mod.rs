//! Candidate splits, annotation matrices and the stores that hold them.

pub mod matrix;
pub mod parquet;
pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use matrix::{
    sample_rows, CategoricalMatrix, FeatureMatrix, GoldLabels, LabelMatrix, Marginals,
};
pub use parquet::ParquetStore;
pub use store::{LabelStore, MemoryStore};

/// Stable identity of a candidate across every matrix built from its split.
pub type CandidateId = i64;

/// Partition of candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Dev, Split::Test];

    pub fn index(self) -> u8 {
        match self {
            Self::Train => 0,
            Self::Dev => 1,
            Self::Test => 2,
        }
    }

    /// Directory name used by file-backed stores.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Dev => "dev",
            Self::Test => "test",
        }
    }
}

impl TryFrom<u8> for Split {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Train),
            1 => Ok(Self::Dev),
            2 => Ok(Self::Test),
            other => Err(format!("split must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<Split> for u8 {
    fn from(split: Split) -> Self {
        split.index()
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name().to_uppercase())
    }
}
