use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The eight pipeline stages, in execution order. A stage's rank is its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    Extract,
    LoadGold,
    Featurize,
    Collect,
    Label,
    Supervise,
    Classify,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Parse,
        Stage::Extract,
        Stage::LoadGold,
        Stage::Featurize,
        Stage::Collect,
        Stage::Label,
        Stage::Supervise,
        Stage::Classify,
    ];

    /// Number of stages; `end_at = COUNT` runs through `classify`.
    pub const COUNT: usize = Self::ALL.len();

    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Extract => "extract",
            Self::LoadGold => "load_gold",
            Self::Featurize => "featurize",
            Self::Collect => "collect",
            Self::Label => "label",
            Self::Supervise => "supervise",
            Self::Classify => "classify",
        }
    }

    pub fn from_rank(rank: usize) -> Option<Self> {
        Self::ALL.get(rank).copied()
    }

    /// Stages with `start_at <= rank < end_at`, in rank order.
    pub fn in_range(start_at: usize, end_at: usize) -> impl Iterator<Item = Stage> {
        Self::ALL
            .into_iter()
            .filter(move |stage| (start_at..end_at).contains(&stage.rank()))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = Error;

    /// Accepts a stage name (`load_gold`, `LOAD_GOLD`) or its rank.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(rank) = s.parse::<usize>() {
            return Self::from_rank(rank)
                .ok_or_else(|| Error::Config(format!("stage rank {rank} out of range 0..8")));
        }
        let lowered = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|stage| stage.name() == lowered)
            .ok_or_else(|| Error::Config(format!("unknown stage '{s}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_follow_declaration_order() {
        for (i, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.rank(), i);
            assert_eq!(Stage::from_rank(i), Some(*stage));
        }
        assert_eq!(Stage::from_rank(8), None);
    }

    #[test]
    fn range_is_half_open() {
        let stages: Vec<_> = Stage::in_range(6, 8).collect();
        assert_eq!(stages, vec![Stage::Supervise, Stage::Classify]);
        assert_eq!(Stage::in_range(3, 3).count(), 0);
        assert_eq!(Stage::in_range(0, 100).count(), 8);
    }

    #[test]
    fn parses_names_and_ranks() {
        assert_eq!("LOAD_GOLD".parse::<Stage>().unwrap(), Stage::LoadGold);
        assert_eq!("7".parse::<Stage>().unwrap(), Stage::Classify);
        assert!("9".parse::<Stage>().is_err());
        assert!("train".parse::<Stage>().is_err());
    }
}
