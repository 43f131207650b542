//! Strongly-typed identifiers used across the engine.
//!
//! Stages and checkpoints are addressed by small per-run counters; pipeline
//! runs get a UUID so checkpoints can be correlated across process restarts.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(StageId);
new_id!(CheckpointSeq);

impl StageId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl CheckpointSeq {
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Identifies one logical pipeline run. A resumed run reuses the id of the
/// run it continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PipelineRunId(pub Uuid);

impl PipelineRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PipelineRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PipelineRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PipelineRunId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::Config(format!("invalid run id '{s}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_round_trips_through_text() {
        let id = PipelineRunId::new();
        let parsed: PipelineRunId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<PipelineRunId>().is_err());
    }

    #[test]
    fn checkpoint_seq_is_monotonic() {
        let seq = CheckpointSeq::new(4);
        assert!(seq.next() > seq);
        assert_eq!(seq.next().get(), 5);
        assert_eq!(StageId::new(2).to_string(), "StageId(2)");
    }
}
