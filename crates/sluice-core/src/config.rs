//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Compression applied to persisted checkpoint blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Codec {
    #[default]
    None = 0,
    Zstd = 1,
    Lz4 = 2,
}

impl Codec {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Codec::None),
            1 => Some(Codec::Zstd),
            2 => Some(Codec::Lz4),
            _ => None,
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Codec::None),
            "zstd" => Ok(Codec::Zstd),
            "lz4" => Ok(Codec::Lz4),
            other => Err(Error::Config(format!("unknown checkpoint codec '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of elements (including checkpoint barriers) that may sit in the
    /// channel between two adjacent stages.
    pub channel_capacity: usize,

    /// Period between checkpoint requests. `None` disables checkpointing.
    pub checkpoint_interval_ms: Option<u64>,

    /// Maximum number of requested but uncommitted checkpoints. `0` disables
    /// checkpointing entirely.
    pub checkpoints_in_flight: usize,

    /// Root directory for checkpoint records.
    pub checkpoint_dir: String,

    /// Compression for checkpoint blobs.
    pub checkpoint_codec: Codec,

    /// Keep committed checkpoints after a successful run.
    pub retain_checkpoints: bool,

    /// Upper bound on optimizer fixpoint iterations.
    pub optimizer_max_iterations: usize,

    /// Rows per slice produced by in-memory sources and parsers.
    pub default_batch_size: usize,

    /// Deadline for a single external read issued by a loader.
    pub load_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 4,
            checkpoint_interval_ms: None,
            checkpoints_in_flight: 1,
            checkpoint_dir: "/tmp/sluice-checkpoints".to_string(),
            checkpoint_codec: Codec::None,
            retain_checkpoints: false,
            optimizer_max_iterations: 16,
            default_batch_size: 1024,
            load_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `SLUICE_CHANNEL_CAPACITY`: elements buffered per edge
    /// - `SLUICE_CHECKPOINT_INTERVAL_MS`: checkpoint period
    /// - `SLUICE_CHECKPOINTS_IN_FLIGHT`: uncommitted checkpoint bound
    /// - `SLUICE_CHECKPOINT_DIR`: checkpoint root
    /// - `SLUICE_CHECKPOINT_CODEC`: `none`, `zstd`, or `lz4`
    /// - `SLUICE_RETAIN_CHECKPOINTS`: `true` to keep checkpoints after success
    /// - `SLUICE_OPTIMIZER_MAX_ITERATIONS`: optimizer iteration cap
    /// - `SLUICE_BATCH_SIZE`: default rows per slice
    /// - `SLUICE_LOAD_TIMEOUT_MS`: loader deadline
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("SLUICE_CHANNEL_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.channel_capacity = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_CHECKPOINT_INTERVAL_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.checkpoint_interval_ms = Some(v);
            }
        }

        if let Ok(s) = std::env::var("SLUICE_CHECKPOINTS_IN_FLIGHT") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.checkpoints_in_flight = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_CHECKPOINT_DIR") {
            cfg.checkpoint_dir = s;
        }

        if let Ok(s) = std::env::var("SLUICE_CHECKPOINT_CODEC") {
            if let Ok(v) = s.parse::<Codec>() {
                cfg.checkpoint_codec = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_RETAIN_CHECKPOINTS") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.retain_checkpoints = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_OPTIMIZER_MAX_ITERATIONS") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.optimizer_max_iterations = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_BATCH_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.default_batch_size = v;
            }
        }

        if let Ok(s) = std::env::var("SLUICE_LOAD_TIMEOUT_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.load_timeout_ms = Some(v);
            }
        }

        cfg
    }

    /// Checkpointing needs both an interval and room for at least one
    /// checkpoint in flight.
    pub fn checkpointing_enabled(&self) -> bool {
        self.checkpoint_interval_ms.is_some() && self.checkpoints_in_flight > 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be at least 1".into()));
        }
        if self.default_batch_size == 0 {
            return Err(Error::Config("default_batch_size must be at least 1".into()));
        }
        if self.optimizer_max_iterations == 0 {
            return Err(Error::Config(
                "optimizer_max_iterations must be at least 1".into(),
            ));
        }
        if self.checkpoint_interval_ms == Some(0) {
            return Err(Error::Config("checkpoint_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_in_flight_disables_checkpointing() {
        let cfg = EngineConfig {
            checkpoint_interval_ms: Some(10),
            checkpoints_in_flight: 0,
            ..Default::default()
        };
        assert!(!cfg.checkpointing_enabled());

        let cfg = EngineConfig {
            checkpoint_interval_ms: Some(10),
            ..Default::default()
        };
        assert!(cfg.checkpointing_enabled());
        assert!(!EngineConfig::default().checkpointing_enabled());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let cfg = EngineConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn codec_parses_case_insensitively() {
        assert_eq!("ZSTD".parse::<Codec>().unwrap(), Codec::Zstd);
        assert!("brotli".parse::<Codec>().is_err());
        assert_eq!(Codec::from_u8(2), Some(Codec::Lz4));
    }
}
