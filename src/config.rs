use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Top-level config loaded from `suppress.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub plan: PlanConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Canonical cube database path. Every read path goes through the handle
    /// opened on this path; call sites never re-derive it.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Directory persisted plan rounds are written under.
    #[serde(default = "default_rounds_dir")]
    pub rounds_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            rounds_dir: default_rounds_dir(),
        }
    }
}

fn default_db_path() -> String {
    "./suppression_cubes.db".to_string()
}

fn default_rounds_dir() -> String {
    "./rounds".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanConfig {
    /// Census-block surgical refinement of auto rows. Off by default.
    #[serde(default)]
    pub surgical: bool,
    #[serde(default = "default_surgical_top_k")]
    pub surgical_top_k: usize,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            surgical: false,
            surgical_top_k: default_surgical_top_k(),
        }
    }
}

fn default_surgical_top_k() -> usize {
    3
}

/// End-user tunables for the scanner, rolling view, and planner. Every field
/// has a default so callers can override any subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Scanner admission: carriers ranked by all-time wins.
    #[serde(default = "default_top_n_carriers")]
    pub top_n_carriers: usize,
    /// Scanner admission: minimum all-time market share, in percent.
    #[serde(default = "default_min_share_pct")]
    pub min_share_pct: f64,
    /// National outlier gate on the same-day-type z-score.
    #[serde(default = "default_nat_z_threshold")]
    pub nat_z_threshold: f64,
    /// Single-day impact that admits a carrier outside the top N.
    #[serde(default = "default_egregious_impact")]
    pub egregious_impact: f64,
    /// DMA-level z predicate.
    #[serde(default = "default_dma_z_threshold")]
    pub dma_z_threshold: f64,
    /// DMA-level percent-change predicate, in percent.
    #[serde(default = "default_dma_pct_threshold")]
    pub dma_pct_threshold: f64,
    /// Rare-pair gate: impact a low-volume pair must exceed.
    #[serde(default = "default_rare_pair_impact_threshold")]
    pub rare_pair_impact_threshold: f64,
    /// Rare-pair gate: baseline volume below which a pair counts as rare.
    #[serde(default = "default_rare_pair_volume_threshold")]
    pub rare_pair_volume_threshold: f64,
    /// Stage-1 minimum current wins for a pair to be targeted.
    #[serde(default = "default_auto_min_wins")]
    pub auto_min_wins: f64,
    /// Stage-2 minimum current wins for a pair to receive removals.
    #[serde(default = "default_distributed_min_wins")]
    pub distributed_min_wins: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            top_n_carriers: default_top_n_carriers(),
            min_share_pct: default_min_share_pct(),
            nat_z_threshold: default_nat_z_threshold(),
            egregious_impact: default_egregious_impact(),
            dma_z_threshold: default_dma_z_threshold(),
            dma_pct_threshold: default_dma_pct_threshold(),
            rare_pair_impact_threshold: default_rare_pair_impact_threshold(),
            rare_pair_volume_threshold: default_rare_pair_volume_threshold(),
            auto_min_wins: default_auto_min_wins(),
            distributed_min_wins: default_distributed_min_wins(),
        }
    }
}

fn default_top_n_carriers() -> usize {
    25
}

fn default_min_share_pct() -> f64 {
    0.5
}

fn default_nat_z_threshold() -> f64 {
    2.5
}

fn default_egregious_impact() -> f64 {
    40.0
}

fn default_dma_z_threshold() -> f64 {
    1.5
}

fn default_dma_pct_threshold() -> f64 {
    30.0
}

fn default_rare_pair_impact_threshold() -> f64 {
    15.0
}

fn default_rare_pair_volume_threshold() -> f64 {
    5.0
}

fn default_auto_min_wins() -> f64 {
    2.0
}

fn default_distributed_min_wins() -> f64 {
    1.0
}

impl Thresholds {
    /// Reject caller-supplied values at the API boundary.
    pub fn validate(&self) -> Result<()> {
        if self.top_n_carriers == 0 {
            return Err(EngineError::ThresholdOutOfRange {
                name: "top_n_carriers",
                value: 0.0,
            });
        }
        let non_negative = [
            ("min_share_pct", self.min_share_pct),
            ("nat_z_threshold", self.nat_z_threshold),
            ("egregious_impact", self.egregious_impact),
            ("dma_z_threshold", self.dma_z_threshold),
            ("dma_pct_threshold", self.dma_pct_threshold),
            ("rare_pair_impact_threshold", self.rare_pair_impact_threshold),
            ("rare_pair_volume_threshold", self.rare_pair_volume_threshold),
            ("auto_min_wins", self.auto_min_wins),
            ("distributed_min_wins", self.distributed_min_wins),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::ThresholdOutOfRange { name, value });
            }
        }
        if self.min_share_pct > 100.0 {
            return Err(EngineError::ThresholdOutOfRange {
                name: "min_share_pct",
                value: self.min_share_pct,
            });
        }
        Ok(())
    }
}

impl EngineConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}
