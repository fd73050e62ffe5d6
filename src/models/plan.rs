use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Planner input surface: one row per (date, winner, loser, dma) for a
/// flagged (date, winner), joining pair rolling metrics with the national
/// aggregates. Rows with zero current wins never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub date: NaiveDate,
    pub winner: String,
    pub loser: String,
    pub dma: i64,
    pub dma_name: String,
    pub state: Option<String>,

    pub pair_wins_current: f64,
    pub pair_mu_wins: Option<f64>,
    pub pair_sigma_wins: Option<f64>,
    pub pair_z: Option<f64>,
    pub pair_pct_change: Option<f64>,

    pub pair_outlier_pos: bool,
    pub pct_outlier_pos: bool,
    pub rare_pair: bool,
    pub new_pair: bool,

    /// Winner's total wins across all losers in this DMA on this date.
    pub dma_wins: f64,
    pub pair_share: f64,

    pub nat_total_wins: f64,
    pub nat_share_current: f64,
    pub nat_mu_share: f64,
    pub nat_z_score: f64,
}

/// Which allocation stage produced a plan row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Auto,
    Distributed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Auto => "auto",
            Stage::Distributed => "distributed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Stage::Auto),
            "distributed" => Some(Stage::Distributed),
            _ => None,
        }
    }
}

/// One planned removal: take `remove_units` wins away from a single
/// (date, winner, loser, dma) cell. Snapshot columns record the pair and
/// national statistics at decision time for audit and preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanRow {
    pub date: NaiveDate,
    pub winner: String,
    pub loser: String,
    pub dma: i64,
    pub dma_name: String,
    pub state: Option<String>,
    pub mover_ind: bool,
    pub remove_units: u32,
    pub stage: Stage,
    pub impact: i64,

    pub pair_wins_current: f64,
    pub pair_mu_wins: Option<f64>,
    pub pair_sigma_wins: Option<f64>,
    pub pair_z: Option<f64>,
    pub pair_pct_change: Option<f64>,
    pub dma_wins: f64,
    pub pair_share: f64,

    pub nat_total_wins: f64,
    pub nat_share_current: f64,
    pub nat_mu_share: f64,
    pub nat_z_score: f64,
}

/// A stage-2 shortfall: remaining need with zero pairs above the distributed
/// minimum. Reported, never raised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsufficientThresholdCase {
    pub date: NaiveDate,
    pub winner: String,
    pub need_remaining: u32,
    pub unreachable: bool,
}

/// A flag the planner produced no rows for, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFlag {
    pub date: NaiveDate,
    pub winner: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanDiagnostics {
    pub insufficient_threshold_cases: Vec<InsufficientThresholdCase>,
    pub skipped_flags: Vec<SkippedFlag>,
}

/// Census-block refinement of one auto row. The per-(date, winner, loser,
/// dma) removal total is unchanged; these rows only redistribute it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRemoval {
    pub date: NaiveDate,
    pub winner: String,
    pub loser: String,
    pub dma: i64,
    pub dma_name: String,
    pub census_block_id: String,
    pub remove_units: u32,
    pub block_z: Option<f64>,
}

/// The planner's output: removal rows plus accumulated diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub rows: Vec<PlanRow>,
    #[serde(default)]
    pub block_rows: Vec<BlockRemoval>,
    #[serde(default)]
    pub diagnostics: PlanDiagnostics,
}

impl Plan {
    /// Total removal units per (date, winner).
    pub fn removals_by_flag(&self) -> HashMap<(NaiveDate, String), u32> {
        let mut totals: HashMap<(NaiveDate, String), u32> = HashMap::new();
        for row in &self.rows {
            *totals
                .entry((row.date, row.winner.clone()))
                .or_default() += row.remove_units;
        }
        totals
    }

    /// Invariant checks run before persistence: positive removals bounded by
    /// current wins, unique (date, winner, loser, dma, stage) keys, and a
    /// per-(date, winner) total no larger than the removal need recomputed
    /// from the row's national snapshot.
    pub fn validate(&self) -> Result<()> {
        let mut keys = HashSet::new();
        for row in &self.rows {
            if row.remove_units == 0 {
                return Err(EngineError::CubeIntegrity {
                    reason: format!(
                        "plan row {} {} vs {} in {} has zero remove_units",
                        row.date, row.winner, row.loser, row.dma_name
                    ),
                });
            }
            if f64::from(row.remove_units) > row.pair_wins_current {
                return Err(EngineError::CubeIntegrity {
                    reason: format!(
                        "plan row {} {} vs {} in {} removes {} of {} wins",
                        row.date,
                        row.winner,
                        row.loser,
                        row.dma_name,
                        row.remove_units,
                        row.pair_wins_current
                    ),
                });
            }
            let key = (row.date, row.winner.clone(), row.loser.clone(), row.dma, row.stage);
            if !keys.insert(key) {
                return Err(EngineError::CubeIntegrity {
                    reason: format!(
                        "duplicate plan key {} {} vs {} dma {} stage {}",
                        row.date,
                        row.winner,
                        row.loser,
                        row.dma,
                        row.stage.as_str()
                    ),
                });
            }
        }

        // Need is recomputable from any row's national snapshot: the market
        // total is nat_total_wins / nat_share_current. The bound allows the
        // ceil slack plus float noise from the round-tripped market total.
        let mut bounds: HashMap<(NaiveDate, String), f64> = HashMap::new();
        for row in &self.rows {
            bounds
                .entry((row.date, row.winner.clone()))
                .or_insert_with(|| {
                    let market = if row.nat_share_current > 0.0 {
                        row.nat_total_wins / row.nat_share_current
                    } else {
                        0.0
                    };
                    let denom = (1.0 - row.nat_mu_share).max(1e-12);
                    let quotient = (row.nat_total_wins - row.nat_mu_share * market) / denom;
                    if quotient.is_finite() { quotient.max(0.0) } else { 0.0 }
                });
        }
        for ((date, winner), removed) in self.removals_by_flag() {
            let bound = bounds.get(&(date, winner.clone())).copied().unwrap_or(0.0);
            if f64::from(removed) > bound + 1.0 + 1e-6 {
                return Err(EngineError::CubeIntegrity {
                    reason: format!(
                        "plan for {date} {winner} removes {removed} units, need was {:.0}",
                        bound.ceil()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Inventory entry for one persisted round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundInfo {
    pub name: String,
    pub row_count: usize,
    pub modified_at: Option<String>,
}
