use chrono::NaiveDate;
use serde::Serialize;

use super::cube::DayType;

/// Raw rolling statistics for one window size. `avg_wins` is present whenever
/// the window contains at least one prior observation; `stddev_wins` needs two
/// (sample standard deviation, Bessel-corrected).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowStats {
    pub n_periods: u32,
    pub avg_wins: Option<f64>,
    pub stddev_wins: Option<f64>,
}

/// One cube row augmented with day-type-partitioned rolling baselines and the
/// DMA-level outlier predicate results.
#[derive(Debug, Clone, Serialize)]
pub struct RollingRow {
    pub date: NaiveDate,
    pub day_type: DayType,
    pub winner: String,
    pub loser: String,
    pub dma: i64,
    pub dma_name: String,
    pub state: Option<String>,
    pub total_wins: f64,
    pub record_count: i64,

    // Raw per-window statistics, windows 28 / 14 / 4 calendar days.
    pub w28: WindowStats,
    pub w14: WindowStats,
    pub w4: WindowStats,

    // Tier-selected statistics. All None when no window met its minimum
    // sample count; such rows are baseline-less and never flagged.
    pub selected_window: Option<u32>,
    pub n_periods: Option<u32>,
    pub avg_wins: Option<f64>,
    pub stddev_wins: Option<f64>,

    pub z_score: Option<f64>,
    pub pct_change: Option<f64>,

    /// 1-based ordinal of this date among the series' observations.
    pub appearance_rank: u32,
    pub is_first_appearance: bool,

    pub is_z_outlier: bool,
    pub is_pct_outlier: bool,
    pub is_rare_pair: bool,
    pub is_outlier: bool,
}
