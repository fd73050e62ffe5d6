use crate::config::Thresholds;
use crate::cube_store::{CubeStore, parse_date};
use crate::error::{EngineError, Result};
use crate::models::cube::{DayType, Metric, MoverSegment};
use crate::models::rolling::{RollingRow, WindowStats};
use crate::sql;

/// Derive mean and Bessel-corrected sample stddev from a window's count, sum,
/// and sum of squares. One prior observation yields a mean but no stddev.
pub(crate) fn window_stats(n: i64, s: Option<f64>, q: Option<f64>) -> WindowStats {
    if n <= 0 {
        return WindowStats::default();
    }
    let n_f = n as f64;
    let s = s.unwrap_or(0.0);
    let q = q.unwrap_or(0.0);
    let avg = s / n_f;
    let stddev = if n >= 2 {
        let var = ((q - s * s / n_f) / (n_f - 1.0)).max(0.0);
        Some(var.sqrt())
    } else {
        None
    };
    WindowStats {
        n_periods: n as u32,
        avg_wins: Some(avg),
        stddev_wins: stddev,
    }
}

/// Tiered fallback: windows are attempted in order 28, 14, 4 calendar days;
/// the first one holding at least `min_periods` prior observations supplies
/// the baseline.
pub(crate) fn select_tier(
    w28: &WindowStats,
    w14: &WindowStats,
    w4: &WindowStats,
    min_periods: u32,
) -> Option<(u32, WindowStats)> {
    for (window, stats) in [(28u32, w28), (14, w14), (4, w4)] {
        if stats.n_periods >= min_periods {
            return Some((window, *stats));
        }
    }
    None
}

/// One RollingRow per cube row, baselines computed from the same
/// (winner, loser, dma, day_type) series' prior observations. Covers the
/// entire cube time series; callers filter to their analysis window.
pub fn get_rolling(
    store: &CubeStore,
    dataset: &str,
    segment: MoverSegment,
    thresholds: &Thresholds,
) -> Result<Vec<RollingRow>> {
    thresholds.validate()?;
    let table = sql::cube_table(dataset, Metric::Win, segment)?;
    store.require_table(&table)?;

    struct Raw {
        date: String,
        day_type: String,
        winner: String,
        loser: String,
        dma: i64,
        dma_name: String,
        state: Option<String>,
        total_wins: f64,
        record_count: i64,
        windows: [(i64, Option<f64>, Option<f64>); 3],
        appearance_rank: i64,
    }

    let raw_rows = store.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql::rolling_view(&table))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Raw {
                    date: row.get(0)?,
                    day_type: row.get(1)?,
                    winner: row.get(2)?,
                    loser: row.get(3)?,
                    dma: row.get(4)?,
                    dma_name: row.get(5)?,
                    state: row.get(6)?,
                    total_wins: row.get(7)?,
                    record_count: row.get(8)?,
                    windows: [
                        (row.get(9)?, row.get(10)?, row.get(11)?),
                        (row.get(12)?, row.get(13)?, row.get(14)?),
                        (row.get(15)?, row.get(16)?, row.get(17)?),
                    ],
                    appearance_rank: row.get(18)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let mut out = Vec::with_capacity(raw_rows.len());
    for raw in raw_rows {
        let date = parse_date(&raw.date)?;
        let day_type = DayType::parse(&raw.day_type).ok_or_else(|| EngineError::CubeIntegrity {
            reason: format!("unknown day type '{}' in cube", raw.day_type),
        })?;

        let [w28_raw, w14_raw, w4_raw] = raw.windows;
        let w28 = window_stats(w28_raw.0, w28_raw.1, w28_raw.2);
        let w14 = window_stats(w14_raw.0, w14_raw.1, w14_raw.2);
        let w4 = window_stats(w4_raw.0, w4_raw.1, w4_raw.2);

        let selected = select_tier(&w28, &w14, &w4, day_type.min_periods());
        let (selected_window, n_periods, avg_wins, stddev_wins) = match selected {
            Some((window, stats)) => (
                Some(window),
                Some(stats.n_periods),
                stats.avg_wins,
                stats.stddev_wins,
            ),
            None => (None, None, None, None),
        };

        let z_score = match (avg_wins, stddev_wins) {
            (Some(avg), Some(sd)) if sd > 0.0 => Some((raw.total_wins - avg) / sd),
            _ => None,
        };
        let pct_change = match avg_wins {
            Some(avg) if avg > 0.0 => Some((raw.total_wins - avg) / avg),
            _ => None,
        };

        let is_first_appearance = raw.appearance_rank == 1;
        let is_z_outlier = z_score.is_some_and(|z| z > thresholds.dma_z_threshold);
        let is_pct_outlier =
            pct_change.is_some_and(|p| p > thresholds.dma_pct_threshold / 100.0);
        let is_rare_pair = avg_wins.is_some_and(|avg| {
            avg < thresholds.rare_pair_volume_threshold
                && (raw.total_wins - avg) > thresholds.rare_pair_impact_threshold
        });
        let is_outlier = is_z_outlier || is_pct_outlier || is_first_appearance || is_rare_pair;

        out.push(RollingRow {
            date,
            day_type,
            winner: raw.winner,
            loser: raw.loser,
            dma: raw.dma,
            dma_name: raw.dma_name,
            state: raw.state,
            total_wins: raw.total_wins,
            record_count: raw.record_count,
            w28,
            w14,
            w4,
            selected_window,
            n_periods,
            avg_wins,
            stddev_wins,
            z_score,
            pct_change,
            appearance_rank: raw.appearance_rank as u32,
            is_first_appearance,
            is_z_outlier,
            is_pct_outlier,
            is_rare_pair,
            is_outlier,
        });
    }
    Ok(out)
}
