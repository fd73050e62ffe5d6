use std::collections::HashSet;

use chrono::NaiveDate;

use crate::config::Thresholds;
use crate::cube_store::{CubeStore, parse_date};
use crate::error::{EngineError, Result};
use crate::models::cube::{DayType, Metric, MoverSegment};
use crate::models::outlier::OutlierFlag;
use crate::rolling::{select_tier, window_stats};
use crate::sql;

/// One national series observation with its tiered rolling baseline, before
/// any gating.
struct NationalRow {
    pub date: NaiveDate,
    pub day_type: DayType,
    pub winner: String,
    pub nat_wins: f64,
    pub market_wins: f64,
    pub share: f64,
    pub selected_window: Option<u32>,
    pub avg_wins: Option<f64>,
    pub stddev_wins: Option<f64>,
    pub mu_share: Option<f64>,
}

fn national_rows(
    store: &CubeStore,
    dataset: &str,
    segment: MoverSegment,
) -> Result<Vec<NationalRow>> {
    let table = sql::cube_table(dataset, Metric::Win, segment)?;
    store.require_table(&table)?;

    struct Raw {
        date: String,
        day_type: String,
        min_periods: i64,
        winner: String,
        nat_wins: f64,
        market_wins: f64,
        share: f64,
        windows: [(i64, Option<f64>, Option<f64>, Option<f64>); 3],
    }

    let raw_rows = store.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql::national_rolling(&table))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Raw {
                    date: row.get(0)?,
                    day_type: row.get(1)?,
                    min_periods: row.get(2)?,
                    winner: row.get(3)?,
                    nat_wins: row.get(4)?,
                    market_wins: row.get(5)?,
                    share: row.get(6)?,
                    windows: [
                        (row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?),
                        (row.get(11)?, row.get(12)?, row.get(13)?, row.get(14)?),
                        (row.get(15)?, row.get(16)?, row.get(17)?, row.get(18)?),
                    ],
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    let mut out = Vec::with_capacity(raw_rows.len());
    for raw in raw_rows {
        let date = parse_date(&raw.date)?;
        let day_type = DayType::parse(&raw.day_type).ok_or_else(|| EngineError::CubeIntegrity {
            reason: format!("unknown day type '{}' in national series", raw.day_type),
        })?;

        let stats: Vec<_> = raw
            .windows
            .iter()
            .map(|(n, s, q, _)| window_stats(*n, *s, *q))
            .collect();
        let selected = select_tier(&stats[0], &stats[1], &stats[2], raw.min_periods as u32);

        let (selected_window, avg_wins, stddev_wins, mu_share) = match selected {
            Some((window, chosen)) => {
                let idx = match window {
                    28 => 0,
                    14 => 1,
                    _ => 2,
                };
                let (n, _, _, share_sum) = raw.windows[idx];
                let mu = share_sum.map(|h| h / n as f64);
                (Some(window), chosen.avg_wins, chosen.stddev_wins, mu)
            }
            None => (None, None, None, None),
        };

        out.push(NationalRow {
            date,
            day_type,
            winner: raw.winner,
            nat_wins: raw.nat_wins,
            market_wins: raw.market_wins,
            share: raw.share,
            selected_window,
            avg_wins,
            stddev_wins,
            mu_share,
        });
    }
    Ok(out)
}

/// Scan the national series for dates where a carrier's win volume deviates
/// from its same-day-type baseline. Admission is two-tier: the top-N carriers
/// by all-time wins, plus any carrier whose single-day impact is egregious
/// enough to matter regardless of size.
pub fn scan_base_outliers(
    store: &CubeStore,
    dataset: &str,
    segment: MoverSegment,
    start: NaiveDate,
    end: NaiveDate,
    thresholds: &Thresholds,
) -> Result<Vec<OutlierFlag>> {
    thresholds.validate()?;
    if start > end {
        return Ok(Vec::new());
    }

    let top: HashSet<String> = store
        .get_top_n_carriers(
            dataset,
            segment,
            thresholds.top_n_carriers,
            thresholds.min_share_pct,
        )?
        .into_iter()
        .collect();

    let rows = national_rows(store, dataset, segment)?;
    let mut flags = Vec::new();
    for row in rows {
        if row.date < start || row.date > end {
            continue;
        }
        let (Some(window), Some(avg), Some(sd), Some(mu_share)) = (
            row.selected_window,
            row.avg_wins,
            row.stddev_wins,
            row.mu_share,
        ) else {
            continue;
        };
        if sd <= 0.0 {
            continue;
        }

        let impact_f = row.nat_wins - avg;
        let impact = impact_f.round_ties_even() as i64;
        let z = impact_f / sd;

        let admitted = top.contains(&row.winner) || impact as f64 > thresholds.egregious_impact;
        if !admitted || impact <= 0 || z < thresholds.nat_z_threshold {
            continue;
        }

        flags.push(OutlierFlag {
            date: row.date,
            winner: row.winner,
            day_type: row.day_type,
            nat_total_wins: row.nat_wins,
            market_wins: row.market_wins,
            baseline_wins: avg,
            impact,
            nat_z_score: z,
            nat_share_current: row.share,
            nat_mu_share: mu_share,
            selected_window: window,
        });
    }

    flags.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then(b.impact.cmp(&a.impact))
            .then(a.winner.cmp(&b.winner))
    });

    tracing::info!(
        "scanner: {dataset}/{} {start}..{end} — {} flag(s), {} top-N carrier(s)",
        segment.as_str(),
        flags.len(),
        top.len(),
    );
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cube::CubeRecord;

    fn mk(date: NaiveDate, winner: &str, loser: &str, wins: f64) -> CubeRecord {
        CubeRecord {
            date,
            winner: winner.to_string(),
            loser: loser.to_string(),
            dma: 501,
            dma_name: "New York".to_string(),
            state: Some("NY".to_string()),
            total_wins: wins,
            total_losses: 0.0,
            record_count: 1,
        }
    }

    /// 30 days of a three-carrier market where every carrier's volume swings
    /// with the market, so national shares stay constant (alpha 0.4, beta
    /// 0.4, gamma 0.2), then alpha spikes to 300 wins on day 30.
    fn spike_cube() -> Vec<CubeRecord> {
        let jan1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut rows = Vec::new();
        for day in 1..=30i64 {
            let date = jan1 + chrono::Duration::days(day - 1);
            let scale = if day % 2 == 1 { 98.0 } else { 102.0 };
            if day < 30 {
                rows.push(mk(date, "alpha", "beta", scale / 2.0));
                rows.push(mk(date, "alpha", "gamma", scale / 2.0));
            } else {
                rows.push(mk(date, "alpha", "beta", 200.0));
                rows.push(mk(date, "alpha", "gamma", 100.0));
            }
            rows.push(mk(date, "beta", "alpha", scale));
            rows.push(mk(date, "gamma", "alpha", scale / 2.0));
        }
        rows
    }

    fn store_with(rows: &[CubeRecord]) -> CubeStore {
        let store = CubeStore::open_in_memory().unwrap();
        store
            .put_cube("gamoshi", MoverSegment::Mover, Metric::Win, rows)
            .unwrap();
        store
    }

    #[test]
    fn national_spike_is_flagged_once() {
        let store = store_with(&spike_cube());
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let flags = scan_base_outliers(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            start,
            end,
            &Thresholds::default(),
        )
        .unwrap();

        assert_eq!(flags.len(), 1);
        let flag = &flags[0];
        assert_eq!(flag.winner, "alpha");
        assert_eq!(flag.date, end);
        // Baseline is exactly 100: ten odd and ten even weekdays precede the
        // spike inside the 28-day window.
        assert_eq!(flag.impact, 200);
        assert!((flag.baseline_wins - 100.0).abs() < 1e-9);
        assert!(flag.nat_z_score > 2.5);
        assert_eq!(flag.selected_window, 28);
        assert!((flag.nat_mu_share - 0.4).abs() < 1e-9);
        assert!((flag.nat_total_wins - 300.0).abs() < 1e-9);
        assert!((flag.market_wins - 453.0).abs() < 1e-9);
    }

    #[test]
    fn raising_z_threshold_empties_the_flag_set() {
        let store = store_with(&spike_cube());
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let strict = Thresholds {
            nat_z_threshold: 1.0e6,
            ..Thresholds::default()
        };
        let flags =
            scan_base_outliers(&store, "gamoshi", MoverSegment::Mover, start, end, &strict)
                .unwrap();
        assert!(flags.is_empty());
    }

    #[test]
    fn empty_range_yields_no_flags() {
        let store = store_with(&spike_cube());
        let start = NaiveDate::from_ymd_opt(2025, 2, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();
        let flags = scan_base_outliers(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            start,
            end,
            &Thresholds::default(),
        )
        .unwrap();
        assert!(flags.is_empty());
    }

    #[test]
    fn range_filter_excludes_out_of_window_flags() {
        let store = store_with(&spike_cube());
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 29).unwrap();
        let flags = scan_base_outliers(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            start,
            end,
            &Thresholds::default(),
        )
        .unwrap();
        assert!(flags.is_empty());
    }

    #[test]
    fn egregious_impact_admits_long_tail_carrier() {
        let jan1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut rows = Vec::new();
        for day in 1..=30i64 {
            let date = jan1 + chrono::Duration::days(day - 1);
            rows.push(mk(date, "alpha", "beta", 500.0));
            rows.push(mk(date, "beta", "alpha", 300.0));
            let small = if day % 2 == 1 { 1.0 } else { 3.0 };
            if day < 30 {
                rows.push(mk(date, "gamma", "alpha", small));
            } else {
                rows.push(mk(date, "gamma", "alpha", 60.0));
            }
        }
        let store = store_with(&rows);
        let start = jan1;
        let end = jan1 + chrono::Duration::days(29);

        // gamma is far outside the top-1 set, but its 58-win excess clears
        // the egregious-impact gate.
        let narrow = Thresholds {
            top_n_carriers: 1,
            ..Thresholds::default()
        };
        let flags =
            scan_base_outliers(&store, "gamoshi", MoverSegment::Mover, start, end, &narrow)
                .unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].winner, "gamma");
        assert_eq!(flags[0].impact, 58);
    }

    #[test]
    fn invalid_thresholds_rejected_at_boundary() {
        let store = store_with(&spike_cube());
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let bad = Thresholds {
            nat_z_threshold: -2.5,
            ..Thresholds::default()
        };
        let err = scan_base_outliers(&store, "gamoshi", MoverSegment::Mover, start, end, &bad)
            .unwrap_err();
        assert!(matches!(err, EngineError::ThresholdOutOfRange { .. }));
    }
}
