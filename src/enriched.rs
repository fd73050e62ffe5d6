use std::collections::HashMap;

use chrono::NaiveDate;

use crate::config::Thresholds;
use crate::cube_store::CubeStore;
use crate::error::Result;
use crate::models::cube::MoverSegment;
use crate::models::outlier::OutlierFlag;
use crate::models::plan::EnrichedRow;
use crate::rolling::get_rolling;
use crate::scanner::scan_base_outliers;

/// Join pair-level rolling metrics with the national snapshot for every
/// flagged (date, winner). One row per (date, winner, loser, dma); pairs with
/// zero current wins are omitted.
pub fn enrich_flags(
    store: &CubeStore,
    dataset: &str,
    segment: MoverSegment,
    flags: &[OutlierFlag],
    thresholds: &Thresholds,
) -> Result<Vec<EnrichedRow>> {
    if flags.is_empty() {
        return Ok(Vec::new());
    }

    let flag_map: HashMap<(NaiveDate, &str), &OutlierFlag> = flags
        .iter()
        .map(|f| ((f.date, f.winner.as_str()), f))
        .collect();

    let rolling = get_rolling(store, dataset, segment, thresholds)?;
    let hits: Vec<_> = rolling
        .into_iter()
        .filter(|r| {
            r.total_wins > 0.0 && flag_map.contains_key(&(r.date, r.winner.as_str()))
        })
        .collect();

    // Winner's wins per DMA on the flag date, across all losers.
    let mut dma_wins: HashMap<(NaiveDate, String, i64), f64> = HashMap::new();
    for r in &hits {
        *dma_wins
            .entry((r.date, r.winner.clone(), r.dma))
            .or_default() += r.total_wins;
    }

    let mut out = Vec::with_capacity(hits.len());
    for r in hits {
        let flag = flag_map[&(r.date, r.winner.as_str())];
        let dma_total = dma_wins[&(r.date, r.winner.clone(), r.dma)];
        out.push(EnrichedRow {
            date: r.date,
            winner: r.winner,
            loser: r.loser,
            dma: r.dma,
            dma_name: r.dma_name,
            state: r.state,
            pair_wins_current: r.total_wins,
            pair_mu_wins: r.avg_wins,
            pair_sigma_wins: r.stddev_wins,
            pair_z: r.z_score,
            pair_pct_change: r.pct_change,
            pair_outlier_pos: r.is_z_outlier,
            pct_outlier_pos: r.is_pct_outlier,
            rare_pair: r.is_rare_pair,
            new_pair: r.is_first_appearance,
            dma_wins: dma_total,
            pair_share: r.total_wins / dma_total,
            nat_total_wins: flag.nat_total_wins,
            nat_share_current: flag.nat_share_current,
            nat_mu_share: flag.nat_mu_share,
            nat_z_score: flag.nat_z_score,
        });
    }
    out.sort_by(|a, b| {
        (a.date, &a.winner, a.dma, &a.loser).cmp(&(b.date, &b.winner, b.dma, &b.loser))
    });
    Ok(out)
}

/// Scan plus enrich in one call, for callers that don't hold a flag set yet.
pub fn build_enriched_cube(
    store: &CubeStore,
    dataset: &str,
    segment: MoverSegment,
    start: NaiveDate,
    end: NaiveDate,
    thresholds: &Thresholds,
) -> Result<Vec<EnrichedRow>> {
    let flags = scan_base_outliers(store, dataset, segment, start, end, thresholds)?;
    enrich_flags(store, dataset, segment, &flags, thresholds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cube::{CubeRecord, Metric};

    fn mk(date: NaiveDate, winner: &str, loser: &str, dma: i64, wins: f64) -> CubeRecord {
        CubeRecord {
            date,
            winner: winner.to_string(),
            loser: loser.to_string(),
            dma,
            dma_name: format!("DMA {dma}"),
            state: Some("NY".to_string()),
            total_wins: wins,
            total_losses: 0.0,
            record_count: 1,
        }
    }

    /// Constant-share market with an alpha spike on day 30, split 200 vs
    /// beta and 100 vs gamma.
    fn spike_cube() -> Vec<CubeRecord> {
        let jan1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut rows = Vec::new();
        for day in 1..=30i64 {
            let date = jan1 + chrono::Duration::days(day - 1);
            let scale = if day % 2 == 1 { 98.0 } else { 102.0 };
            if day < 30 {
                rows.push(mk(date, "alpha", "beta", 501, scale / 2.0));
                rows.push(mk(date, "alpha", "gamma", 501, scale / 2.0));
            } else {
                rows.push(mk(date, "alpha", "beta", 501, 200.0));
                rows.push(mk(date, "alpha", "gamma", 501, 100.0));
            }
            rows.push(mk(date, "beta", "alpha", 501, scale));
            rows.push(mk(date, "gamma", "alpha", 501, scale / 2.0));
        }
        rows
    }

    fn scan_range() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
        )
    }

    #[test]
    fn projection_covers_flagged_pairs_only() {
        let store = CubeStore::open_in_memory().unwrap();
        store
            .put_cube("gamoshi", MoverSegment::Mover, Metric::Win, &spike_cube())
            .unwrap();
        let (start, end) = scan_range();
        let rows = build_enriched_cube(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            start,
            end,
            &Thresholds::default(),
        )
        .unwrap();

        // One flag (alpha, day 30) with two losing pairs.
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.winner == "alpha" && r.date == end));

        let vs_beta = rows.iter().find(|r| r.loser == "beta").unwrap();
        assert!((vs_beta.pair_wins_current - 200.0).abs() < 1e-9);
        assert!((vs_beta.pair_mu_wins.unwrap() - 50.0).abs() < 1e-9);
        assert!(vs_beta.pair_outlier_pos);
        assert!((vs_beta.dma_wins - 300.0).abs() < 1e-9);
        assert!((vs_beta.pair_share - 200.0 / 300.0).abs() < 1e-9);
        assert!((vs_beta.nat_mu_share - 0.4).abs() < 1e-9);

        let vs_gamma = rows.iter().find(|r| r.loser == "gamma").unwrap();
        assert!((vs_gamma.pair_share - 100.0 / 300.0).abs() < 1e-9);
    }

    #[test]
    fn zero_win_pairs_never_appear() {
        let mut cube = spike_cube();
        let end = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        cube.push(mk(end, "alpha", "delta", 501, 0.0));
        let store = CubeStore::open_in_memory().unwrap();
        store
            .put_cube("gamoshi", MoverSegment::Mover, Metric::Win, &cube)
            .unwrap();
        let (start, end) = scan_range();
        let rows = build_enriched_cube(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            start,
            end,
            &Thresholds::default(),
        )
        .unwrap();
        assert!(rows.iter().all(|r| r.loser != "delta"));
        assert!(rows.iter().all(|r| r.pair_wins_current > 0.0));
    }

    #[test]
    fn no_flags_means_empty_projection() {
        let store = CubeStore::open_in_memory().unwrap();
        store
            .put_cube("gamoshi", MoverSegment::Mover, Metric::Win, &spike_cube())
            .unwrap();
        let rows = enrich_flags(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            &[],
            &Thresholds::default(),
        )
        .unwrap();
        assert!(rows.is_empty());
    }
}
