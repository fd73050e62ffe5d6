use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::cube_store::{CubeStore, parse_date};
use crate::error::Result;
use crate::models::cube::{Metric, MoverSegment};
use crate::models::plan::Plan;
use crate::sql;

#[derive(Debug, Clone, Serialize)]
pub struct SharePoint {
    pub date: NaiveDate,
    pub wins: f64,
    pub share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CarrierSeries {
    pub carrier: String,
    pub points: Vec<SharePoint>,
}

/// Before/after national share reconstruction. The base series reads the
/// untouched cube; the suppressed series subtracts each plan row's removal
/// from its (date, winner, loser, dma) cell (floored at zero) and
/// re-normalizes against the recomputed market total. Pure read-side; the
/// cube is never modified.
pub fn preview(
    store: &CubeStore,
    dataset: &str,
    segment: MoverSegment,
    plan: &Plan,
    start: NaiveDate,
    end: NaiveDate,
    carriers: &[String],
) -> Result<(Vec<CarrierSeries>, Vec<CarrierSeries>)> {
    if start > end {
        return Ok((Vec::new(), Vec::new()));
    }
    let table = sql::cube_table(dataset, Metric::Win, segment)?;
    store.require_table(&table)?;

    let mut removals: HashMap<(NaiveDate, String, String, i64), f64> = HashMap::new();
    for row in &plan.rows {
        *removals
            .entry((row.date, row.winner.clone(), row.loser.clone(), row.dma))
            .or_default() += f64::from(row.remove_units);
    }

    struct Cell {
        date: NaiveDate,
        winner: String,
        loser: String,
        dma: i64,
        wins: f64,
    }

    let cells = store.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql::range_rows(&table))?;
        let rows = stmt
            .query_map(
                rusqlite::params![start.to_string(), end.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, f64>(4)?,
                    ))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    let cells: Vec<Cell> = cells
        .into_iter()
        .map(|(date, winner, loser, dma, wins)| {
            Ok(Cell {
                date: parse_date(&date)?,
                winner,
                loser,
                dma,
                wins,
            })
        })
        .collect::<Result<_>>()?;

    // Aggregate to (date, carrier) twice: untouched and with removals applied.
    let mut base_nat: BTreeMap<NaiveDate, HashMap<String, f64>> = BTreeMap::new();
    let mut supp_nat: BTreeMap<NaiveDate, HashMap<String, f64>> = BTreeMap::new();
    for cell in &cells {
        let removed = removals
            .get(&(cell.date, cell.winner.clone(), cell.loser.clone(), cell.dma))
            .copied()
            .unwrap_or(0.0);
        let suppressed = (cell.wins - removed).max(0.0);
        *base_nat
            .entry(cell.date)
            .or_default()
            .entry(cell.winner.clone())
            .or_default() += cell.wins;
        *supp_nat
            .entry(cell.date)
            .or_default()
            .entry(cell.winner.clone())
            .or_default() += suppressed;
    }

    // All-time win ranking gives carriers a stable order across both series.
    let ranking: Vec<String> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(&sql::carrier_ranking(&table))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    let wanted: Option<HashSet<&String>> = if carriers.is_empty() {
        None
    } else {
        Some(carriers.iter().collect())
    };
    let ordered: Vec<&String> = ranking
        .iter()
        .filter(|c| wanted.as_ref().is_none_or(|w| w.contains(c)))
        .collect();

    let series_for = |nat: &BTreeMap<NaiveDate, HashMap<String, f64>>| -> Vec<CarrierSeries> {
        ordered
            .iter()
            .map(|carrier| {
                let points = nat
                    .iter()
                    .map(|(date, by_carrier)| {
                        let market: f64 = by_carrier.values().sum();
                        let wins = by_carrier.get(*carrier).copied().unwrap_or(0.0);
                        let share = if market > 0.0 { wins / market } else { 0.0 };
                        SharePoint {
                            date: *date,
                            wins,
                            share,
                        }
                    })
                    .collect();
                CarrierSeries {
                    carrier: (*carrier).clone(),
                    points,
                }
            })
            .collect()
    };

    Ok((series_for(&base_nat), series_for(&supp_nat)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cube::CubeRecord;
    use crate::models::plan::{Plan, PlanRow, Stage};

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

    fn spike_cube() -> Vec<CubeRecord> {
        let jan1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut rows = Vec::new();
        for day in 1..=30i64 {
            let date = jan1 + chrono::Duration::days(day - 1);
            if day < 30 {
                rows.push(mk(date, "alpha", "beta", 50.0));
                rows.push(mk(date, "alpha", "gamma", 50.0));
            } else {
                rows.push(mk(date, "alpha", "beta", 200.0));
                rows.push(mk(date, "alpha", "gamma", 100.0));
            }
            rows.push(mk(date, "beta", "alpha", 100.0));
            rows.push(mk(date, "gamma", "alpha", 50.0));
        }
        rows
    }

    fn prow(date: NaiveDate, winner: &str, loser: &str, units: u32, wins: f64) -> PlanRow {
        PlanRow {
            date,
            winner: winner.to_string(),
            loser: loser.to_string(),
            dma: 501,
            dma_name: "New York".to_string(),
            state: Some("NY".to_string()),
            mover_ind: true,
            remove_units: units,
            stage: Stage::Auto,
            impact: 200,
            pair_wins_current: wins,
            pair_mu_wins: Some(50.0),
            pair_sigma_wins: Some(1.0),
            pair_z: Some(100.0),
            pair_pct_change: Some(3.0),
            dma_wins: 300.0,
            pair_share: wins / 300.0,
            nat_total_wins: 300.0,
            nat_share_current: 300.0 / 450.0,
            nat_mu_share: 0.4,
            nat_z_score: 50.0,
        }
    }

    fn store_with(rows: &[CubeRecord]) -> CubeStore {
        let store = CubeStore::open_in_memory().unwrap();
        store
            .put_cube("gamoshi", MoverSegment::Mover, Metric::Win, rows)
            .unwrap();
        store
    }

    #[test]
    fn suppressed_series_renormalizes_the_market() {
        let store = store_with(&spike_cube());
        let day30 = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let day29 = NaiveDate::from_ymd_opt(2025, 1, 29).unwrap();
        let plan = Plan {
            rows: vec![
                prow(day30, "alpha", "beta", 150, 200.0),
                prow(day30, "alpha", "gamma", 50, 100.0),
            ],
            ..Plan::default()
        };

        let (base, suppressed) = preview(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            &plan,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            day30,
            &["alpha".to_string()],
        )
        .unwrap();

        assert_eq!(base.len(), 1);
        let base_alpha = &base[0];
        assert_eq!(base_alpha.carrier, "alpha");
        assert_eq!(base_alpha.points.len(), 30);

        let base_d30 = base_alpha.points.last().unwrap();
        assert!((base_d30.share - 300.0 / 450.0).abs() < 1e-12);

        // 200 units removed from alpha: share drops to 100 / 250.
        let supp_d30 = suppressed[0].points.last().unwrap();
        assert!((supp_d30.wins - 100.0).abs() < 1e-12);
        assert!((supp_d30.share - 0.4).abs() < 1e-12);

        // The day before the flag is untouched in both series.
        let base_d29 = base_alpha.points.iter().find(|p| p.date == day29).unwrap();
        let supp_d29 = suppressed[0].points.iter().find(|p| p.date == day29).unwrap();
        assert!((base_d29.share - supp_d29.share).abs() < 1e-12);
        assert!((base_d29.wins - 100.0).abs() < 1e-12);
    }

    #[test]
    fn removals_floor_at_zero() {
        let store = store_with(&spike_cube());
        let day30 = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        // Over-removal on one cell floors that cell at zero rather than
        // going negative, and the market only shrinks by what was there.
        let plan = Plan {
            rows: vec![prow(day30, "alpha", "beta", 1000, 200.0)],
            ..Plan::default()
        };
        let (_, suppressed) = preview(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            &plan,
            day30,
            day30,
            &[],
        )
        .unwrap();
        let alpha = suppressed.iter().find(|s| s.carrier == "alpha").unwrap();
        assert!((alpha.points[0].wins - 100.0).abs() < 1e-12);
        let market: f64 = suppressed
            .iter()
            .map(|s| s.points[0].wins)
            .sum();
        assert!((market - 250.0).abs() < 1e-12);
    }

    #[test]
    fn carriers_ordered_by_all_time_wins() {
        let store = store_with(&spike_cube());
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let (base, _) = preview(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            &Plan::default(),
            start,
            end,
            &[],
        )
        .unwrap();
        let order: Vec<&str> = base.iter().map(|s| s.carrier.as_str()).collect();
        assert_eq!(order, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn empty_range_is_empty() {
        let store = store_with(&spike_cube());
        let day = NaiveDate::from_ymd_opt(2025, 2, 2).unwrap();
        let (base, suppressed) = preview(
            &store,
            "gamoshi",
            MoverSegment::Mover,
            &Plan::default(),
            day,
            day.pred_opt().unwrap(),
            &[],
        )
        .unwrap();
        assert!(base.is_empty() && suppressed.is_empty());
    }
}
