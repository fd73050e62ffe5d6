use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::config::Thresholds;
use crate::cube_store::CubeStore;
use crate::error::Result;
use crate::models::cube::{Metric, MoverSegment};
use crate::models::outlier::OutlierFlag;
use crate::models::plan::{
    BlockRemoval, EnrichedRow, InsufficientThresholdCase, Plan, PlanRow, SkippedFlag, Stage,
};
use crate::rolling::window_stats;
use crate::sql;

/// Market-preserving removal target. Removing wins shrinks the market too, so
/// the naive `W - mu * T` undershoots; the quantity solving
/// `(W - X) / (T - X) = mu` is `(W - mu * T) / (1 - mu)`.
pub fn need_units(nat_wins: f64, market_wins: f64, mu_share: f64) -> u32 {
    let denom = (1.0 - mu_share).max(1e-12);
    let need = (nat_wins - mu_share * market_wins) / denom;
    if !need.is_finite() || need <= 0.0 {
        0
    } else {
        need.ceil() as u32
    }
}

/// Proportional integer allocation with largest-remainder reconciliation.
/// Returns one removal count per capacity; the counts sum to
/// `min(need, sum of whole-win capacities)` and never exceed a pair's
/// capacity.
pub(crate) fn largest_remainder(capacities: &[f64], need: u32) -> Vec<u32> {
    let mut rm = vec![0u32; capacities.len()];
    if capacities.is_empty() || need == 0 {
        return rm;
    }
    let caps: Vec<u32> = capacities.iter().map(|c| c.max(0.0).floor() as u32).collect();
    let total_f: f64 = capacities.iter().sum();
    let total_cap: u64 = caps.iter().map(|&c| u64::from(c)).sum();
    if total_f <= 0.0 || total_cap == 0 {
        return rm;
    }
    let target = u64::from(need).min(total_cap);

    let quotas: Vec<f64> = capacities
        .iter()
        .map(|c| c / total_f * f64::from(need))
        .collect();
    for (i, q) in quotas.iter().enumerate() {
        rm[i] = (q.round() as u32).min(caps[i]);
    }

    let mut assigned: u64 = rm.iter().map(|&r| u64::from(r)).sum();
    if assigned != target {
        // Rank by fractional part; the largest fractions gain first, the
        // smallest lose first.
        let mut order: Vec<usize> = (0..capacities.len()).collect();
        order.sort_by(|&a, &b| {
            let fa = quotas[a] - quotas[a].floor();
            let fb = quotas[b] - quotas[b].floor();
            fb.partial_cmp(&fa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    capacities[b]
                        .partial_cmp(&capacities[a])
                        .unwrap_or(Ordering::Equal)
                })
                .then(a.cmp(&b))
        });
        while assigned < target {
            let mut moved = false;
            for &i in &order {
                if assigned == target {
                    break;
                }
                if rm[i] < caps[i] {
                    rm[i] += 1;
                    assigned += 1;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
        while assigned > target {
            let mut moved = false;
            for &i in order.iter().rev() {
                if assigned == target {
                    break;
                }
                if rm[i] > 0 {
                    rm[i] -= 1;
                    assigned -= 1;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
    }
    rm
}

fn plan_row(e: &EnrichedRow, flag: &OutlierFlag, segment: MoverSegment, units: u32, stage: Stage) -> PlanRow {
    PlanRow {
        date: e.date,
        winner: e.winner.clone(),
        loser: e.loser.clone(),
        dma: e.dma,
        dma_name: e.dma_name.clone(),
        state: e.state.clone(),
        mover_ind: segment.mover_ind(),
        remove_units: units,
        stage,
        impact: flag.impact,
        pair_wins_current: e.pair_wins_current,
        pair_mu_wins: e.pair_mu_wins,
        pair_sigma_wins: e.pair_sigma_wins,
        pair_z: e.pair_z,
        pair_pct_change: e.pair_pct_change,
        dma_wins: e.dma_wins,
        pair_share: e.pair_share,
        nat_total_wins: e.nat_total_wins,
        nat_share_current: e.nat_share_current,
        nat_mu_share: e.nat_mu_share,
        nat_z_score: e.nat_z_score,
    }
}

/// Two-stage allocation over the enriched projection. Stage 1 targets pairs
/// the DMA-level predicates singled out, in severity order; stage 2 spreads
/// any remaining need proportionally over the untouched pairs above the
/// distributed minimum.
pub fn build_plan(
    flags: &[OutlierFlag],
    enriched: &[EnrichedRow],
    thresholds: &Thresholds,
    segment: MoverSegment,
) -> Result<Plan> {
    thresholds.validate()?;

    let mut by_flag: HashMap<(NaiveDate, &str), Vec<&EnrichedRow>> = HashMap::new();
    for row in enriched {
        by_flag
            .entry((row.date, row.winner.as_str()))
            .or_default()
            .push(row);
    }

    let mut plan = Plan::default();
    for flag in flags {
        let Some(rows) = by_flag.get(&(flag.date, flag.winner.as_str())) else {
            plan.diagnostics.skipped_flags.push(SkippedFlag {
                date: flag.date,
                winner: flag.winner.clone(),
                reason: "no pairs in enriched projection".to_string(),
            });
            continue;
        };

        let need = need_units(flag.nat_total_wins, flag.market_wins, flag.nat_mu_share);
        if need == 0 {
            plan.diagnostics.skipped_flags.push(SkippedFlag {
                date: flag.date,
                winner: flag.winner.clone(),
                reason: "zero removal need".to_string(),
            });
            continue;
        }

        // Stage 1 (auto): only pairs the predicates singled out, with enough
        // current volume to be worth touching.
        let mut candidates: Vec<&EnrichedRow> = rows
            .iter()
            .copied()
            .filter(|r| {
                (r.pair_outlier_pos || r.pct_outlier_pos || r.rare_pair || r.new_pair)
                    && r.pair_wins_current >= thresholds.auto_min_wins
            })
            .collect();
        candidates.sort_by(|a, b| {
            let za = a.pair_z.unwrap_or(f64::NEG_INFINITY);
            let zb = b.pair_z.unwrap_or(f64::NEG_INFINITY);
            zb.partial_cmp(&za)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.pair_wins_current
                        .partial_cmp(&a.pair_wins_current)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| (&a.loser, a.dma).cmp(&(&b.loser, b.dma)))
        });

        let mut remaining = need;
        let mut used: HashSet<(&str, i64)> = HashSet::new();
        let mut auto_total = 0u32;
        for cand in candidates {
            if remaining == 0 {
                break;
            }
            let cap = cand.pair_wins_current.floor() as u32;
            // Rare and new pairs have no baseline worth preserving; remove
            // everything. Established pairs give up only the excess.
            let proposed = if cand.new_pair || cand.pair_mu_wins.is_none_or(|mu| mu < 5.0) {
                cap
            } else {
                let mu = cand.pair_mu_wins.unwrap_or(0.0);
                ((cand.pair_wins_current - mu).max(0.0).ceil() as u32).min(cap)
            };
            let units = proposed.min(remaining);
            if units == 0 {
                continue;
            }
            remaining -= units;
            auto_total += units;
            used.insert((cand.loser.as_str(), cand.dma));
            plan.rows.push(plan_row(cand, flag, segment, units, Stage::Auto));
        }

        // Stage 2 (distributed): proportional to remaining capacity.
        let mut distributed_total = 0u32;
        if remaining > 0 {
            let mut eligible: Vec<&EnrichedRow> = rows
                .iter()
                .copied()
                .filter(|r| {
                    !used.contains(&(r.loser.as_str(), r.dma))
                        && r.pair_wins_current >= thresholds.distributed_min_wins
                })
                .collect();
            if eligible.is_empty() {
                plan.diagnostics
                    .insufficient_threshold_cases
                    .push(InsufficientThresholdCase {
                        date: flag.date,
                        winner: flag.winner.clone(),
                        need_remaining: remaining,
                        unreachable: true,
                    });
            } else {
                eligible.sort_by(|a, b| {
                    b.pair_wins_current
                        .partial_cmp(&a.pair_wins_current)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| (&a.loser, a.dma).cmp(&(&b.loser, b.dma)))
                });
                let caps: Vec<f64> = eligible.iter().map(|r| r.pair_wins_current).collect();
                let allocation = largest_remainder(&caps, remaining);
                for (&row, units) in eligible.iter().zip(allocation) {
                    if units == 0 {
                        continue;
                    }
                    distributed_total += units;
                    plan.rows
                        .push(plan_row(row, flag, segment, units, Stage::Distributed));
                }
                if distributed_total < remaining {
                    plan.diagnostics
                        .insufficient_threshold_cases
                        .push(InsufficientThresholdCase {
                            date: flag.date,
                            winner: flag.winner.clone(),
                            need_remaining: remaining - distributed_total,
                            unreachable: true,
                        });
                }
            }
        }

        tracing::debug!(
            "planner: {} {} — need {need}, auto {auto_total}, distributed {distributed_total}",
            flag.date,
            flag.winner,
        );
    }

    tracing::info!(
        "planner: {} flag(s) -> {} row(s), {} insufficient, {} skipped",
        flags.len(),
        plan.rows.len(),
        plan.diagnostics.insufficient_threshold_cases.len(),
        plan.diagnostics.skipped_flags.len(),
    );
    Ok(plan)
}

/// Census-block refinement of stage-1 rows. For each auto row, the worst
/// blocks by same-day-type z-score absorb the row's removal, up to `top_k`
/// blocks. The DMA-level totals are untouched; block rows only add detail,
/// and a row whose blocks cannot absorb everything keeps the residual at the
/// DMA grain. Silently skipped when no census cube exists.
pub fn refine_surgical(
    store: &CubeStore,
    dataset: &str,
    segment: MoverSegment,
    plan: &mut Plan,
    top_k: usize,
) -> Result<()> {
    let table = sql::census_cube_table(dataset, Metric::Win, segment)?;
    if !store.table_exists(&table)? {
        tracing::debug!("surgical refinement skipped: {table} not present");
        return Ok(());
    }

    struct BlockStat {
        block_id: String,
        wins: f64,
        z: Option<f64>,
    }

    let mut block_rows = Vec::new();
    for row in plan.rows.iter().filter(|r| r.stage == Stage::Auto) {
        let stats = store.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql::census_block_stats(&table))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![row.winner, row.loser, row.dma, row.date.to_string()],
                    |r| {
                        let wins: f64 = r.get(1)?;
                        let n: i64 = r.get(2)?;
                        let s: Option<f64> = r.get(3)?;
                        let q: Option<f64> = r.get(4)?;
                        Ok((r.get::<_, String>(0)?, wins, n, s, q))
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut blocks: Vec<BlockStat> = stats
            .into_iter()
            .map(|(block_id, wins, n, s, q)| {
                let w = window_stats(n, s, q);
                let z = match (w.avg_wins, w.stddev_wins) {
                    (Some(avg), Some(sd)) if sd > 0.0 => Some((wins - avg) / sd),
                    _ => None,
                };
                BlockStat { block_id, wins, z }
            })
            .collect();
        blocks.sort_by(|a, b| {
            let za = a.z.unwrap_or(f64::NEG_INFINITY);
            let zb = b.z.unwrap_or(f64::NEG_INFINITY);
            zb.partial_cmp(&za)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.wins.partial_cmp(&a.wins).unwrap_or(Ordering::Equal))
                .then_with(|| a.block_id.cmp(&b.block_id))
        });

        let mut remaining = row.remove_units;
        for block in blocks.into_iter().take(top_k) {
            if remaining == 0 {
                break;
            }
            let units = (block.wins.floor() as u32).min(remaining);
            if units == 0 {
                continue;
            }
            remaining -= units;
            block_rows.push(BlockRemoval {
                date: row.date,
                winner: row.winner.clone(),
                loser: row.loser.clone(),
                dma: row.dma,
                dma_name: row.dma_name.clone(),
                census_block_id: block.block_id,
                remove_units: units,
                block_z: block.z,
            });
        }
    }

    tracing::info!("surgical refinement: {} block row(s)", block_rows.len());
    plan.block_rows = block_rows;
    Ok(())
}
