use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use tracing_subscriber::EnvFilter;

use h2h_suppress::config::EngineConfig;
use h2h_suppress::cube_store::CubeStore;
use h2h_suppress::enriched::enrich_flags;
use h2h_suppress::models::cube::{Metric, MoverSegment};
use h2h_suppress::planner::{build_plan, refine_surgical};
use h2h_suppress::rounds::save_plan;
use h2h_suppress::scanner::scan_base_outliers;
use h2h_suppress::sql;

/// One-shot engine run: scan a dataset for national outliers, build the
/// two-stage suppression plan, and persist it as a round.
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("h2h_suppress=debug")),
        )
        .init();

    let config_path =
        std::env::var("SUPPRESS_CONFIG").unwrap_or_else(|_| "./suppress.toml".to_string());
    let config = EngineConfig::load(&config_path)?;

    let dataset = std::env::var("SUPPRESS_DATASET")
        .context("SUPPRESS_DATASET environment variable not set")?;
    let segment = match std::env::var("SUPPRESS_SEGMENT").as_deref() {
        Ok("non_mover") => MoverSegment::NonMover,
        _ => MoverSegment::Mover,
    };

    let db_path = std::env::var("SUPPRESS_DB").unwrap_or(config.storage.db_path.clone());
    let store = CubeStore::open(&db_path)?;
    tracing::info!("cube store opened at {db_path}");

    let (start, end) = analysis_range(&store, &dataset, segment)?;
    tracing::info!("plan-engine: {dataset}/{} over {start}..{end}", segment.as_str());

    let thresholds = config.thresholds.clone();
    let flags = scan_base_outliers(&store, &dataset, segment, start, end, &thresholds)?;
    if flags.is_empty() {
        tracing::info!("plan-engine: no outliers flagged, nothing to plan");
        return Ok(());
    }

    let enriched = enrich_flags(&store, &dataset, segment, &flags, &thresholds)?;
    let mut plan = build_plan(&flags, &enriched, &thresholds, segment)?;
    if config.plan.surgical {
        refine_surgical(&store, &dataset, segment, &mut plan, config.plan.surgical_top_k)?;
    }

    let total_units: u32 = plan.rows.iter().map(|r| r.remove_units).sum();
    tracing::info!(
        "plan-engine: {} flag(s) -> {} row(s), {} unit(s) to remove",
        flags.len(),
        plan.rows.len(),
        total_units,
    );

    let round_name =
        std::env::var("SUPPRESS_ROUND").unwrap_or_else(|_| format!("{dataset}_{end}").replace('-', "_"));
    let overwrite = std::env::var("SUPPRESS_OVERWRITE").is_ok_and(|v| v == "1" || v == "true");
    let rounds_dir =
        std::env::var("SUPPRESS_ROUNDS_DIR").unwrap_or(config.storage.rounds_dir.clone());
    let path = save_plan(&plan, &PathBuf::from(rounds_dir), &round_name, overwrite)?;
    tracing::info!("plan-engine: round saved to {}", path.display());

    Ok(())
}

/// Explicit SUPPRESS_START/SUPPRESS_END, falling back to the last 90 days of
/// the dataset's win cube.
fn analysis_range(
    store: &CubeStore,
    dataset: &str,
    segment: MoverSegment,
) -> anyhow::Result<(NaiveDate, NaiveDate)> {
    let explicit_start = std::env::var("SUPPRESS_START").ok();
    let explicit_end = std::env::var("SUPPRESS_END").ok();
    if let (Some(s), Some(e)) = (&explicit_start, &explicit_end) {
        let start = NaiveDate::parse_from_str(s, "%Y-%m-%d").context("bad SUPPRESS_START")?;
        let end = NaiveDate::parse_from_str(e, "%Y-%m-%d").context("bad SUPPRESS_END")?;
        return Ok((start, end));
    }

    let table = sql::cube_table(dataset, Metric::Win, segment)?;
    let cube = store
        .list_cubes()?
        .into_iter()
        .find(|c| c.name == table)
        .with_context(|| format!("cube table {table} not found"))?;
    let end = cube
        .last_date
        .with_context(|| format!("cube table {table} is empty"))?;
    let start = end - chrono::Duration::days(89);
    Ok((start, end))
}
