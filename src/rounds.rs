use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::models::plan::{Plan, RoundInfo, Stage};

/// Column order of the round CSV. This is the export contract consumed by
/// the dashboard collaborator; booleans serialize as `True`/`False`.
const HEADER: [&str; 20] = [
    "date",
    "winner",
    "loser",
    "dma_name",
    "state",
    "mover_ind",
    "remove_units",
    "stage",
    "impact",
    "pair_wins_current",
    "pair_mu_wins",
    "pair_sigma_wins",
    "pair_z",
    "pair_pct_change",
    "dma_wins",
    "pair_share",
    "nat_total_wins",
    "nat_share_current",
    "nat_mu_share",
    "nat_z_score",
];

/// One parsed row of a persisted round, mirroring the CSV contract.
#[derive(Debug, Clone, Serialize)]
pub struct RoundRow {
    pub date: NaiveDate,
    pub winner: String,
    pub loser: String,
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

fn validate_round_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(EngineError::InvalidIdentifier(name.to_string()))
    }
}

fn round_path(rounds_dir: &Path, name: &str) -> PathBuf {
    rounds_dir.join(format!("{name}.csv"))
}

fn fmt_bool(b: bool) -> &'static str {
    if b { "True" } else { "False" }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|f| f.to_string()).unwrap_or_default()
}

/// Persist a plan under `round_name`. Refuses to replace an existing round
/// unless `overwrite` is set; the write is all-or-nothing (temp file then
/// rename), so a failed save never leaves a partial round behind.
pub fn save_plan(
    plan: &Plan,
    rounds_dir: &Path,
    round_name: &str,
    overwrite: bool,
) -> Result<PathBuf> {
    validate_round_name(round_name)?;
    plan.validate()?;

    fs::create_dir_all(rounds_dir)?;
    let path = round_path(rounds_dir, round_name);
    if path.exists() && !overwrite {
        return Err(EngineError::RoundExists {
            name: round_name.to_string(),
        });
    }

    let tmp = rounds_dir.join(format!(".{round_name}.csv.tmp"));
    {
        let file = fs::File::create(&tmp)?;
        let mut w = csv::Writer::from_writer(file);
        w.write_record(HEADER)?;
        for row in &plan.rows {
            w.write_record([
                row.date.to_string(),
                row.winner.clone(),
                row.loser.clone(),
                row.dma_name.clone(),
                row.state.clone().unwrap_or_default(),
                fmt_bool(row.mover_ind).to_string(),
                row.remove_units.to_string(),
                row.stage.as_str().to_string(),
                row.impact.to_string(),
                row.pair_wins_current.to_string(),
                fmt_opt(row.pair_mu_wins),
                fmt_opt(row.pair_sigma_wins),
                fmt_opt(row.pair_z),
                fmt_opt(row.pair_pct_change),
                row.dma_wins.to_string(),
                row.pair_share.to_string(),
                row.nat_total_wins.to_string(),
                row.nat_share_current.to_string(),
                row.nat_mu_share.to_string(),
                row.nat_z_score.to_string(),
            ])?;
        }
        w.flush()?;
    }
    fs::rename(&tmp, &path)?;

    // Surgical block detail rides alongside the main round file.
    if !plan.block_rows.is_empty() {
        let blocks_tmp = rounds_dir.join(format!(".{round_name}_blocks.csv.tmp"));
        {
            let file = fs::File::create(&blocks_tmp)?;
            let mut w = csv::Writer::from_writer(file);
            w.write_record([
                "date",
                "winner",
                "loser",
                "dma_name",
                "census_block_id",
                "remove_units",
                "block_z",
            ])?;
            for b in &plan.block_rows {
                w.write_record([
                    b.date.to_string(),
                    b.winner.clone(),
                    b.loser.clone(),
                    b.dma_name.clone(),
                    b.census_block_id.clone(),
                    b.remove_units.to_string(),
                    fmt_opt(b.block_z),
                ])?;
            }
            w.flush()?;
        }
        fs::rename(&blocks_tmp, rounds_dir.join(format!("{round_name}_blocks.csv")))?;
    }

    tracing::info!(
        "round '{round_name}': {} row(s) written to {}",
        plan.rows.len(),
        path.display()
    );
    Ok(path)
}

/// Inventory of persisted rounds, newest first.
pub fn list_rounds(rounds_dir: &Path) -> Result<Vec<RoundInfo>> {
    let mut rounds = Vec::new();
    if !rounds_dir.exists() {
        return Ok(rounds);
    }
    for entry in fs::read_dir(rounds_dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".csv") else {
            continue;
        };
        if stem.starts_with('.') || stem.ends_with("_blocks") {
            continue;
        }
        let row_count = csv::Reader::from_path(&path)?.into_records().count();
        let modified_at = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(|t| DateTime::<Utc>::from(t).format("%Y-%m-%dT%H:%M:%SZ").to_string());
        rounds.push(RoundInfo {
            name: stem.to_string(),
            row_count,
            modified_at,
        });
    }
    rounds.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then(a.name.cmp(&b.name)));
    Ok(rounds)
}

fn field<'a>(record: &'a csv::StringRecord, idx: usize) -> &'a str {
    record.get(idx).unwrap_or_default()
}

fn parse_field<T: std::str::FromStr>(record: &csv::StringRecord, idx: usize, name: &str) -> Result<T> {
    field(record, idx)
        .parse()
        .map_err(|_| EngineError::CubeIntegrity {
            reason: format!("round csv: bad {name} '{}'", field(record, idx)),
        })
}

fn parse_opt_f64(record: &csv::StringRecord, idx: usize) -> Option<f64> {
    let raw = field(record, idx);
    if raw.is_empty() { None } else { raw.parse().ok() }
}

/// Read a persisted round back into typed rows.
pub fn load_round(rounds_dir: &Path, round_name: &str) -> Result<Vec<RoundRow>> {
    validate_round_name(round_name)?;
    let path = round_path(rounds_dir, round_name);
    if !path.exists() {
        return Err(EngineError::CubeMissing {
            table: format!("round {round_name}"),
        });
    }
    let mut reader = csv::Reader::from_path(&path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let date = NaiveDate::parse_from_str(field(&record, 0), "%Y-%m-%d").map_err(|_| {
            EngineError::CubeIntegrity {
                reason: format!("round csv: bad date '{}'", field(&record, 0)),
            }
        })?;
        let state = match field(&record, 4) {
            "" => None,
            s => Some(s.to_string()),
        };
        let stage = Stage::parse(field(&record, 7)).ok_or_else(|| EngineError::CubeIntegrity {
            reason: format!("round csv: bad stage '{}'", field(&record, 7)),
        })?;
        rows.push(RoundRow {
            date,
            winner: field(&record, 1).to_string(),
            loser: field(&record, 2).to_string(),
            dma_name: field(&record, 3).to_string(),
            state,
            mover_ind: field(&record, 5) == "True",
            remove_units: parse_field(&record, 6, "remove_units")?,
            stage,
            impact: parse_field(&record, 8, "impact")?,
            pair_wins_current: parse_field(&record, 9, "pair_wins_current")?,
            pair_mu_wins: parse_opt_f64(&record, 10),
            pair_sigma_wins: parse_opt_f64(&record, 11),
            pair_z: parse_opt_f64(&record, 12),
            pair_pct_change: parse_opt_f64(&record, 13),
            dma_wins: parse_field(&record, 14, "dma_wins")?,
            pair_share: parse_field(&record, 15, "pair_share")?,
            nat_total_wins: parse_field(&record, 16, "nat_total_wins")?,
            nat_share_current: parse_field(&record, 17, "nat_share_current")?,
            nat_mu_share: parse_field(&record, 18, "nat_mu_share")?,
            nat_z_score: parse_field(&record, 19, "nat_z_score")?,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::plan::PlanRow;

    fn sample_plan() -> Plan {
        let date = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let row = |loser: &str, units: u32, wins: f64| PlanRow {
            date,
            winner: "alpha".to_string(),
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
            pair_sigma_wins: Some(1.5),
            pair_z: Some(100.0),
            pair_pct_change: Some(3.0),
            dma_wins: 300.0,
            pair_share: wins / 300.0,
            nat_total_wins: 300.0,
            nat_share_current: 0.5,
            nat_mu_share: 0.25,
            nat_z_score: 50.0,
        };
        Plan {
            rows: vec![row("beta", 150, 200.0), row("gamma", 50, 100.0)],
            ..Plan::default()
        }
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan();
        let path = save_plan(&plan, dir.path(), "r1", false).unwrap();
        assert!(path.exists());

        let rows = load_round(dir.path(), "r1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].loser, "beta");
        assert_eq!(rows[0].remove_units, 150);
        assert_eq!(rows[0].stage, Stage::Auto);
        assert!(rows[0].mover_ind);
        assert_eq!(rows[0].state.as_deref(), Some("NY"));
        assert_eq!(rows[0].pair_mu_wins, Some(50.0));
        assert_eq!(rows[1].remove_units, 50);
    }

    #[test]
    fn overwrite_is_refused_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan();
        let path = save_plan(&plan, dir.path(), "r1", false).unwrap();
        let original = fs::read(&path).unwrap();

        let err = save_plan(&plan, dir.path(), "r1", false).unwrap_err();
        assert!(matches!(err, EngineError::RoundExists { .. }));
        // The refused save must leave the original file byte-for-byte intact.
        assert_eq!(fs::read(&path).unwrap(), original);

        let mut changed = sample_plan();
        changed.rows[0].remove_units = 75;
        save_plan(&changed, dir.path(), "r1", true).unwrap();
        let rows = load_round(dir.path(), "r1").unwrap();
        assert_eq!(rows[0].remove_units, 75);
    }

    #[test]
    fn header_matches_contract() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_plan(&sample_plan(), dir.path(), "r1", false).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let first_line = contents.lines().next().unwrap();
        assert_eq!(first_line, HEADER.join(","));
        // Python-style booleans in the body.
        assert!(contents.contains(",True,"));
    }

    #[test]
    fn invalid_round_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let plan = sample_plan();
        assert!(save_plan(&plan, dir.path(), "", false).is_err());
        assert!(save_plan(&plan, dir.path(), "../escape", false).is_err());
        assert!(save_plan(&plan, dir.path(), "round one", false).is_err());
    }

    #[test]
    fn corrupt_plan_never_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = sample_plan();
        plan.rows[0].remove_units = 0;
        assert!(save_plan(&plan, dir.path(), "r1", false).is_err());
        assert!(!round_path(dir.path(), "r1").exists());
    }

    #[test]
    fn list_rounds_inventory() {
        let dir = tempfile::tempdir().unwrap();
        save_plan(&sample_plan(), dir.path(), "r1", false).unwrap();
        save_plan(&sample_plan(), dir.path(), "r2", false).unwrap();
        let rounds = list_rounds(dir.path()).unwrap();
        assert_eq!(rounds.len(), 2);
        let names: Vec<&str> = rounds.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"r1") && names.contains(&"r2"));
        assert!(rounds.iter().all(|r| r.row_count == 2));
    }

    #[test]
    fn missing_round_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_round(dir.path(), "nope").is_err());
    }
}
