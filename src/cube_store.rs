use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use rusqlite::{Connection, params};

use crate::error::{EngineError, Result};
use crate::models::cube::{CensusCubeRecord, CubeInfo, CubeRecord, Metric, MoverSegment};
use crate::sql;

/// The cube substrate: one SQLite file per dataset version, holding the
/// pre-aggregated win/loss tables. The handle owns the canonical path; all
/// reads and writes go through it.
pub struct CubeStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl CubeStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|source| EngineError::CubeUnreadable {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// In-memory store, used by tests and ad-hoc tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomic table replace for one (dataset, segment, metric) cube. Either
    /// every row lands and the indexes exist, or nothing changed.
    pub fn put_cube(
        &self,
        dataset: &str,
        segment: MoverSegment,
        metric: Metric,
        rows: &[CubeRecord],
    ) -> Result<()> {
        let table = sql::cube_table(dataset, metric, segment)?;
        for (i, r) in rows.iter().enumerate() {
            check_cube_row(
                &table,
                i,
                r.date,
                &r.winner,
                &r.loser,
                &r.dma_name,
                r.total_wins,
                r.total_losses,
                r.record_count,
            )?;
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
        tx.execute_batch(&sql::create_cube_table(&table))?;
        {
            let mut stmt = tx.prepare(&sql::insert_cube_row(&table))?;
            for r in rows {
                stmt.execute(params![
                    r.date.to_string(),
                    r.day_of_week(),
                    r.winner,
                    r.loser,
                    r.dma,
                    r.dma_name,
                    r.state,
                    r.total_wins,
                    r.total_losses,
                    r.record_count,
                ])?;
            }
        }
        for idx in sql::cube_indexes(&table) {
            tx.execute_batch(&idx)?;
        }
        tx.commit()?;
        tracing::info!("cube {table}: replaced with {} rows", rows.len());
        Ok(())
    }

    /// Census-block-grained variant of [`put_cube`](Self::put_cube).
    pub fn put_census_cube(
        &self,
        dataset: &str,
        segment: MoverSegment,
        metric: Metric,
        rows: &[CensusCubeRecord],
    ) -> Result<()> {
        let table = sql::census_cube_table(dataset, metric, segment)?;
        for (i, r) in rows.iter().enumerate() {
            check_cube_row(
                &table,
                i,
                r.date,
                &r.winner,
                &r.loser,
                &r.dma_name,
                r.total_wins,
                r.total_losses,
                r.record_count,
            )?;
            if r.census_block_id.trim().is_empty() {
                return Err(EngineError::CubeIntegrity {
                    reason: format!("{table} row {i}: empty census_block_id"),
                });
            }
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
        tx.execute_batch(&sql::create_census_cube_table(&table))?;
        {
            let mut stmt = tx.prepare(&sql::insert_census_cube_row(&table))?;
            for r in rows {
                stmt.execute(params![
                    r.date.to_string(),
                    day_of_week(r.date),
                    r.winner,
                    r.loser,
                    r.dma,
                    r.dma_name,
                    r.state,
                    r.census_block_id,
                    r.total_wins,
                    r.total_losses,
                    r.record_count,
                ])?;
            }
        }
        for idx in sql::cube_indexes(&table) {
            tx.execute_batch(&idx)?;
        }
        tx.execute_batch(&sql::census_block_index(&table))?;
        tx.commit()?;
        tracing::info!("census cube {table}: replaced with {} rows", rows.len());
        Ok(())
    }

    /// Read-only SQL surface for callers; rows come back as JSON values with
    /// the column names alongside.
    pub fn query(&self, sql_text: &str) -> Result<QueryResult> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql_text)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let n_cols = columns.len();
        let rows = stmt
            .query_map([], |row| {
                let mut out = Vec::with_capacity(n_cols);
                for i in 0..n_cols {
                    let v = match row.get_ref(i)? {
                        rusqlite::types::ValueRef::Null => serde_json::Value::Null,
                        rusqlite::types::ValueRef::Integer(n) => serde_json::Value::from(n),
                        rusqlite::types::ValueRef::Real(f) => serde_json::Value::from(f),
                        rusqlite::types::ValueRef::Text(t) => {
                            serde_json::Value::from(String::from_utf8_lossy(t).to_string())
                        }
                        rusqlite::types::ValueRef::Blob(_) => serde_json::Value::Null,
                    };
                    out.push(v);
                }
                Ok(out)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(QueryResult { columns, rows })
    }

    /// Inventory of cube tables with row counts and date spans.
    pub fn list_cubes(&self) -> Result<Vec<CubeInfo>> {
        let names: Vec<String> = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE '%_cube' ORDER BY name",
            )?;
            stmt.query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            let conn = self.conn.lock().unwrap();
            let (row_count, first, last): (i64, Option<String>, Option<String>) = conn
                .prepare(&sql::table_span(&name))?
                .query_row([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
            infos.push(CubeInfo {
                name,
                row_count,
                first_date: first.as_deref().and_then(parse_date_opt),
                last_date: last.as_deref().and_then(parse_date_opt),
            });
        }
        Ok(infos)
    }

    /// The `n` carriers with the largest all-time summed wins whose share of
    /// the all-time market exceeds `min_share_pct` percent.
    pub fn get_top_n_carriers(
        &self,
        dataset: &str,
        segment: MoverSegment,
        n: usize,
        min_share_pct: f64,
    ) -> Result<Vec<String>> {
        let table = sql::cube_table(dataset, Metric::Win, segment)?;
        self.require_table(&table)?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql::top_carriers(&table))?;
        let carriers = stmt
            .query_map(params![min_share_pct, n as i64], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(carriers)
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .prepare("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")?
            .query_row(params![table], |row| row.get(0))?;
        Ok(count > 0)
    }

    pub fn require_table(&self, table: &str) -> Result<()> {
        if self.table_exists(table)? {
            Ok(())
        } else {
            Err(EngineError::CubeMissing {
                table: table.to_string(),
            })
        }
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

#[allow(clippy::too_many_arguments)]
fn check_cube_row(
    table: &str,
    i: usize,
    date: NaiveDate,
    winner: &str,
    loser: &str,
    dma_name: &str,
    total_wins: f64,
    total_losses: f64,
    record_count: i64,
) -> Result<()> {
    let reject = |what: &str| {
        Err(EngineError::CubeIntegrity {
            reason: format!("{table} row {i} ({date}): {what}"),
        })
    };
    if winner.trim().is_empty() {
        return reject("empty winner");
    }
    if loser.trim().is_empty() {
        return reject("empty loser");
    }
    if dma_name.trim().is_empty() {
        return reject("empty dma_name");
    }
    if winner == loser {
        return reject("winner equals loser");
    }
    if !total_wins.is_finite() || total_wins < 0.0 {
        return reject("negative total_wins");
    }
    if !total_losses.is_finite() || total_losses < 0.0 {
        return reject("negative total_losses");
    }
    if record_count < 1 {
        return reject("record_count below 1");
    }
    Ok(())
}

fn day_of_week(date: NaiveDate) -> u8 {
    use chrono::Datelike;
    date.weekday().num_days_from_sunday() as u8
}

pub(crate) fn parse_date_opt(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    parse_date_opt(s).ok_or_else(|| EngineError::CubeIntegrity {
        reason: format!("unparseable date '{s}' in cube"),
    })
}
