//! Every SQL template the engine runs lives here. Table names are the only
//! interpolated fragment and are built from validated identifiers; all values
//! travel as bound parameters.

use crate::error::{EngineError, Result};
use crate::models::cube::{Metric, MoverSegment};

/// Dataset names come from callers and end up in table names. Lowercase
/// alphanumerics and underscores only, starting with a letter.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase());
    let valid_tail = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_head && valid_tail {
        Ok(())
    } else {
        Err(EngineError::InvalidIdentifier(name.to_string()))
    }
}

/// `{dataset}_{metric}_{segment}_cube`, e.g. `gamoshi_win_mover_cube`.
pub fn cube_table(dataset: &str, metric: Metric, segment: MoverSegment) -> Result<String> {
    validate_identifier(dataset)?;
    Ok(format!("{dataset}_{}_{}_cube", metric.as_str(), segment.as_str()))
}

/// Census-block-grained variant of [`cube_table`].
pub fn census_cube_table(dataset: &str, metric: Metric, segment: MoverSegment) -> Result<String> {
    validate_identifier(dataset)?;
    Ok(format!(
        "{dataset}_{}_{}_census_cube",
        metric.as_str(),
        segment.as_str()
    ))
}

pub fn create_cube_table(table: &str) -> String {
    format!(
        "CREATE TABLE {table} (
            date         TEXT NOT NULL,
            day_of_week  INTEGER NOT NULL,
            winner       TEXT NOT NULL,
            loser        TEXT NOT NULL,
            dma          INTEGER NOT NULL,
            dma_name     TEXT NOT NULL,
            state        TEXT,
            total_wins   REAL NOT NULL CHECK(total_wins >= 0),
            total_losses REAL NOT NULL CHECK(total_losses >= 0),
            record_count INTEGER NOT NULL CHECK(record_count >= 1),
            PRIMARY KEY (date, winner, loser, dma)
        )"
    )
}

pub fn create_census_cube_table(table: &str) -> String {
    format!(
        "CREATE TABLE {table} (
            date            TEXT NOT NULL,
            day_of_week     INTEGER NOT NULL,
            winner          TEXT NOT NULL,
            loser           TEXT NOT NULL,
            dma             INTEGER NOT NULL,
            dma_name        TEXT NOT NULL,
            state           TEXT,
            census_block_id TEXT NOT NULL,
            total_wins      REAL NOT NULL CHECK(total_wins >= 0),
            total_losses    REAL NOT NULL CHECK(total_losses >= 0),
            record_count    INTEGER NOT NULL CHECK(record_count >= 1),
            PRIMARY KEY (date, winner, loser, dma, census_block_id)
        )"
    )
}

/// Index set shared by both cube variants.
pub fn cube_indexes(table: &str) -> Vec<String> {
    vec![
        format!("CREATE INDEX idx_{table}_date ON {table}(date)"),
        format!("CREATE INDEX idx_{table}_pair ON {table}(winner, loser)"),
        format!("CREATE INDEX idx_{table}_dma ON {table}(dma_name)"),
        format!("CREATE INDEX idx_{table}_state ON {table}(state)"),
    ]
}

pub fn census_block_index(table: &str) -> String {
    format!("CREATE INDEX idx_{table}_block ON {table}(census_block_id)")
}

pub fn insert_cube_row(table: &str) -> String {
    format!(
        "INSERT INTO {table} \
         (date, day_of_week, winner, loser, dma, dma_name, state, total_wins, total_losses, record_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
    )
}

pub fn insert_census_cube_row(table: &str) -> String {
    format!(
        "INSERT INTO {table} \
         (date, day_of_week, winner, loser, dma, dma_name, state, census_block_id, total_wins, total_losses, record_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    )
}

const DAY_TYPE_EXPR: &str =
    "CASE day_of_week WHEN 0 THEN 'Sun' WHEN 6 THEN 'Sat' ELSE 'Weekday' END";
const MIN_PERIODS_EXPR: &str = "CASE WHEN day_of_week IN (0, 6) THEN 2 ELSE 4 END";

/// Per-pair tiered rolling view. For every cube row, window frames collect the
/// same-series, same-day-type observations strictly preceding the row's date
/// within 28 / 14 / 4 calendar days. Count, sum, and sum-of-squares per frame
/// are enough to derive mean and sample stddev on the Rust side; tier
/// selection also happens there so the minimum-sample rule stays in one place.
pub fn rolling_view(table: &str) -> String {
    format!(
        "WITH base AS (
            SELECT date,
                   julianday(date) AS jd,
                   {DAY_TYPE_EXPR} AS day_type,
                   winner, loser, dma, dma_name, state,
                   total_wins, record_count
            FROM {table}
        )
        SELECT date, day_type, winner, loser, dma, dma_name, state,
               total_wins, record_count,
               COUNT(total_wins)            OVER w28 AS n28,
               SUM(total_wins)              OVER w28 AS s28,
               SUM(total_wins * total_wins) OVER w28 AS q28,
               COUNT(total_wins)            OVER w14 AS n14,
               SUM(total_wins)              OVER w14 AS s14,
               SUM(total_wins * total_wins) OVER w14 AS q14,
               COUNT(total_wins)            OVER w4  AS n4,
               SUM(total_wins)              OVER w4  AS s4,
               SUM(total_wins * total_wins) OVER w4  AS q4,
               ROW_NUMBER() OVER (PARTITION BY winner, loser, dma, day_type ORDER BY jd) AS appearance_rank
        FROM base
        WINDOW
            w28 AS (PARTITION BY winner, loser, dma, day_type ORDER BY jd
                    RANGE BETWEEN 28 PRECEDING AND 1 PRECEDING),
            w14 AS (PARTITION BY winner, loser, dma, day_type ORDER BY jd
                    RANGE BETWEEN 14 PRECEDING AND 1 PRECEDING),
            w4  AS (PARTITION BY winner, loser, dma, day_type ORDER BY jd
                    RANGE BETWEEN 4 PRECEDING AND 1 PRECEDING)
        ORDER BY winner, loser, dma, date"
    )
}

/// National rolling series: cube aggregated to (date, winner) with market
/// totals and win shares, then the same tiered frames over the national
/// series. The share baseline is recomputed here; per-pair win baselines are
/// a different quantity and are never reused for shares.
pub fn national_rolling(table: &str) -> String {
    format!(
        "WITH nat AS (
            SELECT date, day_of_week, winner, SUM(total_wins) AS nat_wins
            FROM {table}
            GROUP BY date, day_of_week, winner
        ),
        market AS (
            SELECT date, SUM(nat_wins) AS market_wins
            FROM nat
            GROUP BY date
        ),
        series AS (
            SELECT n.date,
                   julianday(n.date) AS jd,
                   {DAY_TYPE_EXPR} AS day_type,
                   {MIN_PERIODS_EXPR} AS min_periods,
                   n.winner,
                   n.nat_wins,
                   m.market_wins,
                   CASE WHEN m.market_wins > 0 THEN n.nat_wins * 1.0 / m.market_wins ELSE 0.0 END AS share
            FROM nat n
            JOIN market m ON m.date = n.date
        )
        SELECT date, day_type, min_periods, winner, nat_wins, market_wins, share,
               COUNT(nat_wins)          OVER w28 AS n28,
               SUM(nat_wins)            OVER w28 AS s28,
               SUM(nat_wins * nat_wins) OVER w28 AS q28,
               SUM(share)               OVER w28 AS h28,
               COUNT(nat_wins)          OVER w14 AS n14,
               SUM(nat_wins)            OVER w14 AS s14,
               SUM(nat_wins * nat_wins) OVER w14 AS q14,
               SUM(share)               OVER w14 AS h14,
               COUNT(nat_wins)          OVER w4  AS n4,
               SUM(nat_wins)            OVER w4  AS s4,
               SUM(nat_wins * nat_wins) OVER w4  AS q4,
               SUM(share)               OVER w4  AS h4
        FROM series
        WINDOW
            w28 AS (PARTITION BY winner, day_type ORDER BY jd
                    RANGE BETWEEN 28 PRECEDING AND 1 PRECEDING),
            w14 AS (PARTITION BY winner, day_type ORDER BY jd
                    RANGE BETWEEN 14 PRECEDING AND 1 PRECEDING),
            w4  AS (PARTITION BY winner, day_type ORDER BY jd
                    RANGE BETWEEN 4 PRECEDING AND 1 PRECEDING)
        ORDER BY winner, date"
    )
}

/// Carriers by all-time wins, keeping those whose share of the all-time
/// market exceeds the bound parameter (?1, percent), limited to ?2.
pub fn top_carriers(table: &str) -> String {
    format!(
        "WITH totals AS (
            SELECT winner, SUM(total_wins) AS wins
            FROM {table}
            GROUP BY winner
        ),
        market AS (
            SELECT SUM(wins) AS total FROM totals
        )
        SELECT t.winner
        FROM totals t, market m
        WHERE m.total > 0 AND t.wins * 100.0 / m.total > ?1
        ORDER BY t.wins DESC, t.winner ASC
        LIMIT ?2"
    )
}

/// All-time wins per carrier, descending. Drives stable carrier ordering in
/// the preview.
pub fn carrier_ranking(table: &str) -> String {
    format!(
        "SELECT winner, SUM(total_wins) AS wins
         FROM {table}
         GROUP BY winner
         ORDER BY wins DESC, winner ASC"
    )
}

/// Pair-level rows inside an inclusive date range (?1, ?2) for the preview.
pub fn range_rows(table: &str) -> String {
    format!(
        "SELECT date, winner, loser, dma, total_wins
         FROM {table}
         WHERE date >= ?1 AND date <= ?2
         ORDER BY date, winner, loser, dma"
    )
}

pub fn table_span(table: &str) -> String {
    format!("SELECT COUNT(*), MIN(date), MAX(date) FROM {table}")
}

/// Census-block series for one (winner ?1, loser ?2, dma ?3), with 28-day
/// same-day-type frames; the outer filter (?4) keeps the flag date only.
pub fn census_block_stats(table: &str) -> String {
    format!(
        "WITH blocks AS (
            SELECT date, day_of_week, census_block_id, SUM(total_wins) AS wins
            FROM {table}
            WHERE winner = ?1 AND loser = ?2 AND dma = ?3
            GROUP BY date, day_of_week, census_block_id
        ),
        series AS (
            SELECT date,
                   julianday(date) AS jd,
                   {DAY_TYPE_EXPR} AS day_type,
                   census_block_id,
                   wins
            FROM blocks
        ),
        windowed AS (
            SELECT series.*,
                   COUNT(wins)        OVER w28 AS n28,
                   SUM(wins)          OVER w28 AS s28,
                   SUM(wins * wins)   OVER w28 AS q28
            FROM series
            WINDOW w28 AS (PARTITION BY census_block_id, day_type ORDER BY jd
                           RANGE BETWEEN 28 PRECEDING AND 1 PRECEDING)
        )
        SELECT census_block_id, wins, n28, s28, q28
        FROM windowed
        WHERE date = ?4
        ORDER BY census_block_id"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_validated() {
        assert!(validate_identifier("gamoshi").is_ok());
        assert!(validate_identifier("gamoshi_v2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2gamoshi").is_err());
        assert!(validate_identifier("Gamoshi").is_err());
        assert!(validate_identifier("x; DROP TABLE y").is_err());
    }

    #[test]
    fn cube_table_naming() {
        let t = cube_table("gamoshi", Metric::Win, MoverSegment::Mover).unwrap();
        assert_eq!(t, "gamoshi_win_mover_cube");
        let t = cube_table("gamoshi", Metric::Loss, MoverSegment::NonMover).unwrap();
        assert_eq!(t, "gamoshi_loss_non_mover_cube");
        let t = census_cube_table("gamoshi", Metric::Win, MoverSegment::Mover).unwrap();
        assert_eq!(t, "gamoshi_win_mover_census_cube");
    }

    #[test]
    fn rolling_view_uses_strictly_preceding_frames() {
        let sql = rolling_view("t_cube");
        assert!(sql.contains("RANGE BETWEEN 28 PRECEDING AND 1 PRECEDING"));
        assert!(sql.contains("RANGE BETWEEN 14 PRECEDING AND 1 PRECEDING"));
        assert!(sql.contains("RANGE BETWEEN 4 PRECEDING AND 1 PRECEDING"));
        assert!(sql.contains("PARTITION BY winner, loser, dma, day_type"));
    }
}
