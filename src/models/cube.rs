use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Which count a cube table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Win,
    Loss,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Win => "win",
            Metric::Loss => "loss",
        }
    }
}

/// Mover segment partition. Movers changed address and carrier; non-movers
/// changed carrier only. Both segments flow through the engine identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoverSegment {
    #[default]
    Mover,
    NonMover,
}

impl MoverSegment {
    pub fn as_str(self) -> &'static str {
        match self {
            MoverSegment::Mover => "mover",
            MoverSegment::NonMover => "non_mover",
        }
    }

    pub fn mover_ind(self) -> bool {
        matches!(self, MoverSegment::Mover)
    }
}

/// Day-type bucket used for baselining. Weekends show volume patterns distinct
/// from weekdays, but Saturdays and Sundays individually carry too few samples
/// in a rolling window, so Mon-Fri collapse into a single bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayType {
    Weekday,
    Sat,
    Sun,
}

impl DayType {
    /// DOW convention: 0 = Sunday .. 6 = Saturday.
    pub fn from_day_of_week(dow: u8) -> Self {
        match dow {
            0 => DayType::Sun,
            6 => DayType::Sat,
            _ => DayType::Weekday,
        }
    }

    pub fn for_date(date: NaiveDate) -> Self {
        Self::from_day_of_week(date.weekday().num_days_from_sunday() as u8)
    }

    /// Minimum same-bucket prior observations a rolling window must contain
    /// before it can serve as a baseline.
    pub fn min_periods(self) -> u32 {
        match self {
            DayType::Weekday => 4,
            DayType::Sat | DayType::Sun => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayType::Weekday => "Weekday",
            DayType::Sat => "Sat",
            DayType::Sun => "Sun",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Weekday" => Some(DayType::Weekday),
            "Sat" => Some(DayType::Sat),
            "Sun" => Some(DayType::Sun),
            _ => None,
        }
    }
}

/// One pre-aggregated head-to-head cell: (date, winner, loser, DMA, state)
/// with summed wins/losses and the count of underlying source rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeRecord {
    pub date: NaiveDate,
    pub winner: String,
    pub loser: String,
    pub dma: i64,
    pub dma_name: String,
    pub state: Option<String>,
    pub total_wins: f64,
    pub total_losses: f64,
    pub record_count: i64,
}

impl CubeRecord {
    /// 0 = Sunday .. 6 = Saturday.
    pub fn day_of_week(&self) -> u8 {
        self.date.weekday().num_days_from_sunday() as u8
    }

    pub fn day_type(&self) -> DayType {
        DayType::for_date(self.date)
    }
}

/// Census-block-grained cube cell. Four orders of magnitude finer than the
/// DMA cube; used only for surgical drill-down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CensusCubeRecord {
    pub date: NaiveDate,
    pub winner: String,
    pub loser: String,
    pub dma: i64,
    pub dma_name: String,
    pub state: Option<String>,
    pub census_block_id: String,
    pub total_wins: f64,
    pub total_losses: f64,
    pub record_count: i64,
}

/// Inventory entry for one cube table.
#[derive(Debug, Clone, Serialize)]
pub struct CubeInfo {
    pub name: String,
    pub row_count: i64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_type_buckets() {
        // 2025-01-05 is a Sunday
        let sun = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        assert_eq!(DayType::for_date(sun), DayType::Sun);
        assert_eq!(DayType::for_date(sun.succ_opt().unwrap()), DayType::Weekday);
        let sat = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
        assert_eq!(DayType::for_date(sat), DayType::Sat);
    }

    #[test]
    fn day_type_min_periods() {
        assert_eq!(DayType::Weekday.min_periods(), 4);
        assert_eq!(DayType::Sat.min_periods(), 2);
        assert_eq!(DayType::Sun.min_periods(), 2);
    }

    #[test]
    fn dow_convention_is_sunday_zero() {
        let sun = NaiveDate::from_ymd_opt(2025, 1, 5).unwrap();
        let rec = CubeRecord {
            date: sun,
            winner: "a".into(),
            loser: "b".into(),
            dma: 500,
            dma_name: "Test DMA".into(),
            state: Some("TX".into()),
            total_wins: 1.0,
            total_losses: 0.0,
            record_count: 1,
        };
        assert_eq!(rec.day_of_week(), 0);
        assert_eq!(DayType::parse("Sat"), Some(DayType::Sat));
        assert_eq!(DayType::parse("weekday"), None);
    }
}
