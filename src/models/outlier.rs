use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::cube::DayType;

/// A flagged (date, carrier) pair: the carrier's national wins on that date
/// deviated from its same-day-type baseline. Carries the national snapshot the
/// planner needs to compute the removal target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierFlag {
    pub date: NaiveDate,
    pub winner: String,
    pub day_type: DayType,
    pub nat_total_wins: f64,
    pub market_wins: f64,
    pub baseline_wins: f64,
    /// round(nat_total_wins - baseline_wins), ties to even.
    pub impact: i64,
    pub nat_z_score: f64,
    pub nat_share_current: f64,
    pub nat_mu_share: f64,
    pub selected_window: u32,
}
