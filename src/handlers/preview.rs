use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::handlers::engine_error;
use crate::models::cube::MoverSegment;
use crate::models::plan::Plan;
use crate::preview::{CarrierSeries, preview};

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub dataset: String,
    #[serde(default)]
    pub segment: MoverSegment,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Empty means every carrier, ranked by all-time wins.
    #[serde(default)]
    pub carriers: Vec<String>,
    pub plan: Plan,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub base: Vec<CarrierSeries>,
    pub suppressed: Vec<CarrierSeries>,
}

pub async fn reconstruct(
    State(state): State<AppState>,
    Json(req): Json<PreviewRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let (base, suppressed) = preview(
        &state.store,
        &req.dataset,
        req.segment,
        &req.plan,
        req.start,
        req.end,
        &req.carriers,
    )
    .map_err(engine_error)?;
    Ok(Json(PreviewResponse { base, suppressed }))
}
