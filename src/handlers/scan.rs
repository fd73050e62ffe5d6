use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::AppState;
use crate::config::Thresholds;
use crate::enriched;
use crate::handlers::engine_error;
use crate::models::cube::MoverSegment;
use crate::scanner;

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub dataset: String,
    #[serde(default)]
    pub segment: MoverSegment,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub thresholds: Thresholds,
}

pub async fn scan_outliers(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let flags = scanner::scan_base_outliers(
        &state.store,
        &req.dataset,
        req.segment,
        req.start,
        req.end,
        &req.thresholds,
    )
    .map_err(engine_error)?;
    Ok(Json(flags))
}

pub async fn enriched_projection(
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let rows = enriched::build_enriched_cube(
        &state.store,
        &req.dataset,
        req.segment,
        req.start,
        req.end,
        &req.thresholds,
    )
    .map_err(engine_error)?;
    Ok(Json(rows))
}
