use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::config::Thresholds;
use crate::enriched::enrich_flags;
use crate::handlers::engine_error;
use crate::models::cube::MoverSegment;
use crate::models::outlier::OutlierFlag;
use crate::models::plan::Plan;
use crate::planner::{build_plan, refine_surgical};
use crate::rounds::save_plan;
use crate::scanner::scan_base_outliers;

#[derive(Debug, Deserialize)]
pub struct BuildPlanRequest {
    pub dataset: String,
    #[serde(default)]
    pub segment: MoverSegment,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Census-block surgical refinement; defaults to the server config.
    #[serde(default)]
    pub surgical: Option<bool>,
    #[serde(default)]
    pub surgical_top_k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BuildPlanResponse {
    pub flags: Vec<OutlierFlag>,
    pub plan: Plan,
}

pub async fn build(
    State(state): State<AppState>,
    Json(req): Json<BuildPlanRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let flags = scan_base_outliers(
        &state.store,
        &req.dataset,
        req.segment,
        req.start,
        req.end,
        &req.thresholds,
    )
    .map_err(engine_error)?;
    let enriched = enrich_flags(
        &state.store,
        &req.dataset,
        req.segment,
        &flags,
        &req.thresholds,
    )
    .map_err(engine_error)?;
    let mut plan = build_plan(&flags, &enriched, &req.thresholds, req.segment)
        .map_err(engine_error)?;

    if req.surgical.unwrap_or(state.plan.surgical) {
        let top_k = req.surgical_top_k.unwrap_or(state.plan.surgical_top_k);
        refine_surgical(&state.store, &req.dataset, req.segment, &mut plan, top_k)
            .map_err(engine_error)?;
    }

    Ok(Json(BuildPlanResponse { flags, plan }))
}

#[derive(Debug, Deserialize)]
pub struct SavePlanRequest {
    pub round_name: String,
    #[serde(default)]
    pub overwrite: bool,
    pub plan: Plan,
}

#[derive(Debug, Serialize)]
pub struct SavePlanResponse {
    pub path: String,
}

pub async fn save(
    State(state): State<AppState>,
    Json(req): Json<SavePlanRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let path = save_plan(&req.plan, &state.rounds_dir, &req.round_name, req.overwrite)
        .map_err(engine_error)?;
    Ok(Json(SavePlanResponse {
        path: path.display().to_string(),
    }))
}
