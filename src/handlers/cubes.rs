use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;

use crate::AppState;
use crate::handlers::engine_error;

pub async fn list_cubes(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let cubes = state.store.list_cubes().map_err(engine_error)?;
    Ok(Json(cubes))
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
}

/// Read-only SQL passthrough for the dashboard collaborator.
pub async fn execute_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let head = req.sql.trim_start().to_ascii_lowercase();
    if !(head.starts_with("select") || head.starts_with("with")) {
        return Err((
            StatusCode::BAD_REQUEST,
            "only read-only queries are accepted".to_string(),
        ));
    }
    let result = state.store.query(&req.sql).map_err(engine_error)?;
    Ok(Json(result))
}
