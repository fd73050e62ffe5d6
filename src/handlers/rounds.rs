use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::handlers::engine_error;
use crate::rounds;

pub async fn list_rounds(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let rounds = rounds::list_rounds(&state.rounds_dir).map_err(engine_error)?;
    Ok(Json(rounds))
}

pub async fn get_round(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let rows = rounds::load_round(&state.rounds_dir, &name).map_err(engine_error)?;
    Ok(Json(rows))
}
