use axum::http::StatusCode;

use crate::error::EngineError;

pub mod cubes;
pub mod health;
pub mod plans;
pub mod preview;
pub mod rounds;
pub mod scan;

/// Map engine errors onto HTTP statuses: missing substrate is 404, round
/// conflicts 409, bad caller input 400, everything else 500.
pub(crate) fn engine_error(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::CubeMissing { .. } => StatusCode::NOT_FOUND,
        EngineError::RoundExists { .. } => StatusCode::CONFLICT,
        EngineError::ThresholdOutOfRange { .. } | EngineError::InvalidIdentifier(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
