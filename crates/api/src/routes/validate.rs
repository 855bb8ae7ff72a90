use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use types::{ScheduleRequest, ValidationReport};

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/schedule/validate",
    request_body = ScheduleRequest,
    responses(
    (status = 200, description = "Validation result", body = ValidationReport),
    (status = 400, description = "Body is not a schedule request", body = ErrorBody)
    )
)]
pub async fn validate_handler(
    State(state): State<AppState>,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<Json<ValidationReport>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(state.scheduler.validate(&req)))
}
