use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use types::{ExplainRequest, ScheduleResponse};

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/schedule/explain",
    request_body = ExplainRequest,
    responses(
    (status = 200, description = "Hard violations and soft breakdown for the provided schedule", body = ScheduleResponse),
    (status = 400, description = "Invalid request or schedule", body = ErrorBody)
    )
)]
pub async fn explain(
    State(state): State<AppState>,
    payload: Result<Json<ExplainRequest>, JsonRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let Json(req) = payload?;
    Ok(Json(state.scheduler.explain(&req)?))
}
