use std::time::{Duration, Instant};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use types::{ScheduleRequest, ScheduleResponse};

use crate::error::{ApiError, ErrorBody};
use crate::state::AppState;

pub const DEADLINE_HEADER: &str = "x-deadline-ms";

/// Caller deadline from `X-Deadline-Ms`, counted from `received`.
fn caller_deadline(headers: &HeaderMap, received: Instant) -> Result<Option<Instant>, ApiError> {
    let Some(raw) = headers.get(DEADLINE_HEADER) else {
        return Ok(None);
    };
    let ms = raw
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| ApiError::BadRequest {
            field: "X-Deadline-Ms".into(),
            message: "must be a non-negative integer number of milliseconds".into(),
        })?;
    Ok(received.checked_add(Duration::from_millis(ms)))
}

#[utoipa::path(
        post,
        path = "/schedule/generate",
        request_body = ScheduleRequest,
        params(("X-Deadline-Ms" = Option<u64>, Header, description = "Caller deadline in milliseconds")),
        responses(
            (status = 200, description = "Schedule with diagnostics (feasible, infeasible or degraded)", body = ScheduleResponse),
            (status = 400, description = "Invalid request", body = ErrorBody),
            (status = 422, description = "A session has no legal placement", body = ErrorBody),
            (status = 500, description = "Internal solver fault", body = ErrorBody)
        )
    )]
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let deadline = caller_deadline(&headers, Instant::now())?;
    let Json(req) = payload?;
    let resp = state.scheduler.generate(req, deadline).await?;
    Ok(Json(resp))
}
