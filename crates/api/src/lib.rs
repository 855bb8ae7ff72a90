pub mod config;
pub mod error;
pub mod state;
pub mod telemetry;
pub mod routes {
    pub mod explain;
    pub mod generate;
    pub mod health;
    pub mod validate;
}

use axum::{
    routing::{get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ServiceConfig;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
        paths(
            routes::health::health,
            routes::generate::generate,
            routes::validate::validate_handler,
            routes::explain::explain,
        ),
        components(schemas(
            types::ScheduleRequest, types::SessionSpec, types::TimeSlotSpec,
            types::ResourceSpec, types::RequirementSpec, types::ConstraintConfig,
            types::ResourceKind, types::SoftKind, types::HardKind, types::SolveStatus,
            types::StopReason,
            types::ScheduleResponse, types::Summary, types::AssignmentRecord,
            types::Diagnostics, types::HardViolation, types::SoftTerm, types::SearchStats,
            types::ExplainRequest, types::ValidationReport, types::FieldError,
            types::UnsatisfiableSession, types::UnsatisfiableReason,
            types::TeachingAssignmentId, types::SessionId, types::SlotId,
            types::ResourceId, types::CohortId, types::SubjectId,
            error::ErrorBody,
            routes::health::Health,
        )),
        tags(
            (name = "timetable", description = "Timetable generation API")
        )
    )]
pub struct ApiDoc;

pub fn router(state: AppState, cfg: &ServiceConfig) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/schedule/generate", post(routes::generate::generate))
        .route("/schedule/validate", post(routes::validate::validate_handler))
        .route("/schedule/explain", post(routes::explain::explain))
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(telemetry::stack(cfg.body_limit_bytes))
        .with_state(state)
}
