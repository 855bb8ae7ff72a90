use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sched_core::EngineError;
use serde::Serialize;
use types::{FieldError, UnsatisfiableSession};
use utoipa::ToSchema;

/// Error body. `field` and `message` describe the first problem; `errors`
/// lists all of them.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<UnsatisfiableSession>,
}

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest { field: String, message: String },
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(r: JsonRejection) -> Self {
        ApiError::BadRequest {
            field: "body".into(),
            message: r.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "validation_error".into(),
                    errors: vec![FieldError {
                        field: field.clone(),
                        message: message.clone(),
                    }],
                    field: Some(field),
                    message,
                    sessions: Vec::new(),
                },
            ),
            ApiError::Engine(EngineError::Validation(errs)) => {
                let errors = errs.field_errors();
                let first = errors.first().cloned();
                (
                    StatusCode::BAD_REQUEST,
                    ErrorBody {
                        error: "validation_error".into(),
                        field: first.as_ref().map(|f| f.field.clone()),
                        message: first.map(|f| f.message).unwrap_or_default(),
                        errors,
                        sessions: Vec::new(),
                    },
                )
            }
            ApiError::Engine(EngineError::Unsatisfiable(e)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: "unsatisfiable_domain".into(),
                    field: None,
                    message: e.to_string(),
                    errors: Vec::new(),
                    sessions: e.sessions,
                },
            ),
            ApiError::Engine(e @ EngineError::InternalSolverFault { .. }) => {
                tracing::error!(error = %e, "request aborted");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal_solver_fault".into(),
                        field: None,
                        message: e.to_string(),
                        errors: Vec::new(),
                        sessions: Vec::new(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
