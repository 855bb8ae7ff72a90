use std::fmt;
use thiserror::Error;
use types::{FieldError, UnsatisfiableSession};

/// A malformed input field, local to one entity.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<&ValidationError> for FieldError {
    fn from(e: &ValidationError) -> Self {
        FieldError {
            field: e.field.clone(),
            message: e.message.clone(),
        }
    }
}

/// Every validation problem found in one request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result<T>(self, ok: T) -> Result<T, ValidationErrors> {
        if self.0.is_empty() {
            Ok(ok)
        } else {
            Err(self)
        }
    }

    pub fn field_errors(&self) -> Vec<FieldError> {
        self.0.iter().map(FieldError::from).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "invalid request: {}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Sessions with no legal (slot, resources) candidate before search.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("unsatisfiable domain for session(s): {}", list_sessions(.sessions))]
pub struct UnsatisfiableDomainError {
    pub sessions: Vec<UnsatisfiableSession>,
}

fn list_sessions(sessions: &[UnsatisfiableSession]) -> String {
    sessions
        .iter()
        .map(|s| format!("{} ({})", s.session_id, s.detail))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Unsatisfiable(#[from] UnsatisfiableDomainError),
    /// A solver invariant broke; the request is aborted.
    #[error("internal solver fault in {phase}: {message}")]
    InternalSolverFault { phase: &'static str, message: String },
}

impl EngineError {
    pub fn fault(phase: &'static str, message: impl Into<String>) -> Self {
        EngineError::InternalSolverFault {
            phase,
            message: message.into(),
        }
    }
}
