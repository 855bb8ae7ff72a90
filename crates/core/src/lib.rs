pub mod cache;
pub mod config;
pub mod constraints;
pub mod deadline;
pub mod error;
pub mod graph;
pub mod model;
pub mod occupancy;
pub mod scoring;

use async_trait::async_trait;

pub use cache::{Fingerprint, GraphCache, NoCache, SharedGraphCache};
pub use config::{SoftWeights, SolverSettings};
pub use deadline::{Budget, CancelToken, StopReason};
pub use error::{EngineError, UnsatisfiableDomainError, ValidationError, ValidationErrors};
pub use graph::{Candidate, ConstraintGraph, GraphBuilder};
pub use model::Problem;
pub use types::{
    ExplainRequest, ScheduleRequest, ScheduleResponse, SolveStatus, ValidationReport,
};

/// The engine contract the service layer consumes.
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    async fn generate(
        &self,
        req: ScheduleRequest,
        deadline: Option<std::time::Instant>,
    ) -> Result<ScheduleResponse, EngineError>;

    fn validate(&self, req: &ScheduleRequest) -> ValidationReport;

    fn explain(&self, req: &ExplainRequest) -> Result<ScheduleResponse, EngineError>;
}

/// Validate a request and build its graph without searching.
pub fn validate(req: &ScheduleRequest) -> ValidationReport {
    let mut report = ValidationReport::default();
    let settings = req
        .constraints
        .as_ref()
        .map(SolverSettings::from_config)
        .transpose();
    if let Err(e) = settings {
        report.errors.extend(e.field_errors());
    }
    match Problem::from_request(req) {
        Err(e) => report.errors.extend(e.field_errors()),
        Ok(problem) => {
            report.sessions = problem.sessions.len();
            if let Err(e) = GraphBuilder::build(problem) {
                report.unsatisfiable = e.sessions;
            }
        }
    }
    report.ok = report.errors.is_empty() && report.unsatisfiable.is_empty();
    report
}
