//! Request pipeline: model, graph (cached), exact search, refinement, assembly.

pub mod assemble;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sched_core::constraints::{evaluate_hard, placements_from_records};
use sched_core::scoring::compute_soft_scores;
use sched_core::{
    Budget, CancelToken, ConstraintGraph, EngineError, ExplainRequest, Fingerprint, GraphBuilder,
    GraphCache, NoCache, Problem, ScheduleRequest, ScheduleResponse, Scheduler, SolverSettings,
    ValidationErrors, ValidationReport,
};
use solver_exact::{ExactOutcome, ExactSolver};
use solver_heur::{Refiner, RefinerParams};
use tracing::{info, warn};
use types::{Diagnostics, SearchStats, SolveStatus};

use crate::assemble::{assemble, now_rfc3339, records, summary, Outcome};

#[derive(Clone)]
pub struct Engine {
    cache: Arc<dyn GraphCache>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(NoCache))
    }
}

/// Cancels the token when dropped, so an abandoned request stops its search.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn settings_and_problem(req: &ScheduleRequest) -> Result<(SolverSettings, Problem), EngineError> {
    let settings = req
        .constraints
        .as_ref()
        .map(SolverSettings::from_config)
        .transpose();
    let problem = Problem::from_request(req);
    match (settings, problem) {
        (Ok(s), Ok(p)) => Ok((s.unwrap_or_default(), p)),
        (Err(a), Err(b)) => {
            let mut all = ValidationErrors::default();
            all.0.extend(a.0);
            all.0.extend(b.0);
            Err(all.into())
        }
        (Err(e), _) | (_, Err(e)) => Err(e.into()),
    }
}

impl Engine {
    pub fn new(cache: Arc<dyn GraphCache>) -> Self {
        Self { cache }
    }

    fn graph_for(&self, problem: Problem) -> Result<(Arc<ConstraintGraph>, bool), EngineError> {
        let key = Fingerprint::of(&problem);
        let collided = match self.cache.get(key) {
            Some(graph) if graph.problem == problem => return Ok((graph, true)),
            Some(_) => {
                warn!(fingerprint = key.0, "cached graph belongs to another problem");
                true
            }
            None => false,
        };
        let graph = Arc::new(GraphBuilder::build(problem)?);
        if !collided {
            self.cache.insert(key, graph.clone());
        }
        Ok((graph, false))
    }

    /// Run the whole pipeline on the current thread.
    pub fn run(
        &self,
        req: &ScheduleRequest,
        deadline: Option<Instant>,
        cancel: CancelToken,
    ) -> Result<ScheduleResponse, EngineError> {
        let (settings, problem) = settings_and_problem(req)?;
        let budget = Budget::new(settings.search_budget, deadline, cancel);
        info!(
            sessions = problem.sessions.len(),
            slots = problem.slots.len(),
            resources = problem.resources.len(),
            "schedule requested"
        );

        let (graph, cache_hit) = self.graph_for(problem)?;
        let exact = ExactSolver::from_settings(&settings).solve(&graph, &budget);

        let mut stats = SearchStats {
            nodes_explored: exact.nodes,
            backtracks: exact.backtracks,
            cache_hit,
            ..SearchStats::default()
        };
        let mut claimed_objective = None;
        let (status, assignment, stop_reason) = match exact.outcome {
            ExactOutcome::Complete => {
                let mut assignment = exact.assignment;
                let mut stopped = budget.check();
                if stopped.is_none() {
                    let params = RefinerParams::from_settings(&settings);
                    let refined = Refiner::new().refine(&graph, &params, &budget, assignment);
                    stats.generations_run = refined.generations;
                    stats.refiner_improved = refined.improved();
                    stopped = refined.stopped;
                    claimed_objective = Some(refined.best.fitness);
                    assignment = refined.best.genes;
                }
                (SolveStatus::Feasible, assignment, stopped)
            }
            ExactOutcome::Exhausted => (SolveStatus::Infeasible, exact.assignment, None),
            ExactOutcome::Stopped(reason) => {
                warn!(%reason, "search stopped before every session was placed");
                (SolveStatus::Degraded, exact.assignment, Some(reason))
            }
        };
        stats.elapsed_seconds = budget.elapsed().as_secs_f64();

        let resp = assemble(
            &graph,
            &settings.weights,
            req.period_id.clone(),
            Outcome {
                status,
                assignment,
                stats,
                stop_reason,
                claimed_objective,
            },
        )?;
        info!(
            status = ?resp.diagnostics.status,
            scheduled = resp.summary.scheduled,
            objective = resp.diagnostics.objective_score,
            elapsed = resp.diagnostics.search_stats.elapsed_seconds,
            "schedule generated"
        );
        Ok(resp)
    }
}

#[async_trait]
impl Scheduler for Engine {
    async fn generate(
        &self,
        req: ScheduleRequest,
        deadline: Option<Instant>,
    ) -> Result<ScheduleResponse, EngineError> {
        let engine = self.clone();
        let guard = CancelOnDrop(CancelToken::new());
        let cancel = guard.0.clone();
        let res = tokio::task::spawn_blocking(move || engine.run(&req, deadline, cancel))
            .await
            .map_err(|e| EngineError::fault("pipeline", e.to_string()))?;
        drop(guard);
        res
    }

    fn validate(&self, req: &ScheduleRequest) -> ValidationReport {
        sched_core::validate(req)
    }

    fn explain(&self, req: &ExplainRequest) -> Result<ScheduleResponse, EngineError> {
        let (settings, problem) = settings_and_problem(&req.request)?;
        let placements = placements_from_records(&problem, &req.schedule)?;
        let violations = evaluate_hard(&problem, &placements);
        let scores = compute_soft_scores(&problem, &settings.weights, &placements);
        let status = if violations.is_empty() {
            SolveStatus::Feasible
        } else {
            SolveStatus::Infeasible
        };
        let schedule = records(&problem, &placements);
        Ok(ScheduleResponse {
            generated_at: now_rfc3339(),
            period_id: req.request.period_id.clone(),
            summary: summary(&problem, schedule.len()),
            schedule,
            diagnostics: Diagnostics {
                status,
                violated_hard_constraints: violations,
                objective_score: scores.objective,
                soft_breakdown: scores.terms,
                search_stats: SearchStats::default(),
                early_termination: false,
                stop_reason: None,
                best_partial: Vec::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_core::{SharedGraphCache, StopReason};
    use serde_json::json;

    fn request() -> ScheduleRequest {
        serde_json::from_value(json!({
            "period_id": "2026-odd",
            "teaching_assignments": [
                {"id": 1, "teacher_id": 10, "rombel_id": "7A", "subject_id": "math", "weekly_hours": 2},
                {"id": 2, "teacher_id": 11, "rombel_id": "7A", "subject_id": "art"}
            ],
            "time_slots": [
                {"id": "mon1", "day_of_week": 1, "period": 1},
                {"id": "mon2", "day_of_week": 1, "period": 2},
                {"id": "tue1", "day_of_week": 2, "period": 1}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn second_run_hits_the_cache() {
        let cache = Arc::new(SharedGraphCache::new(4));
        let engine = Engine::new(cache.clone());
        let a = engine.run(&request(), None, CancelToken::new()).unwrap();
        let b = engine.run(&request(), None, CancelToken::new()).unwrap();
        assert!(!a.diagnostics.search_stats.cache_hit);
        assert!(b.diagnostics.search_stats.cache_hit);
        assert_eq!(cache.len(), 1);
        assert_eq!(a.schedule, b.schedule);
    }

    /// Answers every lookup with the same graph, whatever the key.
    struct StaleCache(Arc<ConstraintGraph>);

    impl GraphCache for StaleCache {
        fn get(&self, _key: Fingerprint) -> Option<Arc<ConstraintGraph>> {
            Some(self.0.clone())
        }

        fn insert(&self, _key: Fingerprint, _graph: Arc<ConstraintGraph>) {}
    }

    #[test]
    fn colliding_cache_entry_is_not_reused() {
        let other: ScheduleRequest = serde_json::from_value(json!({
            "teaching_assignments": [{"id": "lone", "teacher_id": 99}],
            "time_slots": [{"id": "fri1", "day_of_week": 5, "period": 1}]
        }))
        .unwrap();
        let stale = GraphBuilder::build(Problem::from_request(&other).unwrap()).unwrap();
        let engine = Engine::new(Arc::new(StaleCache(Arc::new(stale))));
        let resp = engine.run(&request(), None, CancelToken::new()).unwrap();
        assert!(!resp.diagnostics.search_stats.cache_hit);
        assert_eq!(resp.diagnostics.status, SolveStatus::Feasible);
        assert_eq!(resp.summary.sessions, 3);
        assert!(resp.schedule.iter().all(|r| r.session_id.to_string() != "lone"));
    }

    #[test]
    fn cancellation_after_search_skips_refinement() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let resp = Engine::default().run(&request(), None, cancel).unwrap();
        // three sessions fit inside the first poll window
        assert_eq!(resp.diagnostics.status, SolveStatus::Feasible);
        assert!(resp.diagnostics.early_termination);
        assert_eq!(resp.diagnostics.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(resp.diagnostics.search_stats.generations_run, 0);
    }

    #[test]
    fn config_and_model_errors_are_reported_together() {
        let req: ScheduleRequest = serde_json::from_value(json!({
            "teaching_assignments": [{"id": "a", "duration": 0}],
            "time_slots": [{"id": "x", "day_of_week": 0}],
            "constraints": {"population_size": 0}
        }))
        .unwrap();
        let Err(EngineError::Validation(errs)) = Engine::default().run(&req, None, CancelToken::new())
        else {
            panic!("expected validation errors");
        };
        let fields: Vec<&str> = errs.0.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"constraints.population_size"));
        assert!(fields.contains(&"teaching_assignments[0].duration"));
    }

    #[test]
    fn explain_scores_a_supplied_schedule() {
        let engine = Engine::default();
        let generated = engine.run(&request(), None, CancelToken::new()).unwrap();
        let explained = engine
            .explain(&ExplainRequest {
                request: request(),
                schedule: generated.schedule.clone(),
            })
            .unwrap();
        assert_eq!(explained.diagnostics.status, SolveStatus::Feasible);
        assert_eq!(
            explained.diagnostics.objective_score,
            generated.diagnostics.objective_score
        );
        assert_eq!(explained.schedule, generated.schedule);
    }

    #[tokio::test]
    async fn generate_runs_off_the_async_runtime() {
        let resp = Engine::default().generate(request(), None).await.unwrap();
        assert_eq!(resp.period_id, json!("2026-odd"));
        assert_eq!(resp.summary.sessions, 3);
        assert_eq!(resp.summary.scheduled, 3);
    }
}
