//! Final schedule assembly. Everything reported here is recomputed from the
//! chosen assignment against the `Problem`; solver-side fitness is ignored.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use sched_core::constraints::{evaluate_hard, Placement, Placements};
use sched_core::occupancy::Occupancy;
use sched_core::scoring::compute_soft_scores;
use sched_core::{ConstraintGraph, EngineError, Problem, SoftWeights};
use tracing::{error, warn};
use types::{
    AssignmentRecord, Diagnostics, HardKind, HardViolation, ScheduleResponse, SearchStats,
    SolveStatus, StopReason, Summary,
};

/// What the search phases produced.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub status: SolveStatus,
    pub assignment: Vec<Option<usize>>,
    pub stats: SearchStats,
    /// Set when a phase ran out of budget or was cancelled.
    pub stop_reason: Option<StopReason>,
    /// Fitness the refiner believed its best individual had.
    pub claimed_objective: Option<f64>,
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn record(problem: &Problem, session: usize, placement: &Placement) -> AssignmentRecord {
    let s = &problem.sessions[session];
    let slot = &problem.slots[placement.start];
    AssignmentRecord {
        session_id: s.id.clone(),
        slot_id: slot.id.clone(),
        resource_ids: placement
            .resources
            .iter()
            .map(|&r| problem.resources[r].id.clone())
            .collect(),
        teaching_assignment_id: Some(s.origin.clone()),
        rombel_id: s.cohort.map(|c| problem.cohorts[c].clone()),
        day_of_week: Some(slot.day),
        period: Some(slot.period),
        occupied_slot_ids: problem
            .occupied_slots(placement.start, s.duration)
            .unwrap_or_default()
            .into_iter()
            .map(|t| problem.slots[t].id.clone())
            .collect(),
    }
}

/// Records in slot order, then session order.
pub fn records(problem: &Problem, placements: &Placements) -> Vec<AssignmentRecord> {
    let mut placed: Vec<(usize, usize, &Placement)> = placements
        .iter()
        .enumerate()
        .filter_map(|(s, p)| p.as_ref().map(|p| (p.start, s, p)))
        .collect();
    placed.sort_by_key(|&(start, s, _)| (start, s));
    placed
        .into_iter()
        .map(|(_, s, p)| record(problem, s, p))
        .collect()
}

pub fn summary(problem: &Problem, scheduled: usize) -> Summary {
    Summary {
        teaching_assignments: problem.teaching_assignments,
        sessions: problem.sessions.len(),
        time_slots: problem.slots.len(),
        resources: problem.resources.len(),
        scheduled,
    }
}

/// Why each unplaced session could not go anywhere, judged against the
/// sessions that did get placed.
fn explain_unplaced(graph: &ConstraintGraph, assignment: &[Option<usize>]) -> Vec<HardViolation> {
    let problem = &graph.problem;
    let mut occ = Occupancy::new(problem);
    for (s, pick) in assignment.iter().enumerate() {
        if let Some(c) = pick {
            occ.place(&problem.sessions[s], graph.candidate(s, *c));
        }
    }

    let holders = |kind: HardKind, resource: Option<usize>, cohort: Option<usize>, slot: usize| {
        assignment
            .iter()
            .enumerate()
            .filter_map(|(s, pick)| {
                let cand = graph.candidate(s, (*pick)?);
                let hit = cand.slots.contains(&slot)
                    && match kind {
                        HardKind::ResourceDoubleBooking => {
                            resource.map_or(false, |r| cand.resources.contains(&r))
                        }
                        HardKind::CohortDoubleBooking => {
                            cohort.is_some() && problem.sessions[s].cohort == cohort
                        }
                        _ => true,
                    };
                hit.then_some(s)
            })
            .collect::<Vec<_>>()
    };

    let mut out = Vec::new();
    for (s, pick) in assignment.iter().enumerate() {
        if pick.is_some() {
            continue;
        }
        let session = &problem.sessions[s];
        let mut grouped: BTreeMap<(HardKind, Option<usize>, Option<usize>), Vec<usize>> =
            BTreeMap::new();
        for cand in &graph.domains[s] {
            for b in occ.blockers(problem, session, cand) {
                let slots = grouped.entry((b.kind, b.resource, b.cohort)).or_default();
                if !slots.contains(&b.slot) {
                    slots.push(b.slot);
                }
            }
        }
        if grouped.is_empty() {
            out.push(HardViolation {
                constraint: HardKind::UnplacedSession,
                session_ids: vec![session.id.clone()],
                resource_id: None,
                cohort: None,
                slot_id: None,
                message: format!(
                    "session {} has no placement compatible with the rest of the timetable",
                    session.id
                ),
            });
            continue;
        }
        for ((kind, resource, cohort), mut slots) in grouped {
            slots.sort_unstable();
            let mut involved = vec![s];
            for &t in &slots {
                for other in holders(kind, resource, cohort, t) {
                    if !involved.contains(&other) {
                        involved.push(other);
                    }
                }
            }
            let what = match (resource, cohort) {
                (Some(r), _) => format!("resource {}", problem.resources[r].id),
                (_, Some(c)) => format!("cohort {}", problem.cohorts[c]),
                _ => "slot capacity".to_string(),
            };
            out.push(HardViolation {
                constraint: kind,
                session_ids: involved
                    .iter()
                    .map(|&i| problem.sessions[i].id.clone())
                    .collect(),
                resource_id: resource.map(|r| problem.resources[r].id.clone()),
                cohort: cohort.map(|c| problem.cohorts[c].clone()),
                slot_id: (slots.len() == 1).then(|| problem.slots[slots[0]].id.clone()),
                message: format!(
                    "session {} cannot be placed: {} is already taken in {} candidate slot(s)",
                    session.id,
                    what,
                    slots.len()
                ),
            });
        }
    }
    out
}

/// Build the response for a search outcome, revalidating the assignment.
pub fn assemble(
    graph: &ConstraintGraph,
    weights: &SoftWeights,
    period_id: serde_json::Value,
    outcome: Outcome,
) -> Result<ScheduleResponse, EngineError> {
    let problem = &graph.problem;
    let placements = graph.placements(&outcome.assignment);
    let found = evaluate_hard(problem, &placements);

    if let Some(v) = found
        .iter()
        .find(|v| v.constraint != HardKind::UnplacedSession)
    {
        error!(constraint = %v.constraint, message = %v.message, "search produced an illegal assignment");
        return Err(EngineError::fault(
            "assembler",
            format!("{} violated: {}", v.constraint, v.message),
        ));
    }
    if outcome.status == SolveStatus::Feasible && !found.is_empty() {
        error!(unplaced = found.len(), "feasible result is incomplete");
        return Err(EngineError::fault(
            "assembler",
            format!("{} session(s) missing from a feasible result", found.len()),
        ));
    }

    let (schedule, best_partial, violations, returned) = match outcome.status {
        SolveStatus::Feasible | SolveStatus::Degraded => {
            (records(problem, &placements), Vec::new(), found, placements)
        }
        SolveStatus::Infeasible => (
            Vec::new(),
            records(problem, &placements),
            explain_unplaced(graph, &outcome.assignment),
            vec![None; problem.sessions.len()],
        ),
    };

    let scores = compute_soft_scores(problem, weights, &returned);
    if let Some(claimed) = outcome.claimed_objective {
        if (claimed - scores.objective).abs() > 1e-9 {
            warn!(claimed, recomputed = scores.objective, "refiner fitness drifted from ground truth");
        }
    }

    Ok(ScheduleResponse {
        generated_at: now_rfc3339(),
        period_id,
        summary: summary(problem, schedule.len()),
        schedule,
        diagnostics: Diagnostics {
            status: outcome.status,
            violated_hard_constraints: violations,
            objective_score: scores.objective,
            soft_breakdown: scores.terms,
            search_stats: outcome.stats,
            early_termination: outcome.stop_reason.is_some(),
            stop_reason: outcome.stop_reason,
            best_partial,
        },
    })
}
