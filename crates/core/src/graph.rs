//! Constraint graph: one variable per session, its finite domain of
//! `(start slot, resources)` candidates pre-filtered by capability, availability
//! and day boundaries, and the hard predicates the search has to enforce.

use std::collections::BTreeSet;

use tracing::debug;
use types::{HardKind, UnsatisfiableReason, UnsatisfiableSession};

use crate::constraints::{Placement, Placements};
use crate::error::UnsatisfiableDomainError;
use crate::model::{Problem, Requirement, Session};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub start: usize,
    /// All slots covered, `start` first.
    pub slots: Vec<usize>,
    /// One resource per requirement, in requirement order.
    pub resources: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct ConstraintGraph {
    pub problem: Problem,
    pub domains: Vec<Vec<Candidate>>,
    /// Sessions whose placement can prune each other's domains.
    pub neighbors: Vec<Vec<usize>>,
    pub hard: Vec<HardKind>,
}

impl ConstraintGraph {
    pub fn session_count(&self) -> usize {
        self.problem.sessions.len()
    }

    pub fn candidate(&self, session: usize, index: usize) -> &Candidate {
        &self.domains[session][index]
    }

    /// Turn per-session candidate indexes into concrete placements.
    pub fn placements(&self, assignment: &[Option<usize>]) -> Placements {
        assignment
            .iter()
            .enumerate()
            .map(|(s, pick)| {
                pick.map(|c| {
                    let cand = self.candidate(s, c);
                    Placement {
                        start: cand.start,
                        resources: cand.resources.clone(),
                    }
                })
            })
            .collect()
    }
}

pub struct GraphBuilder;

impl GraphBuilder {
    pub fn build(problem: Problem) -> Result<ConstraintGraph, UnsatisfiableDomainError> {
        let mut domains = Vec::with_capacity(problem.sessions.len());
        let mut unsatisfiable = Vec::new();

        let known_tags: BTreeSet<&String> =
            problem.resources.iter().flat_map(|r| r.tags.iter()).collect();

        for session in &problem.sessions {
            match session_domain(&problem, session, &known_tags) {
                Ok(domain) => domains.push(domain),
                Err((reason, detail)) => {
                    domains.push(Vec::new());
                    unsatisfiable.push(UnsatisfiableSession {
                        session_id: session.id.clone(),
                        reason,
                        detail,
                    });
                }
            }
        }
        if !unsatisfiable.is_empty() {
            return Err(UnsatisfiableDomainError {
                sessions: unsatisfiable,
            });
        }

        let neighbors = neighbors(&problem, &domains);
        let mut hard = vec![
            HardKind::CapabilityMatch,
            HardKind::Availability,
            HardKind::ResourceDoubleBooking,
        ];
        if !problem.cohorts.is_empty() {
            hard.push(HardKind::CohortDoubleBooking);
        }
        if problem.slots.iter().any(|s| s.capacity != u32::MAX) {
            hard.push(HardKind::SlotCapacity);
        }

        debug!(
            sessions = problem.sessions.len(),
            candidates = domains.iter().map(Vec::len).sum::<usize>(),
            "constraint graph built"
        );
        Ok(ConstraintGraph {
            problem,
            domains,
            neighbors,
            hard,
        })
    }
}

fn session_domain(
    problem: &Problem,
    session: &Session,
    known_tags: &BTreeSet<&String>,
) -> Result<Vec<Candidate>, (UnsatisfiableReason, String)> {
    let mut matching: Vec<Vec<usize>> = Vec::with_capacity(session.requirements.len());
    for (j, req) in session.requirements.iter().enumerate() {
        if let Requirement::Tags(tags) = req {
            if let Some(missing) = tags.iter().find(|t| !known_tags.contains(t)) {
                return Err((
                    UnsatisfiableReason::UnknownCapability,
                    format!("capability '{missing}' is held by no resource"),
                ));
            }
        }
        let rs: Vec<usize> = problem
            .resources
            .iter()
            .enumerate()
            .filter(|(i, r)| req.accepts(*i, r))
            .map(|(i, _)| i)
            .collect();
        if rs.is_empty() {
            return Err((
                UnsatisfiableReason::NoCandidate,
                format!("no resource satisfies requirement {j}"),
            ));
        }
        matching.push(rs);
    }

    let mut domain = Vec::new();
    for start in 0..problem.slots.len() {
        let Some(slots) = problem.occupied_slots(start, session.duration) else {
            continue;
        };
        let options: Vec<Vec<usize>> = matching
            .iter()
            .map(|rs| {
                rs.iter()
                    .copied()
                    .filter(|&r| slots.iter().all(|&s| problem.resources[r].is_available(s)))
                    .collect()
            })
            .collect();
        let mut combos = Vec::new();
        distinct_product(&options, &mut Vec::new(), &mut combos);
        for resources in combos {
            domain.push(Candidate {
                start,
                slots: slots.clone(),
                resources,
            });
        }
    }

    if domain.is_empty() {
        return Err((
            UnsatisfiableReason::NoCandidate,
            format!(
                "no {}-slot run where all required resources are available",
                session.duration
            ),
        ));
    }
    Ok(domain)
}

/// Cartesian product of per-requirement options, skipping tuples that reuse a resource.
fn distinct_product(options: &[Vec<usize>], picked: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
    let Some((first, rest)) = options.split_first() else {
        out.push(picked.clone());
        return;
    };
    for &r in first {
        if picked.contains(&r) {
            continue;
        }
        picked.push(r);
        distinct_product(rest, picked, out);
        picked.pop();
    }
}

fn neighbors(problem: &Problem, domains: &[Vec<Candidate>]) -> Vec<Vec<usize>> {
    let n = problem.sessions.len();
    let capped = problem.slots.iter().any(|s| s.capacity != u32::MAX);

    let touched: Vec<BTreeSet<usize>> = domains
        .iter()
        .map(|d| d.iter().flat_map(|c| c.resources.iter().copied()).collect())
        .collect();

    let mut out = vec![Vec::new(); n];
    for a in 0..n {
        for b in (a + 1)..n {
            let same_cohort = matches!(
                (problem.sessions[a].cohort, problem.sessions[b].cohort),
                (Some(x), Some(y)) if x == y
            );
            if capped || same_cohort || !touched[a].is_disjoint(&touched[b]) {
                out[a].push(b);
                out[b].push(a);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use types::ScheduleRequest;

    fn problem(v: serde_json::Value) -> Problem {
        let req: ScheduleRequest = serde_json::from_value(v).unwrap();
        Problem::from_request(&req).unwrap()
    }

    #[test]
    fn domains_filter_by_availability_and_tags() {
        let p = problem(json!({
            "teaching_assignments": [
                {"id": "s", "teacher_id": "t", "requires": [{"tags": ["lab"]}]}
            ],
            "time_slots": [
                {"id": "1", "day_of_week": 0, "period": 0},
                {"id": "2", "day_of_week": 0, "period": 1}
            ],
            "resources": [
                {"id": "t", "kind": "teacher", "available": ["2"]},
                {"id": "lab1", "kind": "room", "tags": ["lab"]},
                {"id": "r1", "kind": "room"}
            ]
        }));
        let g = GraphBuilder::build(p).unwrap();
        assert_eq!(
            g.domains[0],
            vec![Candidate {
                start: 1,
                slots: vec![1],
                resources: vec![0, 1]
            }]
        );
    }

    #[test]
    fn unknown_capability_names_the_session() {
        let p = problem(json!({
            "teaching_assignments": [{"id": "chem", "requires": [{"tags": ["fume_hood"]}]}],
            "time_slots": [{"id": "1", "day_of_week": 0}],
            "resources": [{"id": "r", "tags": ["projector"]}]
        }));
        let err = GraphBuilder::build(p).unwrap_err();
        assert_eq!(err.sessions.len(), 1);
        assert_eq!(err.sessions[0].session_id.0, "chem");
        assert_eq!(err.sessions[0].reason, UnsatisfiableReason::UnknownCapability);
    }

    #[test]
    fn double_period_needs_consecutive_slots() {
        let p = problem(json!({
            "teaching_assignments": [{"id": "s", "duration": 2}],
            "time_slots": [
                {"id": "a", "day_of_week": 0, "period": 0},
                {"id": "b", "day_of_week": 0, "period": 1},
                {"id": "c", "day_of_week": 1, "period": 0}
            ]
        }));
        let g = GraphBuilder::build(p).unwrap();
        let starts: Vec<usize> = g.domains[0].iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0]);
    }

    #[test]
    fn shared_teacher_makes_neighbors() {
        let p = problem(json!({
            "teaching_assignments": [
                {"id": "a", "teacher_id": "t"},
                {"id": "b", "teacher_id": "t"},
                {"id": "c", "teacher_id": "u"}
            ],
            "time_slots": [{"id": "1", "day_of_week": 0}]
        }));
        let g = GraphBuilder::build(p).unwrap();
        assert_eq!(g.neighbors[0], vec![1]);
        assert!(g.neighbors[2].is_empty());
    }
}
