//! Hard-constraint evaluation over a concrete assignment.
//!
//! This works from the validated `Problem` alone and never consults the
//! constraint graph, so it can judge solver output independently.

use std::collections::BTreeMap;

use types::{AssignmentRecord, HardKind, HardViolation, SessionId};

use crate::error::ValidationErrors;
use crate::model::{Problem, Requirement};

/// Where one session landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub start: usize,
    pub resources: Vec<usize>,
}

/// Session-indexed, `None` for unplaced sessions.
pub type Placements = Vec<Option<Placement>>;

/// Resolve caller-supplied records against the problem.
pub fn placements_from_records(
    problem: &Problem,
    records: &[AssignmentRecord],
) -> Result<Placements, ValidationErrors> {
    let mut errs = ValidationErrors::default();
    let mut out: Placements = vec![None; problem.sessions.len()];
    for (i, rec) in records.iter().enumerate() {
        let field = format!("schedule[{i}]");
        let session = problem.session_index(&rec.session_id);
        let slot = problem.slot_index(&rec.slot_id);
        if session.is_none() {
            errs.push(
                format!("{field}.session_id"),
                format!("unknown session {}", rec.session_id),
            );
        }
        if slot.is_none() {
            errs.push(format!("{field}.slot_id"), format!("unknown slot {}", rec.slot_id));
        }
        let mut resources = Vec::with_capacity(rec.resource_ids.len());
        for (j, id) in rec.resource_ids.iter().enumerate() {
            match problem.resource_index(id) {
                Some(r) => resources.push(r),
                None => errs.push(
                    format!("{field}.resource_ids[{j}]"),
                    format!("unknown resource {id}"),
                ),
            }
        }
        if let (Some(s), Some(start)) = (session, slot) {
            if out[s].is_some() {
                errs.push(
                    format!("{field}.session_id"),
                    format!("session {} is scheduled more than once", rec.session_id),
                );
            }
            out[s] = Some(Placement { start, resources });
        }
    }
    errs.into_result(out)
}

/// True when each requirement can be served by a distinct resource from `resources`.
fn requirements_met(problem: &Problem, reqs: &[Requirement], resources: &[usize]) -> bool {
    fn assign(
        problem: &Problem,
        reqs: &[Requirement],
        resources: &[usize],
        used: &mut Vec<bool>,
    ) -> bool {
        let Some((first, rest)) = reqs.split_first() else {
            return true;
        };
        for (k, &r) in resources.iter().enumerate() {
            if used[k] || !first.accepts(r, &problem.resources[r]) {
                continue;
            }
            used[k] = true;
            if assign(problem, rest, resources, used) {
                return true;
            }
            used[k] = false;
        }
        false
    }
    let mut used = vec![false; resources.len()];
    assign(problem, reqs, resources, &mut used)
}

/// Every hard violation in `placements`, grouped per offending resource/cohort/slot.
pub fn evaluate_hard(problem: &Problem, placements: &Placements) -> Vec<HardViolation> {
    let mut out = Vec::new();
    let mut by_resource: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
    let mut by_cohort: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
    let mut by_slot: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    for (si, p) in placements.iter().enumerate() {
        let session = &problem.sessions[si];
        let Some(p) = p else {
            out.push(HardViolation {
                constraint: HardKind::UnplacedSession,
                session_ids: vec![session.id.clone()],
                resource_id: None,
                cohort: None,
                slot_id: None,
                message: format!("session {} has no slot", session.id),
            });
            continue;
        };
        let Some(slots) = problem.occupied_slots(p.start, session.duration) else {
            out.push(HardViolation {
                constraint: HardKind::Availability,
                session_ids: vec![session.id.clone()],
                resource_id: None,
                cohort: None,
                slot_id: Some(problem.slots[p.start].id.clone()),
                message: format!(
                    "{} consecutive periods from this slot do not exist",
                    session.duration
                ),
            });
            continue;
        };
        if p.resources.len() != session.requirements.len()
            || !requirements_met(problem, &session.requirements, &p.resources)
        {
            out.push(HardViolation {
                constraint: HardKind::CapabilityMatch,
                session_ids: vec![session.id.clone()],
                resource_id: None,
                cohort: None,
                slot_id: Some(problem.slots[p.start].id.clone()),
                message: "assigned resources do not cover the session requirements".into(),
            });
        }
        for &t in &slots {
            for &r in &p.resources {
                if !problem.resources[r].is_available(t) {
                    out.push(HardViolation {
                        constraint: HardKind::Availability,
                        session_ids: vec![session.id.clone()],
                        resource_id: Some(problem.resources[r].id.clone()),
                        cohort: None,
                        slot_id: Some(problem.slots[t].id.clone()),
                        message: "resource is not available in this slot".into(),
                    });
                }
                by_resource.entry((r, t)).or_default().push(si);
            }
            if let Some(c) = session.cohort {
                by_cohort.entry((c, t)).or_default().push(si);
            }
            by_slot.entry(t).or_default().push(si);
        }
    }

    let ids = |sessions: &[usize]| -> Vec<SessionId> {
        sessions
            .iter()
            .map(|&s| problem.sessions[s].id.clone())
            .collect()
    };

    for ((r, t), sessions) in &by_resource {
        let res = &problem.resources[*r];
        if sessions.len() as u64 > u64::from(res.max_load) {
            out.push(HardViolation {
                constraint: HardKind::ResourceDoubleBooking,
                session_ids: ids(sessions.as_slice()),
                resource_id: Some(res.id.clone()),
                cohort: None,
                slot_id: Some(problem.slots[*t].id.clone()),
                message: format!(
                    "resource {} holds {} sessions, limit {}",
                    res.id,
                    sessions.len(),
                    res.max_load
                ),
            });
        }
    }
    for ((c, t), sessions) in &by_cohort {
        if sessions.len() > 1 {
            out.push(HardViolation {
                constraint: HardKind::CohortDoubleBooking,
                session_ids: ids(sessions.as_slice()),
                resource_id: None,
                cohort: Some(problem.cohorts[*c].clone()),
                slot_id: Some(problem.slots[*t].id.clone()),
                message: format!(
                    "cohort {} has {} sessions at once",
                    problem.cohorts[*c],
                    sessions.len()
                ),
            });
        }
    }
    for (t, sessions) in &by_slot {
        let cap = problem.slots[*t].capacity;
        if sessions.len() as u64 > u64::from(cap) {
            out.push(HardViolation {
                constraint: HardKind::SlotCapacity,
                session_ids: ids(sessions.as_slice()),
                resource_id: None,
                cohort: None,
                slot_id: Some(problem.slots[*t].id.clone()),
                message: format!("slot holds {} sessions, capacity {cap}", sessions.len()),
            });
        }
    }
    out
}
