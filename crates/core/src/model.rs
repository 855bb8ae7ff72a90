//! Validated, index-based domain model built fresh for each request.
//!
//! Wire types from `types` reference each other by id; here every reference is
//! resolved to an index into the owning vector so the solvers can work with
//! flat arrays. Slots are stored sorted by `(day, period)`, which defines
//! adjacency for gap-based scoring and multi-slot sessions.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use types::{
    CohortId, ResourceId, ResourceKind, ScheduleRequest, SessionId, SlotId, SubjectId,
    TeachingAssignmentId,
};

use crate::error::ValidationErrors;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub day: i64,
    pub period: i64,
    pub capacity: u32,
    pub label: Option<String>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Resource {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub tags: BTreeSet<String>,
    /// Indexed by slot index.
    pub available: Vec<bool>,
    pub max_load: u32,
    /// Created from a `teacher_id` that had no declared resource.
    pub synthesized: bool,
}

impl Resource {
    pub fn is_available(&self, slot: usize) -> bool {
        self.available.get(slot).copied().unwrap_or(false)
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Requirement {
    /// Exactly this resource.
    Resource(usize),
    /// Any resource holding all of these tags.
    Tags(BTreeSet<String>),
}

impl Requirement {
    pub fn accepts(&self, index: usize, resource: &Resource) -> bool {
        match self {
            Requirement::Resource(r) => *r == index,
            Requirement::Tags(tags) => tags.is_subset(&resource.tags),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub origin: TeachingAssignmentId,
    pub cohort: Option<usize>,
    pub subject: Option<SubjectId>,
    /// Slot-units, always >= 1.
    pub duration: usize,
    pub requirements: Vec<Requirement>,
    pub preferred: BTreeSet<usize>,
    pub avoided: BTreeSet<usize>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Problem {
    pub slots: Vec<Slot>,
    pub resources: Vec<Resource>,
    pub sessions: Vec<Session>,
    pub cohorts: Vec<CohortId>,
    pub teaching_assignments: usize,
    slot_index: BTreeMap<SlotId, usize>,
    resource_index: BTreeMap<ResourceId, usize>,
    session_index: BTreeMap<SessionId, usize>,
}

impl Problem {
    pub fn slot_index(&self, id: &SlotId) -> Option<usize> {
        self.slot_index.get(id).copied()
    }

    pub fn resource_index(&self, id: &ResourceId) -> Option<usize> {
        self.resource_index.get(id).copied()
    }

    pub fn session_index(&self, id: &SessionId) -> Option<usize> {
        self.session_index.get(id).copied()
    }

    /// Slots covered by a meeting of `duration` starting at `start`, or `None`
    /// when the run leaves the day or skips a period.
    pub fn occupied_slots(&self, start: usize, duration: usize) -> Option<Vec<usize>> {
        let first = self.slots.get(start)?;
        if duration > self.slots.len() - start {
            return None;
        }
        let mut out = Vec::with_capacity(duration);
        out.push(start);
        for step in 1..duration {
            let idx = start + step;
            let s = self.slots.get(idx)?;
            if s.day != first.day || s.period != first.period + step as i64 {
                return None;
            }
            out.push(idx);
        }
        Some(out)
    }

    /// Slot indexes grouped by day, each group in period order.
    pub fn days(&self) -> Vec<Vec<usize>> {
        let mut days: Vec<Vec<usize>> = Vec::new();
        for (i, s) in self.slots.iter().enumerate() {
            match days.last_mut() {
                Some(group) if self.slots[group[0]].day == s.day => group.push(i),
                _ => days.push(vec![i]),
            }
        }
        days
    }

    pub fn from_request(req: &ScheduleRequest) -> Result<Problem, ValidationErrors> {
        let mut errs = ValidationErrors::default();

        let slots = build_slots(req, &mut errs);
        let slot_index: BTreeMap<SlotId, usize> = slots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        let mut resources = build_resources(req, &slot_index, slots.len(), &mut errs);
        let mut resource_index: BTreeMap<ResourceId, usize> = resources
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();

        for spec in &req.teaching_assignments {
            if let Some(t) = &spec.teacher_id {
                if !resource_index.contains_key(t) {
                    resource_index.insert(t.clone(), resources.len());
                    resources.push(Resource {
                        id: t.clone(),
                        kind: ResourceKind::Teacher,
                        tags: BTreeSet::from(["teacher".to_string()]),
                        available: vec![true; slots.len()],
                        max_load: 1,
                        synthesized: true,
                    });
                }
            }
        }

        let mut cohorts: Vec<CohortId> = Vec::new();
        let mut cohort_index: HashMap<CohortId, usize> = HashMap::new();
        let mut sessions: Vec<Session> = Vec::new();
        let mut session_index: BTreeMap<SessionId, usize> = BTreeMap::new();
        let mut seen_specs: HashSet<&TeachingAssignmentId> = HashSet::new();

        if slots.is_empty() && !req.teaching_assignments.is_empty() {
            errs.push("time_slots", "must not be empty when teaching assignments are given");
        }

        for (i, spec) in req.teaching_assignments.iter().enumerate() {
            let field = format!("teaching_assignments[{i}]");
            if spec.id.0.trim().is_empty() {
                errs.push(format!("{field}.id"), "must not be empty");
            }
            if !seen_specs.insert(&spec.id) {
                errs.push(format!("{field}.id"), format!("duplicate id {}", spec.id));
            }
            if spec.duration <= 0 {
                errs.push(
                    format!("{field}.duration"),
                    format!("must be positive, got {}", spec.duration),
                );
            }
            let mut meetings = usize::try_from(spec.weekly_hours).unwrap_or(0);
            if spec.weekly_hours < 0 {
                errs.push(
                    format!("{field}.weekly_hours"),
                    format!("must not be negative, got {}", spec.weekly_hours),
                );
            } else if !slots.is_empty() && meetings > slots.len() {
                errs.push(
                    format!("{field}.weekly_hours"),
                    format!(
                        "must not exceed the number of time slots ({}), got {}",
                        slots.len(),
                        spec.weekly_hours
                    ),
                );
                meetings = 0;
            }

            let mut requirements = Vec::new();
            if let Some(t) = &spec.teacher_id {
                if let Some(&r) = resource_index.get(t) {
                    requirements.push(Requirement::Resource(r));
                }
            }
            for (j, rq) in spec.requires.iter().enumerate() {
                let rfield = format!("{field}.requires[{j}]");
                match (&rq.resource_id, rq.tags.is_empty()) {
                    (Some(id), _) => match resource_index.get(id) {
                        Some(&r) => {
                            if !rq.tags.is_empty() {
                                let want: BTreeSet<String> = rq.tags.iter().cloned().collect();
                                if !want.is_subset(&resources[r].tags) {
                                    errs.push(
                                        format!("{rfield}.tags"),
                                        format!("resource {id} lacks the requested tags"),
                                    );
                                }
                            }
                            requirements.push(Requirement::Resource(r));
                        }
                        None => errs.push(
                            format!("{rfield}.resource_id"),
                            format!("unknown resource {id}"),
                        ),
                    },
                    (None, false) => {
                        requirements.push(Requirement::Tags(rq.tags.iter().cloned().collect()))
                    }
                    (None, true) => {
                        errs.push(rfield, "requirement needs a resource_id or at least one tag")
                    }
                }
            }

            let preferred = resolve_slots(
                &spec.preferred_slots,
                &slot_index,
                &format!("{field}.preferred_slots"),
                &mut errs,
            );
            let avoided = resolve_slots(
                &spec.avoid_slots,
                &slot_index,
                &format!("{field}.avoid_slots"),
                &mut errs,
            );

            let cohort = spec.rombel_id.as_ref().map(|c| {
                *cohort_index.entry(c.clone()).or_insert_with(|| {
                    cohorts.push(c.clone());
                    cohorts.len() - 1
                })
            });

            if meetings == 0 {
                tracing::debug!(assignment = %spec.id, "weekly_hours is 0, nothing to place");
            }
            for k in 1..=meetings {
                let id = if meetings == 1 {
                    SessionId(spec.id.0.clone())
                } else {
                    SessionId(format!("{}#{k}", spec.id))
                };
                if session_index.contains_key(&id) {
                    errs.push(
                        format!("{field}.id"),
                        format!("expanded session id {id} collides with another session"),
                    );
                    continue;
                }
                session_index.insert(id.clone(), sessions.len());
                sessions.push(Session {
                    id,
                    origin: spec.id.clone(),
                    cohort,
                    subject: spec.subject_id.clone(),
                    duration: spec.duration.max(1) as usize,
                    requirements: requirements.clone(),
                    preferred: preferred.clone(),
                    avoided: avoided.clone(),
                });
            }
        }

        errs.into_result(Problem {
            slots,
            resources,
            sessions,
            cohorts,
            teaching_assignments: req.teaching_assignments.len(),
            slot_index,
            resource_index,
            session_index,
        })
    }
}

fn resolve_slots(
    ids: &[SlotId],
    slot_index: &BTreeMap<SlotId, usize>,
    field: &str,
    errs: &mut ValidationErrors,
) -> BTreeSet<usize> {
    let mut out = BTreeSet::new();
    for (j, id) in ids.iter().enumerate() {
        match slot_index.get(id) {
            Some(&s) => {
                out.insert(s);
            }
            None => errs.push(format!("{field}[{j}]"), format!("unknown slot {id}")),
        }
    }
    out
}

fn build_slots(req: &ScheduleRequest, errs: &mut ValidationErrors) -> Vec<Slot> {
    let mut seen: HashSet<&SlotId> = HashSet::new();

    // Implicit periods rank slots within their day by start time, then input order.
    let mut by_day: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, s) in req.time_slots.iter().enumerate() {
        by_day.entry(s.day_of_week).or_default().push(i);
    }
    let mut implicit_period = vec![0i64; req.time_slots.len()];
    for members in by_day.values_mut() {
        members.sort_by(|&a, &b| {
            let sa = req.time_slots[a].start_time.as_deref().unwrap_or("");
            let sb = req.time_slots[b].start_time.as_deref().unwrap_or("");
            sa.cmp(sb).then(a.cmp(&b))
        });
        for (rank, &i) in members.iter().enumerate() {
            implicit_period[i] = rank as i64;
        }
    }

    let mut keyed: Vec<(i64, i64, usize, Slot)> = Vec::with_capacity(req.time_slots.len());
    let mut positions: HashSet<(i64, i64)> = HashSet::new();
    for (i, s) in req.time_slots.iter().enumerate() {
        let field = format!("time_slots[{i}]");
        if s.id.0.trim().is_empty() {
            errs.push(format!("{field}.id"), "must not be empty");
        }
        if !seen.insert(&s.id) {
            errs.push(format!("{field}.id"), format!("duplicate id {}", s.id));
        }
        if s.day_of_week < 0 {
            errs.push(format!("{field}.day_of_week"), "must not be negative");
        }
        let period = s.period.unwrap_or(implicit_period[i]);
        if period < 0 {
            errs.push(format!("{field}.period"), "must not be negative");
        }
        if !positions.insert((s.day_of_week, period)) {
            errs.push(
                format!("{field}.period"),
                format!("day {} period {period} is defined twice", s.day_of_week),
            );
        }
        let capacity = match s.capacity {
            None => u32::MAX,
            Some(c) if c < 1 => {
                errs.push(format!("{field}.capacity"), format!("must be at least 1, got {c}"));
                1
            }
            Some(c) => u32::try_from(c).unwrap_or(u32::MAX),
        };
        keyed.push((
            s.day_of_week,
            period,
            i,
            Slot {
                id: s.id.clone(),
                day: s.day_of_week,
                period,
                capacity,
                label: s.label.clone(),
            },
        ));
    }
    keyed.sort_by_key(|(day, period, i, _)| (*day, *period, *i));
    keyed.into_iter().map(|(_, _, _, s)| s).collect()
}

fn build_resources(
    req: &ScheduleRequest,
    slot_index: &BTreeMap<SlotId, usize>,
    slot_count: usize,
    errs: &mut ValidationErrors,
) -> Vec<Resource> {
    let mut seen: HashSet<&ResourceId> = HashSet::new();
    let mut out = Vec::with_capacity(req.resources.len());
    for (i, r) in req.resources.iter().enumerate() {
        let field = format!("resources[{i}]");
        if r.id.0.trim().is_empty() {
            errs.push(format!("{field}.id"), "must not be empty");
        }
        if !seen.insert(&r.id) {
            errs.push(format!("{field}.id"), format!("duplicate id {}", r.id));
        }
        let max_load = match r.max_load {
            None => 1,
            Some(m) if m < 1 => {
                errs.push(format!("{field}.max_load"), format!("must be at least 1, got {m}"));
                1
            }
            Some(m) => u32::try_from(m).unwrap_or(u32::MAX),
        };
        let available = if r.available.is_empty() {
            vec![true; slot_count]
        } else {
            let mut mask = vec![false; slot_count];
            for (j, id) in r.available.iter().enumerate() {
                match slot_index.get(id) {
                    Some(&s) => mask[s] = true,
                    None => errs.push(
                        format!("{field}.available[{j}]"),
                        format!("references nonexistent slot {id}"),
                    ),
                }
            }
            mask
        };
        let mut tags: BTreeSet<String> = r.tags.iter().cloned().collect();
        if r.kind == ResourceKind::Teacher {
            tags.insert("teacher".to_string());
        }
        out.push(Resource {
            id: r.id.clone(),
            kind: r.kind,
            tags,
            available,
            max_load,
            synthesized: false,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(v: serde_json::Value) -> ScheduleRequest {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn slots_sorted_and_periods_derived_from_start_time() {
        let req = request(json!({
            "time_slots": [
                {"id": "b", "day_of_week": 1, "start_time": "08:00"},
                {"id": "a", "day_of_week": 1, "start_time": "07:00"},
                {"id": "c", "day_of_week": 0, "start_time": "09:00"}
            ]
        }));
        let p = Problem::from_request(&req).unwrap();
        let ids: Vec<&str> = p.slots.iter().map(|s| s.id.0.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
        assert_eq!(p.slots[2].period, 1);
        assert_eq!(p.days(), vec![vec![0], vec![1, 2]]);
    }

    #[test]
    fn weekly_hours_expand_and_teacher_is_synthesized() {
        let req = request(json!({
            "teaching_assignments": [{"id": 4, "teacher_id": "t1", "rombel_id": "7A", "weekly_hours": 3}],
            "time_slots": [
                {"id": 1, "day_of_week": 1},
                {"id": 2, "day_of_week": 2},
                {"id": 3, "day_of_week": 3}
            ]
        }));
        let p = Problem::from_request(&req).unwrap();
        let ids: Vec<&str> = p.sessions.iter().map(|s| s.id.0.as_str()).collect();
        assert_eq!(ids, ["4#1", "4#2", "4#3"]);
        assert_eq!(p.resources.len(), 1);
        assert!(p.resources[0].synthesized);
        assert_eq!(p.sessions[0].requirements, vec![Requirement::Resource(0)]);
        assert_eq!(p.sessions[2].cohort, Some(0));
    }

    #[test]
    fn collects_every_field_error() {
        let req = request(json!({
            "teaching_assignments": [{"id": "s", "duration": 0}],
            "time_slots": [{"id": "x", "day_of_week": 0, "capacity": 0}],
            "resources": [{"id": "r", "available": ["nope"]}]
        }));
        let errs = Problem::from_request(&req).unwrap_err();
        let fields: Vec<&str> = errs.0.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"teaching_assignments[0].duration"));
        assert!(fields.contains(&"time_slots[0].capacity"));
        assert!(fields.contains(&"resources[0].available[0]"));
    }

    #[test]
    fn occupied_slots_stop_at_day_boundary_and_gaps() {
        let req = request(json!({
            "time_slots": [
                {"id": "m0", "day_of_week": 0, "period": 0},
                {"id": "m1", "day_of_week": 0, "period": 1},
                {"id": "m3", "day_of_week": 0, "period": 3},
                {"id": "t0", "day_of_week": 1, "period": 0}
            ]
        }));
        let p = Problem::from_request(&req).unwrap();
        assert_eq!(p.occupied_slots(0, 2), Some(vec![0, 1]));
        assert_eq!(p.occupied_slots(1, 2), None);
        assert_eq!(p.occupied_slots(2, 2), None);
        assert_eq!(p.occupied_slots(3, 1), Some(vec![3]));
    }

    #[test]
    fn weekly_hours_beyond_the_week_are_rejected_without_expanding() {
        let req = request(json!({
            "teaching_assignments": [{"id": "big", "weekly_hours": 1_000_000_000i64}],
            "time_slots": [{"id": "x", "day_of_week": 0}, {"id": "y", "day_of_week": 1}]
        }));
        let errs = Problem::from_request(&req).unwrap_err();
        assert_eq!(errs.0.len(), 1);
        assert_eq!(errs.0[0].field, "teaching_assignments[0].weekly_hours");
    }

    #[test]
    fn huge_duration_has_no_run_and_no_candidate() {
        let req = request(json!({
            "teaching_assignments": [{"id": "long", "duration": 1_000_000_000_000i64}],
            "time_slots": [{"id": "x", "day_of_week": 0}]
        }));
        let p = Problem::from_request(&req).unwrap();
        assert_eq!(p.occupied_slots(0, p.sessions[0].duration), None);
        assert_eq!(p.occupied_slots(0, usize::MAX), None);
        let err = crate::GraphBuilder::build(p).unwrap_err();
        assert_eq!(err.sessions[0].reason, types::UnsatisfiableReason::NoCandidate);
    }
}
