use types::HardKind;

use crate::graph::Candidate;
use crate::model::{Problem, Session};

/// A hard constraint that stops a candidate from being placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Blocker {
    pub kind: HardKind,
    pub slot: usize,
    pub resource: Option<usize>,
    pub cohort: Option<usize>,
}

/// Per-slot load counters for resources, cohorts and slots.
#[derive(Clone, Debug)]
pub struct Occupancy {
    slots: usize,
    resource_load: Vec<u32>,
    cohort_load: Vec<u32>,
    slot_load: Vec<u32>,
}

impl Occupancy {
    pub fn new(problem: &Problem) -> Self {
        let slots = problem.slots.len();
        Self {
            slots,
            resource_load: vec![0; problem.resources.len() * slots],
            cohort_load: vec![0; problem.cohorts.len() * slots],
            slot_load: vec![0; slots],
        }
    }

    pub fn fits(&self, problem: &Problem, session: &Session, cand: &Candidate) -> bool {
        cand.slots.iter().all(|&t| {
            self.slot_load[t] < problem.slots[t].capacity
                && session
                    .cohort
                    .map_or(true, |c| self.cohort_load[c * self.slots + t] == 0)
                && cand.resources.iter().all(|&r| {
                    self.resource_load[r * self.slots + t] < problem.resources[r].max_load
                })
        })
    }

    /// Every reason `cand` cannot be placed against the current load.
    pub fn blockers(&self, problem: &Problem, session: &Session, cand: &Candidate) -> Vec<Blocker> {
        let mut out = Vec::new();
        for &t in &cand.slots {
            for &r in &cand.resources {
                if self.resource_load[r * self.slots + t] >= problem.resources[r].max_load {
                    out.push(Blocker {
                        kind: HardKind::ResourceDoubleBooking,
                        slot: t,
                        resource: Some(r),
                        cohort: None,
                    });
                }
            }
            if let Some(c) = session.cohort {
                if self.cohort_load[c * self.slots + t] > 0 {
                    out.push(Blocker {
                        kind: HardKind::CohortDoubleBooking,
                        slot: t,
                        resource: None,
                        cohort: Some(c),
                    });
                }
            }
            if self.slot_load[t] >= problem.slots[t].capacity {
                out.push(Blocker {
                    kind: HardKind::SlotCapacity,
                    slot: t,
                    resource: None,
                    cohort: None,
                });
            }
        }
        out
    }

    pub fn place(&mut self, session: &Session, cand: &Candidate) {
        for &t in &cand.slots {
            self.slot_load[t] += 1;
            if let Some(c) = session.cohort {
                self.cohort_load[c * self.slots + t] += 1;
            }
            for &r in &cand.resources {
                self.resource_load[r * self.slots + t] += 1;
            }
        }
    }

    pub fn remove(&mut self, session: &Session, cand: &Candidate) {
        for &t in &cand.slots {
            self.slot_load[t] -= 1;
            if let Some(c) = session.cohort {
                self.cohort_load[c * self.slots + t] -= 1;
            }
            for &r in &cand.resources {
                self.resource_load[r * self.slots + t] -= 1;
            }
        }
    }
}
