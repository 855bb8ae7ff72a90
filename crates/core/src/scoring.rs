use std::collections::BTreeMap;

use types::{ResourceKind, SoftKind, SoftTerm};

use crate::config::SoftWeights;
use crate::constraints::Placements;
use crate::model::Problem;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SoftScores {
    pub terms: Vec<SoftTerm>,
    pub objective: f64,
}

impl SoftScores {
    pub fn raw(&self, kind: SoftKind) -> f64 {
        self.terms
            .iter()
            .find(|t| t.kind == kind)
            .map_or(0.0, |t| t.raw)
    }
}

/// Weighted soft objective; higher is better. Unplaced sessions contribute nothing.
///
/// Raw scores per kind:
/// - `preference`: +1 per session starting on a preferred slot, -1 per session touching an avoided one
/// - `load_balance`: minus the summed variance of each resource's daily occupied units
/// - `gap_minimization`: minus the idle periods inside each cohort's and teacher's day
/// - `subject_spread`: minus the extra same-day meetings of one subject for one cohort
pub fn compute_soft_scores(
    problem: &Problem,
    weights: &SoftWeights,
    placements: &Placements,
) -> SoftScores {
    let n_slots = problem.slots.len();
    let days = problem.days();
    let mut day_of_slot = vec![0usize; n_slots];
    for (d, members) in days.iter().enumerate() {
        for &t in members {
            day_of_slot[t] = d;
        }
    }

    let mut occ_resource = vec![false; problem.resources.len() * n_slots];
    let mut occ_cohort = vec![false; problem.cohorts.len() * n_slots];
    let mut units_per_day = vec![0u32; problem.resources.len() * days.len()];
    let mut subject_day: BTreeMap<(usize, &str, usize), u32> = BTreeMap::new();

    let mut preference = 0i64;
    for (si, p) in placements.iter().enumerate() {
        let Some(p) = p else { continue };
        let session = &problem.sessions[si];
        let Some(slots) = problem.occupied_slots(p.start, session.duration) else {
            continue;
        };
        if session.preferred.contains(&p.start) {
            preference += 1;
        }
        if slots.iter().any(|t| session.avoided.contains(t)) {
            preference -= 1;
        }
        for &t in &slots {
            for &r in &p.resources {
                occ_resource[r * n_slots + t] = true;
                units_per_day[r * days.len() + day_of_slot[t]] += 1;
            }
            if let Some(c) = session.cohort {
                occ_cohort[c * n_slots + t] = true;
            }
        }
        if let (Some(c), Some(subject)) = (session.cohort, &session.subject) {
            *subject_day
                .entry((c, subject.0.as_str(), day_of_slot[p.start]))
                .or_default() += 1;
        }
    }

    let mut load_variance = 0.0f64;
    if !days.is_empty() {
        for r in 0..problem.resources.len() {
            let row = &units_per_day[r * days.len()..(r + 1) * days.len()];
            let mean = row.iter().map(|&u| f64::from(u)).sum::<f64>() / days.len() as f64;
            let var = row
                .iter()
                .map(|&u| (f64::from(u) - mean).powi(2))
                .sum::<f64>()
                / days.len() as f64;
            load_variance += var;
        }
    }

    let idle_in_day = |occupied: &dyn Fn(usize) -> bool| -> i64 {
        let mut total = 0i64;
        for members in &days {
            let busy: Vec<usize> = members
                .iter()
                .enumerate()
                .filter(|(_, &t)| occupied(t))
                .map(|(k, _)| k)
                .collect();
            if let (Some(first), Some(last)) = (busy.first(), busy.last()) {
                total += (last - first + 1 - busy.len()) as i64;
            }
        }
        total
    };
    let mut gaps = 0i64;
    for c in 0..problem.cohorts.len() {
        gaps += idle_in_day(&|t| occ_cohort[c * n_slots + t]);
    }
    for (r, res) in problem.resources.iter().enumerate() {
        if res.kind == ResourceKind::Teacher {
            gaps += idle_in_day(&|t| occ_resource[r * n_slots + t]);
        }
    }

    let spread: i64 = subject_day
        .values()
        .map(|&count| i64::from(count.saturating_sub(1)))
        .sum();

    let raws = [
        (SoftKind::Preference, preference as f64),
        (SoftKind::LoadBalance, -load_variance),
        (SoftKind::GapMinimization, -(gaps as f64)),
        (SoftKind::SubjectSpread, -(spread as f64)),
    ];
    let mut objective = 0.0;
    let terms = raws
        .into_iter()
        .map(|(kind, raw)| {
            let weight = weights.get(kind);
            let contribution = weight * raw;
            objective += contribution;
            SoftTerm {
                kind,
                weight,
                raw,
                contribution,
            }
        })
        .collect();

    SoftScores { terms, objective }
}
