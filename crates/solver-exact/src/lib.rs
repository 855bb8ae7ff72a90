//! Backtracking search with forward checking over a [`ConstraintGraph`].
//!
//! Variables are sessions, values are candidate indexes into each session's
//! domain. Variable order is most-constrained first (smallest live domain,
//! then longest duration, then session index), so a run is fully
//! deterministic unless value shuffling is requested with a seed.
//!
//! Search state lives in an explicit decision stack instead of recursion:
//! every frame remembers its variable, the next value to try and the trail
//! length to rewind to. Pruned `(session, candidate)` pairs are pushed on
//! the trail so undoing a decision is a pop loop.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sched_core::occupancy::Occupancy;
use sched_core::{Budget, ConstraintGraph, SolverSettings, StopReason};
use tracing::{debug, info};

/// Budget and deadline are checked every this many search nodes.
pub const POLL_INTERVAL: u64 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExactOutcome {
    /// Every session placed.
    Complete,
    /// Search space exhausted: no feasible assignment exists.
    Exhausted,
    /// Budget ran out; the result holds the best partial assignment.
    Stopped(StopReason),
}

#[derive(Clone, Debug)]
pub struct ExactResult {
    pub outcome: ExactOutcome,
    /// Candidate index per session; complete on success, best partial otherwise.
    pub assignment: Vec<Option<usize>>,
    pub nodes: u64,
    pub backtracks: u64,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct ExactSolver {
    pub max_nodes: Option<u64>,
    /// Shuffle each domain's value order with this seed.
    pub shuffle_seed: Option<u64>,
}

impl ExactSolver {
    pub fn from_settings(settings: &SolverSettings) -> Self {
        Self {
            max_nodes: settings.max_search_nodes,
            shuffle_seed: settings.randomize_value_order.then_some(settings.seed),
        }
    }

    pub fn solve(&self, graph: &ConstraintGraph, budget: &Budget) -> ExactResult {
        let started = budget.elapsed();
        let mut search = Search::new(graph, self, budget);
        let outcome = search.run();
        let assignment = match outcome {
            ExactOutcome::Complete => search.assigned.clone(),
            _ => search.best.clone(),
        };
        info!(
            sessions = graph.session_count(),
            nodes = search.nodes,
            backtracks = search.backtracks,
            outcome = ?outcome,
            "exact search finished"
        );
        ExactResult {
            outcome,
            assignment,
            nodes: search.nodes,
            backtracks: search.backtracks,
            elapsed: budget.elapsed().saturating_sub(started),
        }
    }
}

struct Frame {
    var: usize,
    cursor: usize,
    mark: usize,
    chosen: Option<usize>,
}

enum Advance {
    Placed,
    Exhausted,
    Stopped(StopReason),
}

struct Search<'g> {
    graph: &'g ConstraintGraph,
    budget: &'g Budget,
    max_nodes: Option<u64>,
    order: Vec<Vec<usize>>,
    alive: Vec<Vec<bool>>,
    alive_count: Vec<usize>,
    assigned: Vec<Option<usize>>,
    occ: Occupancy,
    trail: Vec<(usize, usize)>,
    stack: Vec<Frame>,
    best: Vec<Option<usize>>,
    best_depth: usize,
    nodes: u64,
    backtracks: u64,
}

impl<'g> Search<'g> {
    fn new(graph: &'g ConstraintGraph, solver: &ExactSolver, budget: &'g Budget) -> Self {
        let n = graph.session_count();
        let mut order: Vec<Vec<usize>> = graph
            .domains
            .iter()
            .map(|d| (0..d.len()).collect())
            .collect();
        if let Some(seed) = solver.shuffle_seed {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            for o in &mut order {
                o.shuffle(&mut rng);
            }
        }
        Self {
            graph,
            budget,
            max_nodes: solver.max_nodes,
            order,
            alive: graph.domains.iter().map(|d| vec![true; d.len()]).collect(),
            alive_count: graph.domains.iter().map(Vec::len).collect(),
            assigned: vec![None; n],
            occ: Occupancy::new(&graph.problem),
            trail: Vec::new(),
            stack: Vec::with_capacity(n),
            best: vec![None; n],
            best_depth: 0,
            nodes: 0,
            backtracks: 0,
        }
    }

    fn run(&mut self) -> ExactOutcome {
        let n = self.graph.session_count();
        loop {
            if self.stack.len() == n {
                return ExactOutcome::Complete;
            }
            let Some(var) = self.select() else {
                return ExactOutcome::Complete;
            };
            self.stack.push(Frame {
                var,
                cursor: 0,
                mark: self.trail.len(),
                chosen: None,
            });
            loop {
                match self.advance_top() {
                    Advance::Placed => break,
                    Advance::Stopped(reason) => return ExactOutcome::Stopped(reason),
                    Advance::Exhausted => {
                        self.stack.pop();
                        if self.stack.is_empty() {
                            return ExactOutcome::Exhausted;
                        }
                        self.backtracks += 1;
                    }
                }
            }
        }
    }

    /// Smallest live domain first, then longer sessions, then lower index.
    fn select(&self) -> Option<usize> {
        let sessions = &self.graph.problem.sessions;
        (0..self.assigned.len())
            .filter(|&s| self.assigned[s].is_none())
            .min_by(|&a, &b| {
                self.alive_count[a]
                    .cmp(&self.alive_count[b])
                    .then(sessions[b].duration.cmp(&sessions[a].duration))
                    .then(a.cmp(&b))
            })
    }

    /// Undo the top frame's current choice and try its next live value.
    fn advance_top(&mut self) -> Advance {
        let top = self.stack.len() - 1;
        let var = self.stack[top].var;
        if self.stack[top].chosen.take().is_some() {
            self.undo(var, self.stack[top].mark);
        }
        while self.stack[top].cursor < self.order[var].len() {
            let c = self.order[var][self.stack[top].cursor];
            self.stack[top].cursor += 1;
            if !self.alive[var][c] {
                continue;
            }
            self.nodes += 1;
            self.place(var, c);
            self.stack[top].chosen = Some(c);
            if self.stack.len() > self.best_depth {
                self.best_depth = self.stack.len();
                self.best.clone_from(&self.assigned);
            }
            let consistent = self.forward_check(var);
            if let Some(reason) = self.tick() {
                return Advance::Stopped(reason);
            }
            if consistent {
                return Advance::Placed;
            }
            self.stack[top].chosen = None;
            self.undo(var, self.stack[top].mark);
        }
        Advance::Exhausted
    }

    fn tick(&self) -> Option<StopReason> {
        if self.max_nodes.is_some_and(|m| self.nodes >= m) {
            return Some(StopReason::NodeLimit);
        }
        if self.nodes % POLL_INTERVAL == 0 {
            if let Some(reason) = self.budget.check() {
                debug!(nodes = self.nodes, %reason, "exact search interrupted");
                return Some(reason);
            }
        }
        None
    }

    fn place(&mut self, var: usize, c: usize) {
        let session = &self.graph.problem.sessions[var];
        let cand = self.graph.candidate(var, c);
        debug_assert!(self.occ.fits(&self.graph.problem, session, cand));
        self.occ.place(session, cand);
        self.assigned[var] = Some(c);
    }

    fn undo(&mut self, var: usize, mark: usize) {
        if let Some(c) = self.assigned[var].take() {
            let session = &self.graph.problem.sessions[var];
            self.occ.remove(session, self.graph.candidate(var, c));
        }
        while self.trail.len() > mark {
            if let Some((s, k)) = self.trail.pop() {
                self.alive[s][k] = true;
                self.alive_count[s] += 1;
            }
        }
    }

    /// Prune neighbor values that no longer fit; false on a domain wipe-out.
    fn forward_check(&mut self, var: usize) -> bool {
        let problem = &self.graph.problem;
        for &u in &self.graph.neighbors[var] {
            if self.assigned[u].is_some() {
                continue;
            }
            let session = &problem.sessions[u];
            for (k, cand) in self.graph.domains[u].iter().enumerate() {
                if self.alive[u][k] && !self.occ.fits(problem, session, cand) {
                    self.alive[u][k] = false;
                    self.alive_count[u] -= 1;
                    self.trail.push((u, k));
                }
            }
            if self.alive_count[u] == 0 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sched_core::constraints::evaluate_hard;
    use sched_core::{CancelToken, GraphBuilder, Problem};
    use serde_json::json;
    use types::ScheduleRequest;

    fn graph(v: serde_json::Value) -> ConstraintGraph {
        let req: ScheduleRequest = serde_json::from_value(v).unwrap();
        GraphBuilder::build(Problem::from_request(&req).unwrap()).unwrap()
    }

    fn slots(days: i64, periods: i64) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        for d in 0..days {
            for p in 0..periods {
                out.push(json!({"id": format!("d{d}p{p}"), "day_of_week": d, "period": p}));
            }
        }
        out
    }

    #[test]
    fn places_sessions_sharing_a_teacher_apart() {
        let g = graph(json!({
            "teaching_assignments": [
                {"id": "a", "teacher_id": "t"},
                {"id": "b", "teacher_id": "t"},
                {"id": "c", "teacher_id": "t"}
            ],
            "time_slots": slots(1, 3)
        }));
        let r = ExactSolver::default().solve(&g, &Budget::unlimited());
        assert_eq!(r.outcome, ExactOutcome::Complete);
        let mut starts: Vec<usize> = r
            .assignment
            .iter()
            .enumerate()
            .map(|(s, c)| g.candidate(s, c.unwrap()).start)
            .collect();
        starts.sort();
        assert_eq!(starts, vec![0, 1, 2]);
    }

    #[test]
    fn proves_pigeonhole_infeasible() {
        let g = graph(json!({
            "teaching_assignments": [
                {"id": "a", "teacher_id": "t"},
                {"id": "b", "teacher_id": "t"},
                {"id": "c", "teacher_id": "t"}
            ],
            "time_slots": slots(1, 2)
        }));
        let r = ExactSolver::default().solve(&g, &Budget::unlimited());
        assert_eq!(r.outcome, ExactOutcome::Exhausted);
        assert!(r.backtracks > 0);
        assert_eq!(r.assignment.iter().flatten().count(), 2);
    }

    #[test]
    fn most_constrained_session_is_placed_first() {
        // "long" has two starts, "short" three; long goes first and takes p0-p1.
        let g = graph(json!({
            "teaching_assignments": [
                {"id": "short", "teacher_id": "t"},
                {"id": "long", "teacher_id": "t", "duration": 2}
            ],
            "time_slots": slots(1, 3)
        }));
        let r = ExactSolver::default().solve(&g, &Budget::unlimited());
        assert_eq!(r.outcome, ExactOutcome::Complete);
        assert_eq!(g.candidate(1, r.assignment[1].unwrap()).start, 0);
        assert_eq!(g.candidate(0, r.assignment[0].unwrap()).start, 2);
    }

    #[test]
    fn same_input_same_assignment() {
        let v = json!({
            "teaching_assignments": (0..12).map(|i| json!({
                "id": i, "teacher_id": format!("t{}", i % 3), "rombel_id": format!("g{}", i % 4)
            })).collect::<Vec<_>>(),
            "time_slots": slots(2, 4)
        });
        let g = graph(v);
        let a = ExactSolver::default().solve(&g, &Budget::unlimited());
        let b = ExactSolver::default().solve(&g, &Budget::unlimited());
        assert_eq!(a.assignment, b.assignment);

        let seeded = ExactSolver {
            max_nodes: None,
            shuffle_seed: Some(7),
        };
        let c = seeded.solve(&g, &Budget::unlimited());
        let d = seeded.solve(&g, &Budget::unlimited());
        assert_eq!(c.assignment, d.assignment);
    }

    #[test]
    fn zero_budget_returns_partial_after_first_poll() {
        let sessions: Vec<_> = (0..200)
            .map(|i| json!({"id": i, "teacher_id": format!("t{}", i % 50)}))
            .collect();
        let g = graph(json!({"teaching_assignments": sessions, "time_slots": slots(5, 8)}));
        let budget = Budget::new(Duration::ZERO, None, CancelToken::new());
        let r = ExactSolver::default().solve(&g, &budget);
        assert_eq!(r.outcome, ExactOutcome::Stopped(StopReason::Deadline));
        assert_eq!(r.nodes, POLL_INTERVAL);
        assert_eq!(r.assignment.iter().flatten().count(), POLL_INTERVAL as usize);
    }

    #[test]
    fn node_limit_stops_search() {
        let g = graph(json!({
            "teaching_assignments": (0..10).map(|i| json!({"id": i})).collect::<Vec<_>>(),
            "time_slots": slots(1, 10)
        }));
        let solver = ExactSolver {
            max_nodes: Some(3),
            shuffle_seed: None,
        };
        let r = solver.solve(&g, &Budget::unlimited());
        assert_eq!(r.outcome, ExactOutcome::Stopped(StopReason::NodeLimit));
        assert_eq!(r.nodes, 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn complete_assignments_pass_the_independent_check(
            sessions in prop::collection::vec((0u8..3, 0u8..3, 1usize..3), 1..10),
            periods in 2i64..5,
        ) {
            let specs: Vec<_> = sessions
                .iter()
                .enumerate()
                .map(|(i, (t, c, d))| json!({
                    "id": i,
                    "teacher_id": format!("t{t}"),
                    "rombel_id": format!("c{c}"),
                    "duration": d
                }))
                .collect();
            let g = graph(json!({"teaching_assignments": specs, "time_slots": slots(2, periods)}));
            let solver = ExactSolver { max_nodes: Some(50_000), shuffle_seed: None };
            let r = solver.solve(&g, &Budget::unlimited());
            let violations = evaluate_hard(&g.problem, &g.placements(&r.assignment));
            match r.outcome {
                ExactOutcome::Complete => prop_assert!(violations.is_empty()),
                _ => prop_assert!(violations
                    .iter()
                    .all(|v| v.constraint == types::HardKind::UnplacedSession)),
            }
        }
    }
}
