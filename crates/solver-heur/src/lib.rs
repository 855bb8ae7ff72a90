//! Population-based refinement of a hard-feasible assignment.
//!
//! Individuals are candidate-index vectors over the constraint graph. Every
//! operator keeps hard feasibility: mutation only moves a session to a
//! candidate that fits the rest of the individual, and crossover children
//! that break a hard constraint are discarded. Fitness is the weighted soft
//! objective from `sched_core::scoring`, higher is better.

use rand::{seq::SliceRandom, Rng};
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use sched_core::occupancy::Occupancy;
use sched_core::scoring::compute_soft_scores;
use sched_core::{Budget, ConstraintGraph, SoftWeights, SolverSettings, StopReason};
use tracing::{debug, info};

const CROSSOVER_ATTEMPTS: usize = 3;

#[derive(Clone, Debug, PartialEq)]
pub struct Individual {
    pub genes: Vec<Option<usize>>,
    pub fitness: f64,
}

impl Individual {
    fn evaluate(&mut self, graph: &ConstraintGraph, weights: &SoftWeights) {
        self.fitness = fitness(graph, weights, &self.genes);
    }
}

pub fn fitness(graph: &ConstraintGraph, weights: &SoftWeights, genes: &[Option<usize>]) -> f64 {
    compute_soft_scores(&graph.problem, weights, &graph.placements(genes)).objective
}

/// Occupancy of every placed session except `skip`; `None` when the genes clash.
fn occupancy_of(
    graph: &ConstraintGraph,
    genes: &[Option<usize>],
    skip: Option<usize>,
) -> Option<Occupancy> {
    let problem = &graph.problem;
    let mut occ = Occupancy::new(problem);
    for (s, g) in genes.iter().enumerate() {
        if Some(s) == skip {
            continue;
        }
        if let Some(c) = g {
            let session = &problem.sessions[s];
            let cand = graph.candidate(s, *c);
            if !occ.fits(problem, session, cand) {
                return None;
            }
            occ.place(session, cand);
        }
    }
    Some(occ)
}

pub fn is_hard_legal(graph: &ConstraintGraph, genes: &[Option<usize>]) -> bool {
    occupancy_of(graph, genes, None).is_some()
}

/// Move one placed session to another candidate that fits. Returns false when
/// no session could be moved.
fn mutate(graph: &ConstraintGraph, genes: &mut [Option<usize>], rng: &mut ChaCha8Rng) -> bool {
    let placed: Vec<usize> = (0..genes.len()).filter(|&s| genes[s].is_some()).collect();
    if placed.is_empty() {
        return false;
    }
    let problem = &graph.problem;
    for _ in 0..placed.len().min(10) {
        let s = placed[rng.gen_range(0..placed.len())];
        let Some(occ) = occupancy_of(graph, genes, Some(s)) else {
            return false;
        };
        let session = &problem.sessions[s];
        let options: Vec<usize> = graph.domains[s]
            .iter()
            .enumerate()
            .filter(|(k, cand)| Some(*k) != genes[s] && occ.fits(problem, session, cand))
            .map(|(k, _)| k)
            .collect();
        if let Some(&k) = options.choose(rng) {
            genes[s] = Some(k);
            return true;
        }
    }
    false
}

/// Child takes `b`'s genes on a random session subset and `a`'s elsewhere.
fn crossover(
    graph: &ConstraintGraph,
    a: &[Option<usize>],
    b: &[Option<usize>],
    rng: &mut ChaCha8Rng,
) -> Option<Vec<Option<usize>>> {
    for _ in 0..CROSSOVER_ATTEMPTS {
        let child: Vec<Option<usize>> = a
            .iter()
            .zip(b)
            .map(|(ga, gb)| if rng.gen_bool(0.5) { *gb } else { *ga })
            .collect();
        if child.as_slice() != a && is_hard_legal(graph, &child) {
            return Some(child);
        }
    }
    None
}

fn tournament<'a>(pop: &'a [Individual], k: usize, rng: &mut ChaCha8Rng) -> &'a Individual {
    let mut best = &pop[rng.gen_range(0..pop.len())];
    for _ in 1..k {
        let c = &pop[rng.gen_range(0..pop.len())];
        if c.fitness > best.fitness {
            best = c;
        }
    }
    best
}

fn sort_desc(pop: &mut [Individual]) {
    pop.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
}

#[derive(Clone, Debug)]
pub struct RefinerParams {
    pub weights: SoftWeights,
    pub population_size: usize,
    pub generations: usize,
    pub stall_generations: usize,
    pub elite_count: usize,
    pub tournament_size: usize,
    pub crossover_rate: f64,
    pub seed: u64,
}

impl RefinerParams {
    pub fn from_settings(s: &SolverSettings) -> Self {
        Self {
            weights: s.weights,
            population_size: s.population_size.max(1),
            generations: s.generations,
            stall_generations: s.stall_generations,
            elite_count: s.elite_count.min(s.population_size),
            tournament_size: s.tournament_size.max(1),
            crossover_rate: s.crossover_rate,
            seed: s.seed,
        }
    }
}

/// Restartable snapshot of a refinement run.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub population: Vec<Individual>,
    pub best: Individual,
    pub generation: u64,
    pub stall: u64,
    rng: ChaCha8Rng,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationReport {
    pub generation: u64,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub improved: bool,
}

/// Successive generations as an iterator; ends on the generation cap,
/// early stopping, or the budget.
pub struct Generations<'a> {
    graph: &'a ConstraintGraph,
    params: &'a RefinerParams,
    budget: &'a Budget,
    state: Checkpoint,
    stopped: Option<StopReason>,
}

impl<'a> Generations<'a> {
    pub fn new(
        graph: &'a ConstraintGraph,
        params: &'a RefinerParams,
        budget: &'a Budget,
        seed_genes: Vec<Option<usize>>,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut first = Individual {
            genes: seed_genes,
            fitness: 0.0,
        };
        first.evaluate(graph, &params.weights);

        let mut population = vec![first.clone()];
        for i in 1..params.population_size {
            let mut genes = first.genes.clone();
            for _ in 0..(1 + i % 3) {
                mutate(graph, &mut genes, &mut rng);
            }
            population.push(Individual {
                genes,
                fitness: 0.0,
            });
        }
        population[1..]
            .par_iter_mut()
            .for_each(|ind| ind.evaluate(graph, &params.weights));
        sort_desc(&mut population);

        let best = if population[0].fitness > first.fitness {
            population[0].clone()
        } else {
            first
        };
        Self::resume(
            graph,
            params,
            budget,
            Checkpoint {
                population,
                best,
                generation: 0,
                stall: 0,
                rng,
            },
        )
    }

    pub fn resume(
        graph: &'a ConstraintGraph,
        params: &'a RefinerParams,
        budget: &'a Budget,
        checkpoint: Checkpoint,
    ) -> Self {
        Self {
            graph,
            params,
            budget,
            state: checkpoint,
            stopped: None,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.state.clone()
    }

    pub fn best(&self) -> &Individual {
        &self.state.best
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    pub fn stopped(&self) -> Option<StopReason> {
        self.stopped
    }

    fn step(&mut self) -> GenerationReport {
        let graph = self.graph;
        let params = self.params;
        let st = &mut self.state;
        let size = params.population_size;

        let mut next: Vec<Individual> = st.population[..params.elite_count.min(st.population.len())]
            .to_vec();
        let elites = next.len();
        while next.len() < size {
            let p1 = tournament(&st.population, params.tournament_size, &mut st.rng);
            let mut genes = None;
            if st.population.len() > 1 && st.rng.gen_bool(params.crossover_rate) {
                let p2 = tournament(&st.population, params.tournament_size, &mut st.rng);
                genes = crossover(graph, &p1.genes, &p2.genes, &mut st.rng);
            }
            let genes = match genes {
                Some(g) => g,
                None => {
                    let mut g = p1.genes.clone();
                    mutate(graph, &mut g, &mut st.rng);
                    g
                }
            };
            next.push(Individual {
                genes,
                fitness: 0.0,
            });
        }
        next[elites..]
            .par_iter_mut()
            .for_each(|ind| ind.evaluate(graph, &params.weights));
        sort_desc(&mut next);
        debug_assert!(next.iter().all(|ind| is_hard_legal(graph, &ind.genes)));

        let improved = next[0].fitness > st.best.fitness;
        if improved {
            st.best = next[0].clone();
            st.stall = 0;
        } else {
            st.stall += 1;
        }
        st.population = next;
        st.generation += 1;

        let mean =
            st.population.iter().map(|i| i.fitness).sum::<f64>() / st.population.len() as f64;
        GenerationReport {
            generation: st.generation,
            best_fitness: st.best.fitness,
            mean_fitness: mean,
            improved,
        }
    }
}

impl Iterator for Generations<'_> {
    type Item = GenerationReport;

    fn next(&mut self) -> Option<GenerationReport> {
        if self.stopped.is_some() || self.state.generation >= self.params.generations as u64 {
            return None;
        }
        if self.params.stall_generations > 0
            && self.state.stall >= self.params.stall_generations as u64
        {
            return None;
        }
        if let Some(reason) = self.budget.check() {
            self.stopped = Some(reason);
            return None;
        }
        let report = self.step();
        debug!(
            generation = report.generation,
            best = report.best_fitness,
            mean = report.mean_fitness,
            "generation"
        );
        Some(report)
    }
}

#[derive(Clone, Debug)]
pub struct RefineResult {
    pub best: Individual,
    pub initial_fitness: f64,
    pub generations: u64,
    pub stopped: Option<StopReason>,
}

impl RefineResult {
    pub fn improved(&self) -> bool {
        self.best.fitness > self.initial_fitness
    }
}

pub struct Refiner;

impl Refiner {
    pub fn new() -> Self {
        Self
    }

    /// Improve `seed_genes`, which must already satisfy every hard constraint.
    pub fn refine(
        &self,
        graph: &ConstraintGraph,
        params: &RefinerParams,
        budget: &Budget,
        seed_genes: Vec<Option<usize>>,
    ) -> RefineResult {
        let initial_fitness = fitness(graph, &params.weights, &seed_genes);
        let mut gens = Generations::new(graph, params, budget, seed_genes);
        for _ in gens.by_ref() {}
        let best = gens.best().clone();
        info!(
            generations = gens.generation(),
            initial = initial_fitness,
            best = best.fitness,
            stopped = ?gens.stopped(),
            "refinement finished"
        );
        RefineResult {
            best,
            initial_fitness,
            generations: gens.generation(),
            stopped: gens.stopped(),
        }
    }
}

impl Default for Refiner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sched_core::{GraphBuilder, Problem};
    use serde_json::json;
    use solver_exact::ExactSolver;
    use types::ScheduleRequest;

    fn fixture(sessions: usize, seed: u64) -> (ConstraintGraph, Vec<Option<usize>>) {
        let mut slots = Vec::new();
        for d in 0..3 {
            for p in 0..4 {
                slots.push(json!({"id": format!("d{d}p{p}"), "day_of_week": d, "period": p}));
            }
        }
        let specs: Vec<_> = (0..sessions)
            .map(|i| {
                json!({
                    "id": i,
                    "teacher_id": format!("t{}", i % 3),
                    "rombel_id": format!("g{}", i % 2),
                    "subject_id": format!("s{}", i % 4),
                    "preferred_slots": [format!("d{}p0", (i as u64 + seed) % 3)]
                })
            })
            .collect();
        let req: ScheduleRequest = serde_json::from_value(json!({
            "teaching_assignments": specs,
            "time_slots": slots
        }))
        .unwrap();
        let g = GraphBuilder::build(Problem::from_request(&req).unwrap()).unwrap();
        let start = ExactSolver::default().solve(&g, &Budget::unlimited());
        (g, start.assignment)
    }

    fn params(seed: u64) -> RefinerParams {
        RefinerParams {
            generations: 30,
            population_size: 12,
            seed,
            ..RefinerParams::from_settings(&SolverSettings::default())
        }
    }

    #[test]
    fn refinement_never_loses_fitness_and_stays_legal() {
        let (g, seed) = fixture(8, 0);
        let p = params(1);
        let r = Refiner::new().refine(&g, &p, &Budget::unlimited(), seed);
        assert!(r.best.fitness >= r.initial_fitness);
        assert!(is_hard_legal(&g, &r.best.genes));
        assert!(r.best.genes.iter().all(Option::is_some));
        assert_eq!(r.best.fitness, fitness(&g, &p.weights, &r.best.genes));
    }

    #[test]
    fn same_seed_same_result() {
        let (g, seed) = fixture(8, 0);
        let p = params(42);
        let a = Refiner::new().refine(&g, &p, &Budget::unlimited(), seed.clone());
        let b = Refiner::new().refine(&g, &p, &Budget::unlimited(), seed);
        assert_eq!(a.best, b.best);
    }

    #[test]
    fn checkpoint_resume_continues_the_same_run() {
        let (g, seed) = fixture(6, 1);
        let p = params(3);
        let budget = Budget::unlimited();

        let mut straight = Generations::new(&g, &p, &budget, seed.clone());
        let all: Vec<GenerationReport> = straight.by_ref().take(10).collect();

        let mut first = Generations::new(&g, &p, &budget, seed);
        let head: Vec<GenerationReport> = first.by_ref().take(4).collect();
        let cp = first.checkpoint();
        drop(first);
        let tail: Vec<GenerationReport> = Generations::resume(&g, &p, &budget, cp).take(6).collect();

        assert_eq!([head, tail].concat(), all);
    }

    #[test]
    fn expired_budget_runs_no_generation() {
        let (g, seed) = fixture(6, 0);
        let p = params(0);
        let budget = Budget::new(
            std::time::Duration::ZERO,
            None,
            sched_core::CancelToken::new(),
        );
        let r = Refiner::new().refine(&g, &p, &budget, seed);
        assert_eq!(r.generations, 0);
        assert_eq!(r.stopped, Some(StopReason::Deadline));
    }

    #[test]
    fn early_stopping_after_stall() {
        // a single session with one candidate cannot improve
        let req: ScheduleRequest = serde_json::from_value(json!({
            "teaching_assignments": [{"id": "only"}],
            "time_slots": [{"id": "x", "day_of_week": 0}]
        }))
        .unwrap();
        let g = GraphBuilder::build(Problem::from_request(&req).unwrap()).unwrap();
        let p = RefinerParams {
            stall_generations: 5,
            generations: 100,
            ..params(0)
        };
        let r = Refiner::new().refine(&g, &p, &Budget::unlimited(), vec![Some(0)]);
        assert_eq!(r.generations, 5);
        assert_eq!(r.stopped, None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn best_fitness_is_monotone(seed in 0u64..1000, sessions in 2usize..10) {
            let (g, start) = fixture(sessions, seed);
            let p = params(seed);
            let budget = Budget::unlimited();
            let reports: Vec<GenerationReport> = Generations::new(&g, &p, &budget, start).collect();
            for w in reports.windows(2) {
                prop_assert!(w[1].best_fitness >= w[0].best_fitness);
            }
        }
    }
}
