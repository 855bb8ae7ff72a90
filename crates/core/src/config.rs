use std::time::Duration;

use types::{ConstraintConfig, SoftKind};

use crate::error::ValidationErrors;

/// Resolved soft weights, indexed by `SoftKind` position in `SoftKind::ALL`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SoftWeights([f64; 4]);

impl SoftWeights {
    pub fn get(&self, kind: SoftKind) -> f64 {
        self.0[kind_slot(kind)]
    }

    pub fn from_config(cfg: &ConstraintConfig) -> Self {
        let mut w = [0.0; 4];
        for kind in SoftKind::ALL {
            w[kind_slot(kind)] = cfg.weight(kind);
        }
        SoftWeights(w)
    }
}

impl Default for SoftWeights {
    fn default() -> Self {
        Self::from_config(&ConstraintConfig::default())
    }
}

fn kind_slot(kind: SoftKind) -> usize {
    match kind {
        SoftKind::Preference => 0,
        SoftKind::LoadBalance => 1,
        SoftKind::GapMinimization => 2,
        SoftKind::SubjectSpread => 3,
    }
}

/// Validated solver configuration for one request.
#[derive(Clone, Debug)]
pub struct SolverSettings {
    pub weights: SoftWeights,
    pub search_budget: Duration,
    pub max_search_nodes: Option<u64>,
    pub population_size: usize,
    pub generations: usize,
    pub stall_generations: usize,
    pub elite_count: usize,
    pub tournament_size: usize,
    pub crossover_rate: f64,
    pub seed: u64,
    pub randomize_value_order: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        // The default config is always valid.
        match Self::from_config(&ConstraintConfig::default()) {
            Ok(s) => s,
            Err(e) => unreachable!("default constraint config rejected: {e}"),
        }
    }
}

impl SolverSettings {
    pub fn from_config(cfg: &ConstraintConfig) -> Result<Self, ValidationErrors> {
        let mut errs = ValidationErrors::default();

        for (kind, w) in &cfg.weights {
            if !w.is_finite() || *w < 0.0 {
                errs.push(
                    format!("constraints.weights.{kind}"),
                    format!("must be a non-negative number, got {w}"),
                );
            }
        }
        let search_budget = match Duration::try_from_secs_f64(cfg.max_search_seconds) {
            Ok(d) => d,
            Err(_) => {
                errs.push(
                    "constraints.max_search_seconds",
                    format!(
                        "must be a non-negative number of seconds that fits a duration, got {}",
                        cfg.max_search_seconds
                    ),
                );
                Duration::ZERO
            }
        };
        if cfg.population_size == 0 {
            errs.push("constraints.population_size", "must be at least 1");
        }
        if cfg.elite_count > cfg.population_size {
            errs.push(
                "constraints.elite_count",
                format!("must not exceed population_size ({})", cfg.population_size),
            );
        }
        if cfg.tournament_size == 0 {
            errs.push("constraints.tournament_size", "must be at least 1");
        }
        if !(0.0..=1.0).contains(&cfg.crossover_rate) {
            errs.push(
                "constraints.crossover_rate",
                format!("must lie in [0, 1], got {}", cfg.crossover_rate),
            );
        }
        if errs.is_empty() {
            Ok(SolverSettings {
                weights: SoftWeights::from_config(cfg),
                search_budget,
                max_search_nodes: cfg.max_search_nodes,
                population_size: cfg.population_size,
                generations: cfg.generations,
                stall_generations: cfg.stall_generations,
                elite_count: cfg.elite_count,
                tournament_size: cfg.tournament_size,
                crossover_rate: cfg.crossover_rate,
                seed: cfg.seed,
                randomize_value_order: cfg.randomize_value_order,
            })
        } else {
            Err(errs)
        }
    }
}
