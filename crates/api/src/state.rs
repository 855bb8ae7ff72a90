use std::sync::Arc;

use engine::Engine;
use sched_core::{GraphCache, NoCache, Scheduler, SharedGraphCache};

use crate::config::ServiceConfig;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<dyn Scheduler>,
}

impl AppState {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    pub fn from_config(cfg: &ServiceConfig) -> Self {
        let cache: Arc<dyn GraphCache> = if cfg.cache_capacity == 0 {
            Arc::new(NoCache)
        } else {
            Arc::new(SharedGraphCache::new(cfg.cache_capacity))
        };
        Self::new(Arc::new(Engine::new(cache)))
    }
}
