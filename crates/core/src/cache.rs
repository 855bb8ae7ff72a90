use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::ConstraintGraph;
use crate::model::Problem;

/// Identity of a compiled graph: same sessions, resources and slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn of(problem: &Problem) -> Self {
        let mut h = DefaultHasher::new();
        problem.hash(&mut h);
        Fingerprint(h.finish())
    }
}

/// Store of compiled graphs shared across requests. Entries are immutable;
/// callers get an `Arc` and never see another request's search state.
pub trait GraphCache: Send + Sync {
    fn get(&self, key: Fingerprint) -> Option<Arc<ConstraintGraph>>;
    fn insert(&self, key: Fingerprint, graph: Arc<ConstraintGraph>);
}

/// Caches nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCache;

impl GraphCache for NoCache {
    fn get(&self, _key: Fingerprint) -> Option<Arc<ConstraintGraph>> {
        None
    }

    fn insert(&self, _key: Fingerprint, _graph: Arc<ConstraintGraph>) {}
}

/// Append-only cache bounded by `capacity`; once full, new graphs are not kept.
pub struct SharedGraphCache {
    capacity: usize,
    entries: RwLock<HashMap<Fingerprint, Arc<ConstraintGraph>>>,
}

impl SharedGraphCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GraphCache for SharedGraphCache {
    fn get(&self, key: Fingerprint) -> Option<Arc<ConstraintGraph>> {
        self.entries.read().get(&key).cloned()
    }

    fn insert(&self, key: Fingerprint, graph: Arc<ConstraintGraph>) {
        let mut w = self.entries.write();
        if w.len() < self.capacity && !w.contains_key(&key) {
            w.insert(key, graph);
        }
    }
}
