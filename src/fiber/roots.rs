//! The registry of live root fibers.
//!
//! Root fibers (those forked into the global scope while `FiberRoots` is
//! enabled) are tracked here for diagnostics. The registry is striped by
//! fiber id so that concurrent roots rarely contend on the same lock.

use super::FiberHandle;
use crate::types::FiberId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const SHARDS: usize = 16;

pub(crate) struct RootRegistry {
    shards: [Mutex<BTreeMap<FiberId, FiberHandle>>; SHARDS],
}

impl RootRegistry {
    fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(BTreeMap::new())),
        }
    }

    fn shard(&self, id: FiberId) -> &Mutex<BTreeMap<FiberId, FiberHandle>> {
        let index = id.sequence().map_or(0, |seq| (seq % SHARDS as u64) as usize);
        &self.shards[index]
    }

    pub(crate) fn insert(&self, fiber: &FiberHandle) {
        self.shard(fiber.id()).lock().insert(fiber.id(), fiber.clone());
    }

    pub(crate) fn remove(&self, id: FiberId) -> bool {
        self.shard(id).lock().remove(&id).is_some()
    }

    pub(crate) fn contains(&self, id: FiberId) -> bool {
        self.shard(id).lock().contains_key(&id)
    }

    /// Every registered root, ordered by fiber id.
    pub(crate) fn snapshot(&self) -> Vec<FiberHandle> {
        let mut roots: Vec<FiberHandle> = self
            .shards
            .iter()
            .flat_map(|shard| shard.lock().values().cloned().collect::<Vec<_>>())
            .collect();
        roots.sort();
        roots
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}

static ROOTS: OnceLock<RootRegistry> = OnceLock::new();

/// The process-wide registry, created on first use.
///
/// Runtime construction calls this so the registry exists before any fiber
/// is forked.
pub(crate) fn init_roots() -> &'static RootRegistry {
    ROOTS.get_or_init(RootRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_cover_all_ids() {
        let registry = RootRegistry::new();
        assert_eq!(registry.len(), 0);
        for seq in 0..64_u64 {
            let shard = registry.shard(FiberId::new_for_test(seq)) as *const _;
            assert!(registry.shards.iter().any(|s| std::ptr::eq(s, shard)));
        }
        let none_shard = registry.shard(FiberId::NONE) as *const _;
        assert!(std::ptr::eq(&registry.shards[0], none_shard));
    }
}
