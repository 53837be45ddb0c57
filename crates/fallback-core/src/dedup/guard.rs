//! `InFlightGuard` RAII type removing an in-flight entry when its leader task ends.
//!
//! The guard is owned by the spawned leader task. It runs on every exit path:
//! normal completion, early return, and panic unwinding. Dropping the guard removes
//! the map entry only if it still belongs to the same generation, so a guard that
//! outlives its entry can never remove a successor.

use super::{InFlightKey, InFlightMap, InFlightRequest};
use std::sync::Arc;
use tracing::trace;

pub(crate) struct InFlightGuard {
    map: Arc<InFlightMap>,
    key: InFlightKey,
    generation: u64,
}

impl InFlightGuard {
    pub(crate) fn new(map: Arc<InFlightMap>, key: InFlightKey, generation: u64) -> Self {
        Self { map, key, generation }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        let owned = map
            .get(&self.key)
            .is_some_and(|entry: &InFlightRequest| entry.generation == self.generation);
        if owned {
            map.remove(&self.key);
            trace!(
                fingerprint = %self.key.0,
                quorum = self.key.1,
                generation = self.generation,
                "in-flight entry removed"
            );
        }
    }
}
