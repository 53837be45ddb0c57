//! Periodic sweep of expired cache entries.
//!
//! The sweeper follows the usual background-task shape:
//! 1. Spawned by [`ResultCache::start_sweeper`]
//! 2. Runs until a shutdown signal arrives on the broadcast channel
//! 3. Performs one final sweep on the way out

use super::ResultCache;
use std::sync::Arc;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, info, trace};

impl ResultCache {
    /// Spawns the periodic sweeper.
    ///
    /// The task stops when `shutdown_rx` receives a value or its sender is dropped.
    pub fn start_sweeper(self: &Arc<Self>, shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let every = self.config().sweep_interval();
        tokio::spawn(run_sweeper(cache, every, shutdown_rx))
    }
}

pub(crate) async fn run_sweeper(
    cache: Arc<ResultCache>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    debug!(interval_ms = every.as_millis(), "cache sweeper started");

    loop {
        tokio::select! {
            biased; // Prioritize shutdown signal

            _ = shutdown_rx.recv() => {
                debug!("cache sweeper received shutdown signal");
                break;
            }

            _ = ticker.tick() => {
                let removed = cache.sweep();
                trace!(removed = removed, remaining = cache.len(), "cache sweep");
            }
        }
    }

    let removed = cache.sweep();
    info!(removed = removed, "cache sweeper shutdown complete");
}
