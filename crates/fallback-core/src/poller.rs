//! Periodic re-query of one request.
//!
//! A [`PollHandle`] owns a background task that resolves the same request every
//! polling interval and publishes the value whenever it differs from the last one.
//! Failed rounds are logged and skipped; the previous value stays published.

use crate::{provider::FallbackProvider, types::QueryOptions};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

/// Handle to a running poll. Dropping it stops the poll.
pub struct PollHandle {
    latest: watch::Receiver<Option<Arc<Value>>>,
    cancel: CancellationToken,
    _stop_on_drop: DropGuard,
}

impl PollHandle {
    pub(crate) fn spawn(
        provider: FallbackProvider,
        method: String,
        params: Value,
        opts: QueryOptions,
        every: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        tokio::spawn(run_poll(provider, method, params, opts, every, tx, cancel.clone()));
        Self { latest: rx, cancel: cancel.clone(), _stop_on_drop: cancel.drop_guard() }
    }

    /// Most recently published value, if any round has succeeded yet.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Value>> {
        self.latest.borrow().clone()
    }

    /// Waits for the next changed value.
    ///
    /// Returns `None` once the poll has stopped.
    pub async fn changed(&mut self) -> Option<Arc<Value>> {
        self.latest.changed().await.ok()?;
        self.latest.borrow_and_update().clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn run_poll(
    provider: FallbackProvider,
    method: String,
    params: Value,
    opts: QueryOptions,
    every: Duration,
    tx: watch::Sender<Option<Arc<Value>>>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(method = %method, interval_ms = every.as_millis(), "poll started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = provider.query_shared(&method, params.clone(), opts) => result,
        };

        match result {
            Ok(value) => {
                let changed = tx.send_if_modified(|current| {
                    if current.as_deref() == Some(&*value) {
                        return false;
                    }
                    *current = Some(value);
                    true
                });
                if changed {
                    debug!(method = %method, "polled value changed");
                }
            }
            Err(e) => warn!(method = %method, error = %e, "poll round failed"),
        }
    }

    debug!(method = %method, "poll stopped");
}
