//! Tier-by-tier dispatch of one request.
//!
//! # State Machine
//!
//! ```text
//!   Idle ──► TierActive(0) ──► QuorumReached
//!                 │
//!                 ▼ ImpossibleToReach / budget spent
//!           TierExhausted(0) ──► TierActive(1) ──► ... ──► AllTiersExhausted
//! ```
//!
//! Within a tier, up to `max_fanout` backends are called concurrently, heaviest (and
//! healthy) first; queued backends are launched as earlier calls settle. Each backend
//! runs its own retry loop and contributes exactly one final outcome to the tier's
//! [`QuorumAggregator`]. Leaving a tier drops every outstanding call and cancels the
//! tier's [`CancellationToken`], so late responses never reach the aggregator.

use super::retry::{RetryController, RetryDecision, RetryState};
use crate::{
    backend::{
        client::BackendClient,
        errors::{BackendError, FallbackError},
        health::HealthTracker,
        registry::{BackendDescriptor, Registry, Tier},
    },
    metrics,
    quorum::{AggregationSignal, QuorumAggregator, ResponseComparator},
    types::ResponseRecord,
};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::VecDeque,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Dispatch lifecycle of one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    TierActive(usize),
    TierExhausted(usize),
    QuorumReached,
    AllTiersExhausted,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::TierActive(i) => write!(f, "tier_active({i})"),
            Self::TierExhausted(i) => write!(f, "tier_exhausted({i})"),
            Self::QuorumReached => write!(f, "quorum_reached"),
            Self::AllTiersExhausted => write!(f, "all_tiers_exhausted"),
        }
    }
}

/// Everything the dispatcher needs to resolve one request.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub method: Arc<str>,
    pub params: Arc<Value>,
    pub quorum: usize,
    pub max_fanout: usize,
}

/// A quorum-agreed value and where it came from.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub value: Arc<Value>,
    /// Index of the tier that reached quorum.
    pub tier: usize,
}

/// Progress of a dispatch, readable while it runs.
#[derive(Debug, Default)]
pub struct DispatchProgress {
    tier: AtomicUsize,
    attempted: Mutex<Vec<Arc<str>>>,
}

impl DispatchProgress {
    fn enter_tier(&self, tier: usize) {
        self.tier.store(tier, Ordering::Release);
    }

    fn record_attempt(&self, backend_id: &Arc<str>) {
        let mut attempted = self.attempted.lock();
        if !attempted.iter().any(|b| b == backend_id) {
            attempted.push(Arc::clone(backend_id));
        }
    }

    /// Index of the tier currently (or last) active.
    #[must_use]
    pub fn current_tier(&self) -> usize {
        self.tier.load(Ordering::Acquire)
    }

    /// Backends called so far, in launch order.
    #[must_use]
    pub fn attempted(&self) -> Vec<Arc<str>> {
        self.attempted.lock().clone()
    }
}

/// Every attempt made against one backend; the last record is its final outcome.
struct BackendRun {
    records: Vec<ResponseRecord>,
}

enum TierOutcome {
    Reached(Arc<Value>),
    Exhausted,
}

/// Drives the tier state machine against a registry snapshot.
pub struct TieredDispatcher {
    client: Arc<dyn BackendClient>,
    comparator: Arc<dyn ResponseComparator>,
    retry: RetryController,
    health: Arc<HealthTracker>,
}

impl TieredDispatcher {
    #[must_use]
    pub fn new(
        client: Arc<dyn BackendClient>,
        comparator: Arc<dyn ResponseComparator>,
        retry: RetryController,
        health: Arc<HealthTracker>,
    ) -> Self {
        Self { client, comparator, retry, health }
    }

    #[must_use]
    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    /// Resolves `request` tier by tier.
    ///
    /// # Errors
    ///
    /// Returns [`FallbackError::QuorumUnreachable`] with every received record when no
    /// tier reaches the quorum.
    pub async fn dispatch(
        &self,
        registry: &Registry,
        request: &DispatchRequest,
        progress: &DispatchProgress,
    ) -> Result<Resolution, FallbackError> {
        let tiers = registry.tiers_in_priority_order();
        let mut records: Vec<ResponseRecord> = Vec::new();
        let mut state = DispatchState::Idle;

        for (tier_index, tier) in tiers.iter().enumerate() {
            if tier_index > 0 {
                metrics::record_tier_escalation();
            }
            transition(&mut state, DispatchState::TierActive(tier_index), request);
            progress.enter_tier(tier_index);

            match self.run_tier(tier_index, tier, request, progress, &mut records).await {
                TierOutcome::Reached(value) => {
                    transition(&mut state, DispatchState::QuorumReached, request);
                    return Ok(Resolution { value, tier: tier_index });
                }
                TierOutcome::Exhausted => {
                    transition(&mut state, DispatchState::TierExhausted(tier_index), request);
                }
            }
        }

        transition(&mut state, DispatchState::AllTiersExhausted, request);
        records.sort_by_key(|r| r.received_at);
        warn!(
            method = %request.method,
            quorum = request.quorum,
            tiers = tiers.len(),
            responses = records.len(),
            "quorum unreachable on every tier"
        );
        metrics::record_quorum_unreachable(&request.method);

        Err(FallbackError::QuorumUnreachable {
            quorum: request.quorum,
            tiers_tried: tiers.len(),
            records: records.into(),
        })
    }

    async fn run_tier(
        &self,
        tier_index: usize,
        tier: &Tier,
        request: &DispatchRequest,
        progress: &DispatchProgress,
        records: &mut Vec<ResponseRecord>,
    ) -> TierOutcome {
        let mut aggregator = QuorumAggregator::new(
            tier.len(),
            request.quorum,
            Arc::clone(&request.method),
            Arc::clone(&self.comparator),
        );
        if aggregator.check().is_terminal() {
            warn!(
                tier = tier_index,
                backends = tier.len(),
                quorum = request.quorum,
                "tier too small for quorum, skipping"
            );
            return TierOutcome::Exhausted;
        }

        let fanout = request.max_fanout.max(1);
        let tier_deadline = Instant::now() + tier.budget(fanout, self.retry.config());
        let cancel = CancellationToken::new();
        let _cancel_on_exit = cancel.clone().drop_guard();

        let mut queue: VecDeque<Arc<BackendDescriptor>> = self.health.order(tier.backends()).into();
        let mut in_flight = FuturesUnordered::new();
        while in_flight.len() < fanout {
            let Some(backend) = queue.pop_front() else { break };
            progress.record_attempt(&backend.id);
            in_flight.push(self.call_backend(cancel.clone(), tier_index, backend, request, tier_deadline));
        }

        debug!(
            tier = tier_index,
            backends = tier.len(),
            launched = in_flight.len(),
            budget_ms = (tier_deadline - Instant::now()).as_millis(),
            "tier activated"
        );

        let deadline = sleep_until(tier_deadline);
        tokio::pin!(deadline);

        let signal = loop {
            tokio::select! {
                biased;
                Some(run) = in_flight.next() => {
                    let signal = match run.records.last() {
                        Some(last) => aggregator.observe(last),
                        None => aggregator.mark_non_responsive(1),
                    };
                    records.extend(run.records);
                    if signal.is_terminal() {
                        break signal;
                    }
                    if let Some(backend) = queue.pop_front() {
                        progress.record_attempt(&backend.id);
                        in_flight.push(self.call_backend(cancel.clone(), tier_index, backend, request, tier_deadline));
                    }
                }
                () = &mut deadline => {
                    debug!(
                        tier = tier_index,
                        outstanding = aggregator.outstanding(),
                        "tier budget spent"
                    );
                    break aggregator.expire();
                }
            }
        };

        match signal {
            AggregationSignal::QuorumReached(value) => {
                debug!(
                    tier = tier_index,
                    cancelled = in_flight.len() + queue.len(),
                    "quorum reached, cancelling outstanding calls"
                );
                TierOutcome::Reached(value)
            }
            AggregationSignal::ImpossibleToReach | AggregationSignal::Pending => {
                warn!(
                    method = %request.method,
                    tier = tier_index,
                    received = aggregator.received(),
                    buckets = aggregator.buckets().len(),
                    "tier exhausted without quorum"
                );
                TierOutcome::Exhausted
            }
        }
    }

    /// Calls one backend until it answers, fails permanently, or runs out of retries.
    async fn call_backend(
        &self,
        ctx: CancellationToken,
        tier_index: usize,
        backend: Arc<BackendDescriptor>,
        request: &DispatchRequest,
        tier_deadline: Instant,
    ) -> BackendRun {
        let mut state = RetryState::default();
        let mut records = Vec::new();

        loop {
            let attempt = state.begin_attempt();
            let deadline = (Instant::now() + backend.stall_timeout).min(tier_deadline);

            let outcome = tokio::select! {
                biased;
                () = ctx.cancelled() => Err(BackendError::Cancelled),
                result = timeout_at(
                    deadline,
                    self.client.call(ctx.clone(), &backend.id, &request.method, &request.params, deadline),
                ) => result.unwrap_or(Err(BackendError::TransportTimeout)),
            };
            let received_at = Instant::now();

            let error = match outcome {
                Ok(value) => {
                    metrics::record_backend_call(&backend.id, "success");
                    self.health.record_success(&backend.id);
                    records.push(
                        ResponseRecord::success(Arc::clone(&backend.id), value, received_at)
                            .with_attempt(attempt)
                            .with_tier(tier_index),
                    );
                    return BackendRun { records };
                }
                // Abandoned: the tier already resolved, nothing to report
                Err(BackendError::Cancelled) if ctx.is_cancelled() => return BackendRun { records },
                Err(error) => error,
            };

            metrics::record_backend_call(&backend.id, error.as_str());
            if error.should_penalize_backend() {
                self.health.record_failure(&backend.id);
            }
            debug!(
                backend = %backend.id,
                tier = tier_index,
                attempt = attempt,
                error = %error,
                "backend attempt failed"
            );

            let decision =
                self.retry.should_retry_before(&backend.id, attempt, &error, received_at, tier_deadline);
            records.push(
                ResponseRecord::failure(Arc::clone(&backend.id), error, received_at)
                    .with_attempt(attempt)
                    .with_tier(tier_index),
            );

            match decision {
                RetryDecision::Retry { after } => {
                    state.schedule(received_at + after);
                    metrics::record_backend_retry(&backend.id);
                    tokio::select! {
                        biased;
                        () = ctx.cancelled() => return BackendRun { records },
                        () = sleep(after) => {}
                    }
                }
                RetryDecision::GiveUp(reason) => {
                    debug!(
                        backend = %backend.id,
                        tier = tier_index,
                        attempts = state.attempts(),
                        reason = reason.as_str(),
                        "backend exhausted for this request"
                    );
                    return BackendRun { records };
                }
            }
        }
    }
}

fn transition(state: &mut DispatchState, next: DispatchState, request: &DispatchRequest) {
    debug!(method = %request.method, from = %state, to = %next, "dispatch transition");
    *state = next;
}
