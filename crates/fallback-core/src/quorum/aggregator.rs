//! Streaming quorum aggregation for one tier.
//!
//! Responses are bucketed by comparator equality as they arrive. The aggregator emits
//! [`AggregationSignal::QuorumReached`] the moment a bucket reaches the quorum and
//! [`AggregationSignal::ImpossibleToReach`] the moment no bucket (including one formed
//! from responses not yet received) can still get there:
//!
//! ```text
//! remaining = tier_backend_count - received - non_responsive
//! impossible  <=>  max(bucket.count) + remaining < quorum
//! ```
//!
//! Both conditions depend only on the multiset of received records, so the verdict is
//! independent of arrival order. [`QuorumAggregator::evaluate`] applies the same rules
//! to a complete record set in one pass.

use super::comparator::ResponseComparator;
use crate::types::ResponseRecord;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tokio::time::Instant;
use tracing::trace;

/// Outcome of feeding a record to the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationSignal {
    /// Quorum is still reachable but not yet reached.
    Pending,
    /// A bucket reached the quorum; carries its value.
    QuorumReached(Arc<Value>),
    /// No bucket can reach the quorum with the backends still outstanding.
    ImpossibleToReach,
}

impl AggregationSignal {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Successful records that compare equal.
#[derive(Debug, Clone)]
pub struct QuorumBucket {
    key: u64,
    value: Arc<Value>,
    backends: Vec<Arc<str>>,
    /// Earliest arrival among members.
    first_received_at: Instant,
    /// Backend whose value represents the bucket (earliest arrival, then smallest id).
    representative: Arc<str>,
}

impl QuorumBucket {
    fn new(key: u64, record: &ResponseRecord, value: Arc<Value>) -> Self {
        Self {
            key,
            value,
            backends: vec![Arc::clone(&record.backend_id)],
            first_received_at: record.received_at,
            representative: Arc::clone(&record.backend_id),
        }
    }

    fn add(&mut self, record: &ResponseRecord, value: &Arc<Value>) {
        self.backends.push(Arc::clone(&record.backend_id));
        if (record.received_at, &*record.backend_id) <
            (self.first_received_at, &*self.representative)
        {
            self.first_received_at = record.received_at;
            self.representative = Arc::clone(&record.backend_id);
            self.value = Arc::clone(value);
        }
    }

    /// Number of backends that returned this value.
    #[must_use]
    pub fn count(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn value(&self) -> &Arc<Value> {
        &self.value
    }

    #[must_use]
    pub fn backends(&self) -> &[Arc<str>] {
        &self.backends
    }

    #[must_use]
    pub fn first_received_at(&self) -> Instant {
        self.first_received_at
    }

    /// Ordering key for choosing between several winning buckets.
    fn precedence(&self) -> (Instant, &str) {
        let smallest = self.backends.iter().map(|b| &**b).min().unwrap_or_default();
        (self.first_received_at, smallest)
    }
}

/// Bucket set with collision-safe lookup.
struct Buckets {
    buckets: Vec<QuorumBucket>,
    by_key: HashMap<u64, Vec<usize>>,
}

impl Buckets {
    fn new() -> Self {
        Self { buckets: Vec::new(), by_key: HashMap::new() }
    }

    /// Adds a successful record and returns the index of its bucket.
    fn insert(
        &mut self,
        comparator: &dyn ResponseComparator,
        method: &str,
        record: &ResponseRecord,
        value: &Arc<Value>,
    ) -> usize {
        let key = comparator.bucket_key(method, value);
        let candidates = self.by_key.entry(key).or_default();

        if let Some(&idx) = candidates
            .iter()
            .find(|&&idx| comparator.equivalent(method, &self.buckets[idx].value, value))
        {
            self.buckets[idx].add(record, value);
            return idx;
        }

        let idx = self.buckets.len();
        self.buckets.push(QuorumBucket::new(key, record, Arc::clone(value)));
        candidates.push(idx);
        idx
    }

    fn max_count(&self) -> usize {
        self.buckets.iter().map(QuorumBucket::count).max().unwrap_or(0)
    }
}

/// Aggregation state for one tier of one in-flight request.
pub struct QuorumAggregator {
    tier_backend_count: usize,
    quorum: usize,
    method: Arc<str>,
    comparator: Arc<dyn ResponseComparator>,
    buckets: Buckets,
    received: usize,
    non_responsive: usize,
    settled: Option<AggregationSignal>,
}

impl QuorumAggregator {
    #[must_use]
    pub fn new(
        tier_backend_count: usize,
        quorum: usize,
        method: Arc<str>,
        comparator: Arc<dyn ResponseComparator>,
    ) -> Self {
        Self {
            tier_backend_count,
            quorum,
            method,
            comparator,
            buckets: Buckets::new(),
            received: 0,
            non_responsive: 0,
            settled: None,
        }
    }

    /// Feeds one backend's final outcome to the aggregator.
    ///
    /// Each backend must be observed at most once per tier. After a terminal signal the
    /// aggregator is settled and returns that signal for every later call.
    pub fn observe(&mut self, record: &ResponseRecord) -> AggregationSignal {
        if let Some(settled) = &self.settled {
            return settled.clone();
        }
        self.received += 1;

        if let Ok(value) = &record.outcome {
            let idx = self.buckets.insert(self.comparator.as_ref(), &self.method, record, value);
            let bucket = &self.buckets.buckets[idx];
            trace!(
                backend = %record.backend_id,
                bucket = bucket.key,
                count = bucket.count(),
                quorum = self.quorum,
                "response bucketed"
            );
            if bucket.count() >= self.quorum {
                let value = Arc::clone(&bucket.value);
                return self.settle(AggregationSignal::QuorumReached(value));
            }
        }

        self.check()
    }

    /// Counts `n` backends as lost without a response (exhausted or past the tier deadline).
    pub fn mark_non_responsive(&mut self, n: usize) -> AggregationSignal {
        if let Some(settled) = &self.settled {
            return settled.clone();
        }
        self.non_responsive = self.non_responsive.saturating_add(n);
        self.check()
    }

    /// Treats every backend that has not answered as non-responsive.
    ///
    /// Called when the tier budget runs out; always produces a terminal signal.
    pub fn expire(&mut self) -> AggregationSignal {
        let outstanding = self.outstanding();
        self.mark_non_responsive(outstanding);
        self.settled.clone().unwrap_or(AggregationSignal::ImpossibleToReach)
    }

    /// Re-evaluates reachability without a new record.
    ///
    /// Returns [`AggregationSignal::ImpossibleToReach`] up front when the tier is too
    /// small for the quorum.
    pub fn check(&mut self) -> AggregationSignal {
        if let Some(settled) = &self.settled {
            return settled.clone();
        }
        if self.buckets.max_count() + self.outstanding() < self.quorum {
            return self.settle(AggregationSignal::ImpossibleToReach);
        }
        AggregationSignal::Pending
    }

    /// Backends that may still contribute a response.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tier_backend_count.saturating_sub(self.received + self.non_responsive)
    }

    #[must_use]
    pub fn received(&self) -> usize {
        self.received
    }

    #[must_use]
    pub fn buckets(&self) -> &[QuorumBucket] {
        &self.buckets.buckets
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled.is_some()
    }

    fn settle(&mut self, signal: AggregationSignal) -> AggregationSignal {
        self.settled = Some(signal.clone());
        signal
    }

    /// Evaluates a complete record set in one pass.
    ///
    /// The verdict and winning value do not depend on the order of `records`. When more
    /// than one bucket reaches the quorum, the bucket with the earliest-arriving member
    /// wins, then the one containing the lexicographically smallest backend id.
    #[must_use]
    pub fn evaluate(
        records: &[ResponseRecord],
        tier_backend_count: usize,
        quorum: usize,
        method: &str,
        comparator: &dyn ResponseComparator,
    ) -> AggregationSignal {
        let mut buckets = Buckets::new();
        for record in records {
            if let Ok(value) = &record.outcome {
                buckets.insert(comparator, method, record, value);
            }
        }

        let winner = buckets
            .buckets
            .iter()
            .filter(|b| b.count() >= quorum)
            .min_by(|a, b| a.precedence().cmp(&b.precedence()));
        if let Some(bucket) = winner {
            return AggregationSignal::QuorumReached(Arc::clone(&bucket.value));
        }

        let remaining = tier_backend_count.saturating_sub(records.len());
        if buckets.max_count() + remaining < quorum {
            AggregationSignal::ImpossibleToReach
        } else {
            AggregationSignal::Pending
        }
    }
}
