//! # Quorum Aggregation Overview
//!
//! A tier's responses are voted on by value, not by backend identity.
//!
//! ## Algorithm Steps
//!
//! 1. **Bucketing**: each successful response is hashed with the configured comparator and
//!    joins the bucket holding an equivalent value
//! 2. **Quorum Check**: the first bucket with `count >= quorum` resolves the tier
//! 3. **Reachability Check**: after every record (value or error) the aggregator checks whether
//!    any bucket, including one not yet formed, can still reach the quorum with the backends
//!    that have not answered; if none can, the tier is abandoned immediately
//!
//! ## Comparators
//!
//! - [`CanonicalJsonComparator`]: structural equality, the default
//! - [`FieldMaskComparator`]: structural equality after dropping per-method field paths
//!
//! # Module Organization
//!
//! - [`comparator`]: the [`ResponseComparator`] trait and its implementations
//! - [`aggregator`]: streaming [`QuorumAggregator`] and batch evaluation

pub mod aggregator;
pub mod comparator;


pub use aggregator::{AggregationSignal, QuorumAggregator, QuorumBucket};
pub use comparator::{CanonicalJsonComparator, FieldMaskComparator, ResponseComparator};
