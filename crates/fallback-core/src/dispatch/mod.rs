//! Tiered dispatch and per-backend retry.
//!
//! - [`dispatcher`]: the tier state machine, concurrent fan-out and cancellation
//! - [`retry`]: transient-error retry decisions with capped exponential backoff

pub mod dispatcher;
pub mod retry;

pub use dispatcher::{DispatchProgress, DispatchRequest, DispatchState, Resolution, TieredDispatcher};
pub use retry::{GiveUpReason, RetryConfig, RetryController, RetryDecision, RetryState};
