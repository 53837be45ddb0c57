//! Mock infrastructure for testing the fallback coordinator.
//!
//! ## Components
//!
//! - `MockBackend`: scripted in-process `BackendClient` with call counters
//! - Test helpers for building descriptors, retry policies and providers
//!
//! ## Usage
//!
//! ```ignore
//! use tests::mock_infrastructure::{descriptor, provider_with, MockBackend};
//!
//! let mock = Arc::new(MockBackend::new());
//! mock.answer_after("a", 10, json!("0x1"));
//! let provider = provider_with(&mock, vec![descriptor("a", 0, 1, 500)], |b| b);
//! ```

pub mod test_helpers;

pub use mock_backend::MockBackend;
pub use test_helpers::*;
