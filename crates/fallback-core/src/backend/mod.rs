//! Backend descriptors, the transport boundary and health tracking.
//!
//! # Overview
//!
//! - **Registry**: validated descriptors grouped into priority tiers, swapped atomically on
//!   reconfiguration
//! - **Client**: the [`BackendClient`] trait implemented by the transport layer
//! - **Errors**: the per-backend error taxonomy and the caller-visible error type
//! - **Health**: consecutive-failure tracking consulted when ordering a tier

pub mod client;
pub mod errors;
pub mod health;
pub mod registry;

pub use client::BackendClient;
pub use errors::{BackendError, ErrorClass, FallbackError, RegistryError};
pub use health::{HealthConfig, HealthSnapshot, HealthTracker};
pub use registry::{BackendDescriptor, Registry, RegistryHandle, Tier};
