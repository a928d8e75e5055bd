//! # fleet-engine
//!
//! The reliability and budget engine for gpufleet inference dispatch.
//!
//! This crate provides:
//! - Per-instance queue admission with an RAII permit so errored requests
//!   never leak capacity
//! - The per-instance circuit breaker state machine
//!   (closed / open / half-open) with timed recovery
//! - Timeout + capped-exponential-backoff retries, and a single transparent
//!   fallback hop when an instance keeps failing or its circuit is open
//! - Budget guard: pre-launch cost estimation, runtime spend caps, stop
//!   windows, and the idle auto-shutdown sweep
//!
//! Engine-owned keyed state is dependency-injected through the store the
//! engine is constructed with; separate engines over separate stores never
//! interfere, so tests can run in parallel.

pub mod breaker;
pub mod budget;
pub mod engine;
pub mod queue;

pub use engine::{InferenceReport, InferenceRequest, ReliabilityEngine};
pub use queue::{AdmissionControl, QueuePermit};

pub use fleet_core::{Error, Result};
