//! # fleet-adapter
//!
//! Provider adapters for gpufleet: one implementation of the uniform
//! lifecycle/inference capability contract per compute provider.
//!
//! This crate provides:
//! - Static provider definitions (auth fields, permission scopes, regions,
//!   GPU types) for hyperscalers, GPU marketplaces, and self-hosted hosts
//! - Runtime templates (vLLM, TGI, Ollama-compatible, custom) with their
//!   health/inference/preload contracts
//! - The `ProviderAdapter` trait and the hosted implementation that drives a
//!   pluggable `ProviderTransport`
//! - The `AdapterRegistry`, resolved once at startup, mapping provider ids
//!   to adapter instances
//!
//! Adapters never retry internally; retries, fallback, and circuit breaking
//! belong to the reliability engine. Failure paths return structured
//! `WireError`s so the engine can make retry decisions without
//! provider-specific knowledge.

pub mod adapter;
pub mod definitions;
pub mod registry;
pub mod transport;

pub use adapter::{
    CredentialCheck, HealthProbe, HostedProviderAdapter, ProviderAdapter, WarmupOptions,
};
pub use definitions::{
    builtin_definitions, builtin_runtime_templates, AuthField, AuthFieldKind, ProviderDefinition,
    ProviderInfo, RuntimeSpec, RuntimeTemplate,
};
pub use registry::AdapterRegistry;
pub use transport::{LifecycleAction, ProviderTransport, SimulatedTransport};
