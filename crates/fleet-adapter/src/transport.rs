//! Provider transport seam
//!
//! The transport carries the actual remote calls (REST, GraphQL, signed
//! requests, or SSH + container commands, depending on the provider). The
//! adapter layer owns lifecycle semantics and structured error shaping; the
//! transport only moves bytes. A simulated transport ships for local mode
//! and tests; failing/flaky transports are trivial to write against the
//! same trait.

use async_trait::async_trait;
use fleet_core::types::{CredentialMap, InferenceOutcome, InferencePayload, Instance};
use fleet_core::WireError;
use rand::Rng;
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;

/// Remote lifecycle actions a transport can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Stop,
    Terminate,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Terminate => "terminate",
        };
        write!(f, "{}", s)
    }
}

/// Provider-specific remote call surface.
///
/// The inference deadline is propagated into the call so the underlying
/// operation is bounded by the transport itself, not merely raced against a
/// timer by the caller.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Apply a lifecycle action to the remote instance
    async fn apply_lifecycle(
        &self,
        action: LifecycleAction,
        instance: &Instance,
        credentials: &CredentialMap,
    ) -> Result<(), WireError>;

    /// Probe the runtime health path once, returning observed latency
    async fn probe_health(&self, instance: &Instance) -> Result<u64, WireError>;

    /// Execute one inference attempt. Never retries.
    async fn run_inference(
        &self,
        instance: &Instance,
        payload: &InferencePayload,
        deadline: Duration,
    ) -> Result<InferenceOutcome, WireError>;
}

/// Local-mode transport that models provider behavior without network
/// calls. Lifecycle actions always succeed; probes and inference report
/// jittered latencies like a warm runtime would.
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport;

impl SimulatedTransport {
    fn jitter(base: u64, spread: u64) -> u64 {
        base + rand::thread_rng().gen_range(0..spread)
    }
}

#[async_trait]
impl ProviderTransport for SimulatedTransport {
    async fn apply_lifecycle(
        &self,
        _action: LifecycleAction,
        _instance: &Instance,
        _credentials: &CredentialMap,
    ) -> Result<(), WireError> {
        sleep(Duration::from_millis(2)).await;
        Ok(())
    }

    async fn probe_health(&self, instance: &Instance) -> Result<u64, WireError> {
        sleep(Duration::from_millis(1)).await;
        if instance.runtime.is_none() {
            return Err(WireError::retriable(
                "RUNTIME_NOT_DEPLOYED",
                "no runtime deployed on instance",
            ));
        }
        Ok(Self::jitter(45, 120))
    }

    async fn run_inference(
        &self,
        instance: &Instance,
        payload: &InferencePayload,
        deadline: Duration,
    ) -> Result<InferenceOutcome, WireError> {
        // Keep the simulated service time well under any sane deadline
        let service = Duration::from_millis(5);
        if deadline < service {
            sleep(deadline).await;
            return Err(WireError::retriable(
                "PROVIDER_TIMEOUT",
                "inference deadline exceeded",
            ));
        }
        sleep(service).await;

        let model = payload
            .model
            .clone()
            .or_else(|| instance.runtime.as_ref().map(|r| r.model.clone()))
            .unwrap_or_else(|| "open-source-default".to_string());
        let preview: String = payload.prompt.chars().take(220).collect();

        Ok(InferenceOutcome {
            output: format!(
                "Inference via {} ({}): {}",
                instance.provider_name, instance.gpu_type, preview
            ),
            tokens_estimate: (payload.prompt.len() as u64 / 4).max(8),
            latency_ms: Self::jitter(100, 240),
            endpoint: instance.endpoint.clone(),
            model,
        })
    }
}
