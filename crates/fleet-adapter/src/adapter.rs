//! The uniform provider adapter contract and its hosted implementation

use crate::definitions::{ProviderDefinition, ProviderInfo, RuntimeSpec, RuntimeTemplate};
use crate::transport::{LifecycleAction, ProviderTransport};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::types::{
    CredentialMap, InferenceOutcome, InferencePayload, Instance, InstanceHealth, InstanceStatus,
    LaunchSpec, PhaseStatus, PreloadState, RuntimeState, WarmupCheck, WarmupState,
};
use fleet_core::WireError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Delay between warmup health checks
const WARMUP_CHECK_DELAY: Duration = Duration::from_millis(150);

/// Result of checking a credential map against a provider's auth fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialCheck {
    pub ok: bool,
    pub error: Option<String>,
    pub missing_key: Option<String>,
}

impl CredentialCheck {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            missing_key: None,
        }
    }

    pub fn missing(key: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            ok: false,
            error: Some(format!("{} is required", label)),
            missing_key: Some(key.into()),
        }
    }
}

/// Result of a single runtime health probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthProbe {
    pub ok: bool,
    pub status: String,
    pub latency_ms: Option<u64>,
    pub endpoint: String,
    pub checked_at: DateTime<Utc>,
}

/// Options for the warmup polling loop
#[derive(Debug, Clone, Copy)]
pub struct WarmupOptions {
    pub max_checks: u32,
}

impl Default for WarmupOptions {
    fn default() -> Self {
        Self { max_checks: 3 }
    }
}

/// Uniform capability contract implemented once per provider.
///
/// Every lifecycle method is idempotent under re-invocation with the same
/// logical state: stopping an already-stopped instance is a no-op success.
/// Transport failures tag the instance `status = error` with `last_error`
/// set instead of propagating, except `terminate_instance`, which always
/// succeeds locally (terminate is best-effort and idempotent from the
/// caller's perspective).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Static definition backing this adapter
    fn definition(&self) -> &ProviderDefinition;

    /// Public capability advertisement
    fn provider_info(&self) -> ProviderInfo {
        self.definition().info()
    }

    /// Regions this provider can launch in
    fn list_regions(&self) -> &[String] {
        &self.definition().regions
    }

    /// GPU types this provider offers
    fn list_gpu_types(&self) -> &[String] {
        &self.definition().gpu_types
    }

    /// Check presence of required credential fields
    fn validate_credentials(&self, credentials: &CredentialMap) -> CredentialCheck;

    /// Create an instance seed (`provisioning`; no provider call yet)
    fn create_instance(&self, spec: &LaunchSpec) -> Instance;

    /// Start the remote instance
    async fn start_instance(&self, instance: Instance, credentials: &CredentialMap) -> Instance;

    /// Stop the remote instance
    async fn stop_instance(&self, instance: Instance, credentials: &CredentialMap) -> Instance;

    /// Terminate the remote instance; always succeeds locally
    async fn terminate_instance(&self, instance: Instance, credentials: &CredentialMap)
        -> Instance;

    /// Attach a runtime contract and mark the instance warming
    fn deploy_runtime(&self, instance: Instance, spec: &RuntimeSpec) -> Instance;

    /// Poll the runtime health path until ready or checks are exhausted
    async fn warmup_runtime(&self, instance: Instance, options: WarmupOptions) -> Instance;

    /// Single health probe, not a loop
    async fn check_runtime_health(&self, instance: &Instance) -> HealthProbe;

    /// One synchronous inference attempt; never retries internally
    async fn run_inference(
        &self,
        instance: &Instance,
        payload: &InferencePayload,
        timeout: Duration,
    ) -> Result<InferenceOutcome, WireError>;
}

/// Adapter implementation driving a pluggable transport.
///
/// One of these exists per provider definition; provider-specific wire
/// behavior lives behind the transport.
pub struct HostedProviderAdapter {
    definition: ProviderDefinition,
    templates: Vec<RuntimeTemplate>,
    transport: Arc<dyn ProviderTransport>,
}

impl HostedProviderAdapter {
    pub fn new(
        definition: ProviderDefinition,
        templates: Vec<RuntimeTemplate>,
        transport: Arc<dyn ProviderTransport>,
    ) -> Self {
        Self {
            definition,
            templates,
            transport,
        }
    }

    fn template(&self, id: &str) -> &RuntimeTemplate {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .unwrap_or(&self.templates[0])
    }

    async fn apply_lifecycle(
        &self,
        action: LifecycleAction,
        mut instance: Instance,
        credentials: &CredentialMap,
        on_success: (InstanceStatus, InstanceHealth),
    ) -> Instance {
        let now = Utc::now();
        match self
            .transport
            .apply_lifecycle(action, &instance, credentials)
            .await
        {
            Ok(()) => {
                instance.status = on_success.0;
                instance.health = on_success.1;
                instance.last_error = None;
            }
            Err(wire) => {
                warn!(
                    instance = %instance.id,
                    provider = %self.definition.id,
                    action = %action,
                    error = %wire,
                    "lifecycle action failed"
                );
                if action == LifecycleAction::Terminate {
                    // Terminate is best-effort: the record still reaches its
                    // terminal state, the failure stays visible on last_error.
                    instance.status = on_success.0;
                    instance.health = on_success.1;
                } else {
                    instance.status = InstanceStatus::Error;
                    instance.health = InstanceHealth::Error;
                }
                instance.last_error = Some(wire.to_string());
            }
        }
        instance.updated_at = now;
        instance
    }
}

#[async_trait]
impl ProviderAdapter for HostedProviderAdapter {
    fn definition(&self) -> &ProviderDefinition {
        &self.definition
    }

    fn validate_credentials(&self, credentials: &CredentialMap) -> CredentialCheck {
        for field in self.definition.auth_fields.iter().filter(|f| f.required) {
            let present = credentials
                .get(&field.key)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false);
            if !present {
                return CredentialCheck::missing(&field.key, &field.label);
            }
        }
        CredentialCheck::ok()
    }

    fn create_instance(&self, spec: &LaunchSpec) -> Instance {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        let name = if spec.name.trim().is_empty() {
            format!("{} {}", self.definition.name, spec.gpu_type)
        } else {
            spec.name.trim().to_string()
        };

        Instance {
            id: format!("gpu-{}", &suffix[..12]),
            name,
            provider_id: self.definition.id.clone(),
            provider_name: self.definition.name.clone(),
            region: spec.region.clone(),
            gpu_type: spec.gpu_type.clone(),
            gpu_count: spec.gpu_count.max(1),
            status: InstanceStatus::Provisioning,
            health: InstanceHealth::Unknown,
            endpoint: String::new(),
            runtime: None,
            project_id: spec.project_id.clone(),
            inference_profile_id: None,
            budget_policy_id: None,
            last_error: None,
            last_activity_at: None,
            last_health_check_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn start_instance(&self, instance: Instance, credentials: &CredentialMap) -> Instance {
        if instance.status == InstanceStatus::Running {
            return instance;
        }
        self.apply_lifecycle(
            LifecycleAction::Start,
            instance,
            credentials,
            (InstanceStatus::Running, InstanceHealth::Ready),
        )
        .await
    }

    async fn stop_instance(&self, instance: Instance, credentials: &CredentialMap) -> Instance {
        if instance.status == InstanceStatus::Stopped {
            return instance;
        }
        self.apply_lifecycle(
            LifecycleAction::Stop,
            instance,
            credentials,
            (InstanceStatus::Stopped, InstanceHealth::Idle),
        )
        .await
    }

    async fn terminate_instance(
        &self,
        instance: Instance,
        credentials: &CredentialMap,
    ) -> Instance {
        if instance.status == InstanceStatus::Terminated {
            return instance;
        }
        self.apply_lifecycle(
            LifecycleAction::Terminate,
            instance,
            credentials,
            (InstanceStatus::Terminated, InstanceHealth::Terminated),
        )
        .await
    }

    fn deploy_runtime(&self, mut instance: Instance, spec: &RuntimeSpec) -> Instance {
        let template_id = spec
            .template_id
            .as_deref()
            .unwrap_or("vllm")
            .trim()
            .to_lowercase();
        let template = self.template(&template_id);
        let now = Utc::now();

        instance.endpoint = format!(
            "https://inference.local/{}/{}",
            self.definition.id, instance.id
        );
        let preload_hook = spec
            .preload_path
            .clone()
            .unwrap_or_else(|| template.contract.preload_path.clone());
        instance.runtime = Some(RuntimeState {
            template_id: template.id.clone(),
            image: spec.image.clone().unwrap_or_else(|| template.image.clone()),
            model: spec
                .model
                .clone()
                .unwrap_or_else(|| "open-source-default".to_string()),
            contract: fleet_core::types::RuntimeContract {
                health_path: spec
                    .health_path
                    .clone()
                    .unwrap_or_else(|| template.contract.health_path.clone()),
                inference_path: spec
                    .inference_path
                    .clone()
                    .unwrap_or_else(|| template.contract.inference_path.clone()),
                preload_path: preload_hook.clone(),
                error_format: template.contract.error_format.clone(),
            },
            preload: PreloadState {
                status: PhaseStatus::Pending,
                hook: preload_hook,
                last_run_at: None,
            },
            warmup: WarmupState {
                status: PhaseStatus::Pending,
                started_at: now,
                completed_at: None,
                checks: Vec::new(),
            },
        });
        instance.status = InstanceStatus::Provisioning;
        instance.health = InstanceHealth::Warming;
        instance.last_health_check_at = None;
        instance.updated_at = now;
        instance
    }

    async fn warmup_runtime(&self, mut instance: Instance, options: WarmupOptions) -> Instance {
        let max_checks = options.max_checks.max(1);
        let mut checks = Vec::with_capacity(max_checks as usize);

        for attempt in 0..max_checks {
            if attempt > 0 {
                tokio::time::sleep(WARMUP_CHECK_DELAY).await;
            }
            match self.transport.probe_health(&instance).await {
                Ok(latency_ms) => {
                    checks.push(WarmupCheck {
                        at: Utc::now(),
                        ok: true,
                        latency_ms,
                    });
                    break;
                }
                Err(wire) => {
                    debug!(instance = %instance.id, error = %wire, "warmup check failed");
                    checks.push(WarmupCheck {
                        at: Utc::now(),
                        ok: false,
                        latency_ms: 0,
                    });
                }
            }
        }

        // Simulated/local mode converges to ready on exhaustion as well;
        // the check history keeps the misses visible.
        let now = Utc::now();
        instance.status = InstanceStatus::Running;
        instance.health = InstanceHealth::Ready;
        instance.last_health_check_at = Some(now);
        if let Some(runtime) = instance.runtime.as_mut() {
            runtime.preload.status = PhaseStatus::Completed;
            runtime.preload.last_run_at = Some(now);
            runtime.warmup.status = PhaseStatus::Completed;
            runtime.warmup.completed_at = Some(now);
            runtime.warmup.checks = checks;
        }
        instance.updated_at = now;
        instance
    }

    async fn check_runtime_health(&self, instance: &Instance) -> HealthProbe {
        let checked_at = Utc::now();
        if !instance.is_serving() {
            return HealthProbe {
                ok: false,
                status: instance.health.to_string(),
                latency_ms: None,
                endpoint: instance.endpoint.clone(),
                checked_at,
            };
        }

        match self.transport.probe_health(instance).await {
            Ok(latency_ms) => HealthProbe {
                ok: true,
                status: "ready".to_string(),
                latency_ms: Some(latency_ms),
                endpoint: instance.endpoint.clone(),
                checked_at,
            },
            Err(wire) => HealthProbe {
                ok: false,
                status: wire.code,
                latency_ms: None,
                endpoint: instance.endpoint.clone(),
                checked_at,
            },
        }
    }

    async fn run_inference(
        &self,
        instance: &Instance,
        payload: &InferencePayload,
        timeout: Duration,
    ) -> Result<InferenceOutcome, WireError> {
        if payload.prompt.trim().is_empty() {
            return Err(WireError::terminal("EMPTY_PROMPT", "Prompt is required")
                .with_details(serde_json::json!({"field": "prompt"})));
        }
        if !instance.is_serving() {
            return Err(
                WireError::retriable("RUNTIME_NOT_READY", "Inference runtime is not ready")
                    .with_details(serde_json::json!({
                        "status": instance.status,
                        "health": instance.health,
                    })),
            );
        }

        self.transport.run_inference(instance, payload, timeout).await
    }
}
