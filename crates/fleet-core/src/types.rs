//! Core type definitions for gpufleet

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle status of a GPU instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Instance is being created or its runtime deployed
    Provisioning,
    /// Instance is up and may serve inference
    Running,
    /// Instance is stopped but can be started again
    Stopped,
    /// Terminal state; the record is kept but never reused
    Terminated,
    /// A lifecycle action failed; see `last_error`
    Error,
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Provisioning => "provisioning",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Terminated => "terminated",
            InstanceStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Runtime health of an instance, as observed by health probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceHealth {
    /// Runtime deployed, warmup checks in progress
    Warming,
    /// Runtime answered its health probe and accepts inference
    Ready,
    /// Running but without recent activity
    Idle,
    /// Health probe failed
    Error,
    /// Instance terminated
    Terminated,
    /// No probe has run yet
    Unknown,
}

impl fmt::Display for InstanceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceHealth::Warming => "warming",
            InstanceHealth::Ready => "ready",
            InstanceHealth::Idle => "idle",
            InstanceHealth::Error => "error",
            InstanceHealth::Terminated => "terminated",
            InstanceHealth::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Wire contract exposed by a deployed inference runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeContract {
    /// Path probed by health checks
    pub health_path: String,

    /// Path accepting inference requests
    pub inference_path: String,

    /// Path used to preload model weights
    pub preload_path: String,

    /// Advertised shape of structured runtime errors
    #[serde(default)]
    pub error_format: serde_json::Value,
}

/// Status of a runtime phase (preload, warmup)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Completed,
    Failed,
}

/// Model preload bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadState {
    pub status: PhaseStatus,
    pub hook: String,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// One warmup health probe outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupCheck {
    pub at: DateTime<Utc>,
    pub ok: bool,
    pub latency_ms: u64,
}

/// Warmup loop bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmupState {
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub checks: Vec<WarmupCheck>,
}

/// Runtime deployed onto an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    /// Runtime template this deployment came from (vllm, tgi, ...)
    pub template_id: String,

    /// Container image
    pub image: String,

    /// Model served by the runtime
    pub model: String,

    /// Wire contract for health/inference/preload calls
    pub contract: RuntimeContract,

    pub preload: PreloadState,
    pub warmup: WarmupState,
}

/// A provisioned GPU instance.
///
/// Created by launch, mutated by lifecycle actions and inference activity,
/// never deleted - terminal state is `terminated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub provider_id: String,
    pub provider_name: String,
    pub region: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub status: InstanceStatus,
    pub health: InstanceHealth,
    pub endpoint: String,
    pub runtime: Option<RuntimeState>,
    pub project_id: String,
    pub inference_profile_id: Option<String>,
    pub budget_policy_id: Option<String>,
    /// Last transport failure observed on a lifecycle action
    pub last_error: Option<String>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Check whether the instance can accept inference traffic
    pub fn is_serving(&self) -> bool {
        self.status == InstanceStatus::Running && self.health == InstanceHealth::Ready
    }

    /// Check whether the instance has reached its terminal state
    pub fn is_terminated(&self) -> bool {
        self.status == InstanceStatus::Terminated
    }

    /// Record inference activity on the instance
    pub fn touch_activity(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = Some(now);
        self.updated_at = now;
    }
}

/// Parameters for creating a new instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub provider_id: String,
    pub region: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub name: String,
    pub project_id: String,
}

/// Payload of one inference request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferencePayload {
    pub prompt: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Successful inference result returned by a runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutcome {
    pub model: String,
    pub output: String,
    pub tokens_estimate: u64,
    pub latency_ms: u64,
    pub endpoint: String,
}

/// Validation status of a provider account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountStatus {
    /// Credentials present and all required permission scopes granted
    Valid,
    /// Credentials present but some required scopes are missing
    PermissionsMissing,
    /// No credentials stored for the provider
    NotConfigured,
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountStatus::Valid => "valid",
            AccountStatus::PermissionsMissing => "permissions-missing",
            AccountStatus::NotConfigured => "not-configured",
        };
        write!(f, "{}", s)
    }
}

/// Permission coverage of a provider account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub required: Vec<String>,
    pub granted: Vec<String>,
    pub missing: Vec<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Token hygiene policy attached to an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPolicy {
    pub mode: String,
    pub max_ttl_minutes: u32,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            mode: "prefer-short-lived".to_string(),
            max_ttl_minutes: 60,
        }
    }
}

/// Envelope-encrypted credential blob.
///
/// The payload is encrypted with a per-account data key, which is itself
/// encrypted with the master key. Plaintext never appears in this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialEnvelope {
    /// Envelope format version, for future master-key rotation
    pub version: u32,

    /// KMS backend that wrapped the data key
    pub kms_provider: String,

    /// Identifier of the master key that wrapped the data key
    pub key_id: String,

    /// Base64 of nonce || AES-256-GCM ciphertext of the data key
    pub wrapped_dek: String,

    /// Base64 of nonce || AES-256-GCM ciphertext of the credential map
    pub payload: String,

    pub encrypted_at: DateTime<Utc>,
}

/// Stored account for one provider.
///
/// One active account per provider: the latest `updated_at` wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub id: String,
    pub provider_id: String,
    pub status: AccountStatus,
    pub credential_ref: CredentialEnvelope,
    pub permissions: PermissionSet,
    #[serde(default)]
    pub token_policy: TokenPolicy,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Plaintext credential map, alive only inside decrypt-on-use call paths
pub type CredentialMap = HashMap<String, String>;

/// Persisted master-key material for the local KMS backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KmsState {
    pub key_id: String,
    pub master_key_b64: String,
}

/// Circuit breaker state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        write!(f, "{}", s)
    }
}

/// Circuit breaker record, keyed by instance id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_until: Option<DateTime<Utc>>,
    pub last_error_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance() -> Instance {
        let now = Utc::now();
        Instance {
            id: "gpu-1".into(),
            name: "test".into(),
            provider_id: "selfhosted".into(),
            provider_name: "Self-hosted SSH".into(),
            region: "custom".into(),
            gpu_type: "T4".into(),
            gpu_count: 1,
            status: InstanceStatus::Running,
            health: InstanceHealth::Ready,
            endpoint: "https://inference.local/selfhosted/gpu-1".into(),
            runtime: None,
            project_id: "default".into(),
            inference_profile_id: None,
            budget_policy_id: None,
            last_error: None,
            last_activity_at: None,
            last_health_check_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_instance_serving() {
        let mut instance = sample_instance();
        assert!(instance.is_serving());

        instance.health = InstanceHealth::Warming;
        assert!(!instance.is_serving());

        instance.health = InstanceHealth::Ready;
        instance.status = InstanceStatus::Stopped;
        assert!(!instance.is_serving());
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&InstanceStatus::Provisioning).unwrap(),
            "\"provisioning\""
        );
        assert_eq!(
            serde_json::to_string(&AccountStatus::PermissionsMissing).unwrap(),
            "\"permissions-missing\""
        );
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"half-open\""
        );
    }

    #[test]
    fn test_touch_activity_updates_timestamps() {
        let mut instance = sample_instance();
        let later = Utc::now();
        instance.touch_activity(later);
        assert_eq!(instance.last_activity_at, Some(later));
        assert_eq!(instance.updated_at, later);
    }

    #[test]
    fn test_circuit_breaker_default_closed() {
        let state = CircuitBreakerState::default();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 0);
        assert!(state.open_until.is_none());
    }
}
