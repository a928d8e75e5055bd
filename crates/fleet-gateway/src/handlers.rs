//! HTTP handlers for the gpufleet API

use crate::server::AppState;
use crate::ApiResult;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use fleet_adapter::{RuntimeSpec, WarmupOptions};
use fleet_core::types::{
    AccountStatus, CredentialMap, InferencePayload, InstanceStatus, LaunchSpec, PermissionSet,
    ProviderAccount,
};
use fleet_core::{BudgetPolicy, Error, ReliabilityPolicy, StopWindow, WireError};
use fleet_engine::{budget, InferenceRequest};
use fleet_vault::{account_status, evaluate_permissions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

fn default_project() -> String {
    "default".to_string()
}

fn default_gpu_count() -> u32 {
    1
}

/// Credential envelope metadata safe to expose; never the payload
#[derive(Debug, Serialize)]
struct CredentialRefView {
    version: u32,
    kms_provider: String,
    key_id: String,
    encrypted_at: DateTime<Utc>,
}

/// Normalized provider account for API responses
#[derive(Debug, Serialize)]
struct AccountView {
    id: String,
    provider_id: String,
    status: AccountStatus,
    permissions: PermissionSet,
    last_validated_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    credential_ref: CredentialRefView,
}

impl From<&ProviderAccount> for AccountView {
    fn from(account: &ProviderAccount) -> Self {
        Self {
            id: account.id.clone(),
            provider_id: account.provider_id.clone(),
            status: account.status,
            permissions: account.permissions.clone(),
            last_validated_at: account.last_validated_at,
            updated_at: account.updated_at,
            credential_ref: CredentialRefView {
                version: account.credential_ref.version,
                kms_provider: account.credential_ref.kms_provider.clone(),
                key_id: account.credential_ref.key_id.clone(),
                encrypted_at: account.credential_ref.encrypted_at,
            },
        }
    }
}

// ---- provider catalog & accounts ----

pub async fn list_providers(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let providers: Vec<serde_json::Value> = state
        .registry
        .list_providers()
        .into_iter()
        .map(|info| {
            let account = state.store.account_for_provider(&info.id);
            let account_view = match &account {
                Some(acct) => json!(AccountView::from(acct)),
                None => json!({ "status": AccountStatus::NotConfigured }),
            };
            let mut value = serde_json::to_value(&info).unwrap_or_default();
            value["account"] = account_view;
            value
        })
        .collect();

    Ok(Json(json!({ "ok": true, "providers": providers })))
}

#[derive(Debug, Deserialize)]
pub struct ConfigureRequest {
    pub provider_id: String,
    pub credentials: CredentialMap,
    /// Scopes the caller's token actually carries; all required scopes are
    /// assumed granted when omitted
    pub granted_permissions: Option<Vec<String>>,
}

pub async fn configure_provider(
    State(state): State<AppState>,
    Json(request): Json<ConfigureRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let adapter = state.registry.require(&request.provider_id)?;

    let check = adapter.validate_credentials(&request.credentials);
    if !check.ok {
        return Err(Error::credential(
            check.error.unwrap_or_else(|| "invalid credentials".to_string()),
        )
        .into());
    }

    let required = adapter.definition().required_permissions.clone();
    let granted = request
        .granted_permissions
        .unwrap_or_else(|| required.clone());
    let report = evaluate_permissions(&required, &granted);
    let status = account_status(&report);

    let envelope = state.vault.wrap_credentials(&request.credentials)?;
    let now = Utc::now();
    let existing = state.store.account_for_provider(&request.provider_id);
    let account = ProviderAccount {
        id: existing
            .as_ref()
            .map(|a| a.id.clone())
            .unwrap_or_else(|| format!("acct-{}", Uuid::new_v4())),
        provider_id: request.provider_id.clone(),
        status,
        credential_ref: envelope,
        permissions: report.into_permission_set(),
        token_policy: existing
            .as_ref()
            .map(|a| a.token_policy.clone())
            .unwrap_or_default(),
        last_validated_at: Some(now),
        created_at: existing.map(|a| a.created_at).unwrap_or(now),
        updated_at: now,
    };

    state.store.upsert_account(account.clone());
    state.store.push_audit(
        "provider.configure",
        json!({ "provider_id": request.provider_id, "status": status }),
    );
    state.store.persist_best_effort();

    Ok(Json(json!({ "ok": true, "account": AccountView::from(&account) })))
}

#[derive(Debug, Deserialize)]
pub struct TestProviderRequest {
    pub provider_id: String,
    pub credentials: Option<CredentialMap>,
}

pub async fn test_provider(
    State(state): State<AppState>,
    Json(request): Json<TestProviderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let adapter = state.registry.require(&request.provider_id)?;

    let account = state.store.account_for_provider(&request.provider_id);
    let credentials = match request.credentials {
        Some(creds) => creds,
        None => {
            let account = account.as_ref().ok_or_else(|| {
                Error::credential(format!("provider {} is not configured", request.provider_id))
            })?;
            state.vault.unwrap(&account.credential_ref)?
        }
    };

    let check = adapter.validate_credentials(&credentials);
    if !check.ok {
        return Err(Error::credential(
            check.error.unwrap_or_else(|| "invalid credentials".to_string()),
        )
        .into());
    }

    let permissions = account
        .map(|a| a.permissions)
        .unwrap_or_else(|| PermissionSet {
            required: adapter.definition().required_permissions.clone(),
            granted: Vec::new(),
            missing: Vec::new(),
            verified_at: None,
        });

    Ok(Json(json!({
        "ok": true,
        "valid": true,
        "permissions": permissions,
        "probe": { "ok": true, "mode": "simulated" },
    })))
}

pub async fn runtime_templates(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!({
        "ok": true,
        "templates": state.registry.runtime_templates(),
    })))
}

// ---- instance lifecycle ----

#[derive(Debug, Default, Deserialize)]
pub struct BudgetPolicyPatch {
    pub hard_spend_cap_usd: Option<f64>,
    pub auto_stop_idle_minutes: Option<u64>,
    pub alert_thresholds: Option<Vec<f64>>,
    pub stop_windows: Option<Vec<StopWindow>>,
}

impl BudgetPolicyPatch {
    fn apply(&self, policy: &mut BudgetPolicy) -> Result<(), Error> {
        if let Some(cap) = self.hard_spend_cap_usd {
            if !cap.is_finite() || cap < 0.0 {
                return Err(Error::validation("hard_spend_cap_usd must be non-negative"));
            }
            policy.hard_spend_cap_usd = cap;
        }
        if let Some(idle) = self.auto_stop_idle_minutes {
            policy.auto_stop_idle_minutes = idle;
        }
        if let Some(thresholds) = &self.alert_thresholds {
            policy.alert_thresholds = thresholds.clone();
        }
        if let Some(windows) = &self.stop_windows {
            policy.stop_windows = windows.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    pub provider_id: String,
    pub region: String,
    pub gpu_type: String,
    #[serde(default = "default_gpu_count")]
    pub gpu_count: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub runtime: Option<RuntimeSpec>,
    #[serde(default = "default_project")]
    pub project_id: String,
    #[serde(default)]
    pub budget_policy: Option<BudgetPolicyPatch>,
    #[serde(default)]
    pub skip_warmup: bool,
}

pub async fn launch_instance(
    State(state): State<AppState>,
    Json(request): Json<LaunchRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let adapter = state
        .registry
        .get(&request.provider_id)
        .ok_or_else(|| Error::validation(format!("unknown provider: {}", request.provider_id)))?;

    if !adapter.list_regions().contains(&request.region) {
        return Err(Error::validation(format!(
            "region {} is not offered by {}",
            request.region, request.provider_id
        ))
        .into());
    }
    if !adapter.list_gpu_types().contains(&request.gpu_type) {
        return Err(Error::validation(format!(
            "GPU type {} is not offered by {}",
            request.gpu_type, request.provider_id
        ))
        .into());
    }
    if request.gpu_count == 0 {
        return Err(Error::validation("gpu_count must be at least 1").into());
    }

    let mut policy = state.store.ensure_budget_policy(&request.project_id);
    if let Some(patch) = &request.budget_policy {
        patch.apply(&mut policy)?;
        state.store.upsert_budget_policy(policy.clone());
    }

    // Budget and schedule gates run before any provider call; at launch
    // time both refusals are client errors, not backpressure.
    let estimate = budget::check_launch_budget(&policy, &request.gpu_type, request.gpu_count)
        .map_err(crate::ApiError::bad_request)?;
    budget::check_stop_window(&policy, Utc::now()).map_err(crate::ApiError::bad_request)?;

    let account = state
        .store
        .account_for_provider(&request.provider_id)
        .ok_or_else(|| {
            Error::credential(format!("provider {} is not configured", request.provider_id))
        })?;
    let credentials = state.vault.unwrap(&account.credential_ref)?;

    state.store.observability().record_provisioning_attempt();

    let mut seed = adapter.create_instance(&LaunchSpec {
        provider_id: request.provider_id.clone(),
        region: request.region.clone(),
        gpu_type: request.gpu_type.clone(),
        gpu_count: request.gpu_count,
        name: request.name.clone(),
        project_id: request.project_id.clone(),
    });
    seed.budget_policy_id = Some(policy.id.clone());

    let started = adapter.start_instance(seed, &credentials).await;
    if started.status == InstanceStatus::Error {
        state.store.observability().record_provisioning_failure();
        let reason = started.last_error.clone().unwrap_or_default();
        state.store.upsert_instance(started.clone());
        state.store.push_audit(
            "instance.launch_failed",
            json!({ "instance_id": started.id, "error": reason }),
        );
        state.store.persist_best_effort();
        return Err(Error::Transport(WireError::terminal("PROVIDER_START_FAILED", reason)).into());
    }

    let deployed = adapter.deploy_runtime(started, &request.runtime.unwrap_or_default());
    let instance = if request.skip_warmup {
        deployed
    } else {
        let warmed = adapter
            .warmup_runtime(
                deployed,
                WarmupOptions {
                    max_checks: state.config.warmup_max_checks,
                },
            )
            .await;
        let time_to_ready = (Utc::now() - warmed.created_at).num_milliseconds().max(0) as u64;
        state
            .store
            .observability()
            .record_provisioning_success(time_to_ready);
        warmed
    };

    state.store.upsert_instance(instance.clone());
    state.store.push_audit(
        "instance.launch",
        json!({
            "instance_id": instance.id,
            "provider_id": instance.provider_id,
            "gpu_type": instance.gpu_type,
            "project_id": instance.project_id,
        }),
    );
    state.store.persist_best_effort();

    Ok(Json(json!({
        "ok": true,
        "instance": instance,
        "estimated_hourly_cost_usd": estimate,
        "budget_policy_id": policy.id,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub instance_id: String,
    pub action: String,
}

pub async fn instance_action(
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let instance = state
        .store
        .instance(&request.instance_id)
        .ok_or_else(|| Error::not_found(format!("unknown instance: {}", request.instance_id)))?;
    let adapter = state.registry.require(&instance.provider_id)?;

    let credentials = match state.store.account_for_provider(&instance.provider_id) {
        Some(account) => state.vault.unwrap(&account.credential_ref)?,
        // Terminate stays available without credentials; it succeeds
        // locally regardless of the provider side.
        None if request.action == "terminate" => CredentialMap::new(),
        None => {
            return Err(Error::credential(format!(
                "provider {} is not configured",
                instance.provider_id
            ))
            .into())
        }
    };

    let updated = match request.action.as_str() {
        "start" => {
            if instance.is_terminated() {
                return Err(Error::validation("cannot start a terminated instance").into());
            }
            let policy = state.store.policy_for_instance(&instance);
            budget::check_stop_window(&policy, Utc::now())
                .map_err(crate::ApiError::bad_request)?;
            adapter.start_instance(instance, &credentials).await
        }
        "stop" => {
            if instance.is_terminated() {
                return Err(Error::validation("cannot stop a terminated instance").into());
            }
            adapter.stop_instance(instance, &credentials).await
        }
        "terminate" => adapter.terminate_instance(instance, &credentials).await,
        other => {
            return Err(Error::validation(format!("unknown action: {}", other)).into());
        }
    };

    state.store.upsert_instance(updated.clone());
    state.store.push_audit(
        format!("instance.{}", request.action),
        json!({ "instance_id": updated.id, "status": updated.status }),
    );
    state.store.persist_best_effort();

    Ok(Json(json!({ "ok": true, "instance": updated })))
}

pub async fn list_instances(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "ok": true, "instances": state.store.list_instances() })))
}

pub async fn instance_health(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let instance = state
        .store
        .instance(&instance_id)
        .ok_or_else(|| Error::not_found(format!("unknown instance: {}", instance_id)))?;
    let adapter = state.registry.require(&instance.provider_id)?;

    let probe = adapter.check_runtime_health(&instance).await;
    state.store.update_instance(&instance_id, |i| {
        i.last_health_check_at = Some(probe.checked_at);
    });
    state.store.persist_best_effort();

    Ok(Json(json!({ "ok": true, "health": probe })))
}

// ---- inference ----

#[derive(Debug, Deserialize)]
pub struct InferenceApiRequest {
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default = "default_project")]
    pub project_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn run_inference(
    State(state): State<AppState>,
    Json(request): Json<InferenceApiRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let result = state
        .engine
        .run_inference(InferenceRequest {
            project_id: request.project_id,
            instance_id: request.instance_id,
            payload: InferencePayload {
                prompt: request.prompt,
                model: request.model,
                max_tokens: None,
                temperature: None,
            },
        })
        .await;

    // Both outcomes appended logs and counters
    state.store.persist_best_effort();
    let report = result?;

    Ok(Json(json!({
        "ok": true,
        "routed_instance_id": report.routed_instance_id,
        "request_log": report.request_log,
        "result": report.result,
    })))
}

// ---- routing ----

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    #[serde(default)]
    pub project_id: Option<String>,
}

pub async fn get_routing(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    match query.project_id {
        Some(project_id) => {
            let instance_id = state.store.route(&project_id);
            Ok(Json(json!({ "ok": true, "project_id": project_id, "instance_id": instance_id })))
        }
        None => {
            let routes: std::collections::HashMap<String, String> =
                state.store.routes().into_iter().collect();
            Ok(Json(json!({ "ok": true, "routes": routes })))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    #[serde(default = "default_project")]
    pub project_id: String,
    pub instance_id: String,
}

pub async fn set_routing(
    State(state): State<AppState>,
    Json(request): Json<RouteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.instance(&request.instance_id).is_none() {
        return Err(Error::not_found(format!("unknown instance: {}", request.instance_id)).into());
    }
    state
        .store
        .set_route(&request.project_id, &request.instance_id);
    state.store.push_audit(
        "routing.set",
        json!({ "project_id": request.project_id, "instance_id": request.instance_id }),
    );
    state.store.persist_best_effort();
    Ok(Json(json!({
        "ok": true,
        "project_id": request.project_id,
        "instance_id": request.instance_id,
    })))
}

pub async fn get_fallback_route(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    match query.project_id {
        Some(project_id) => {
            let fallback_instance_id = state.store.fallback_route(&project_id);
            Ok(Json(json!({
                "ok": true,
                "project_id": project_id,
                "fallback_instance_id": fallback_instance_id,
            })))
        }
        None => {
            let routes: std::collections::HashMap<String, String> =
                state.store.fallback_routes().into_iter().collect();
            Ok(Json(json!({ "ok": true, "fallback_routes": routes })))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FallbackRouteRequest {
    #[serde(default = "default_project")]
    pub project_id: String,
    pub fallback_instance_id: String,
}

pub async fn set_fallback_route(
    State(state): State<AppState>,
    Json(request): Json<FallbackRouteRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.instance(&request.fallback_instance_id).is_none() {
        return Err(Error::not_found(format!(
            "unknown instance: {}",
            request.fallback_instance_id
        ))
        .into());
    }
    state
        .store
        .set_fallback_route(&request.project_id, &request.fallback_instance_id);
    state.store.push_audit(
        "fallback_route.set",
        json!({
            "project_id": request.project_id,
            "fallback_instance_id": request.fallback_instance_id,
        }),
    );
    state.store.persist_best_effort();
    Ok(Json(json!({
        "ok": true,
        "project_id": request.project_id,
        "fallback_instance_id": request.fallback_instance_id,
    })))
}

// ---- policies ----

pub async fn get_budget_policy(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let project_id = query.project_id.unwrap_or_else(default_project);
    let policy = state.store.ensure_budget_policy(&project_id);
    let spent = state.store.spend_for_policy(&policy.id);
    Ok(Json(json!({ "ok": true, "policy": policy, "spent_usd": spent })))
}

#[derive(Debug, Deserialize)]
pub struct BudgetPolicyRequest {
    #[serde(default = "default_project")]
    pub project_id: String,
    #[serde(flatten)]
    pub patch: BudgetPolicyPatch,
}

pub async fn set_budget_policy(
    State(state): State<AppState>,
    Json(request): Json<BudgetPolicyRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut policy = state.store.ensure_budget_policy(&request.project_id);
    request.patch.apply(&mut policy)?;
    state.store.upsert_budget_policy(policy.clone());
    state.store.push_audit(
        "budget_policy.update",
        json!({ "policy_id": policy.id, "project_id": request.project_id }),
    );
    state.store.persist_best_effort();
    Ok(Json(json!({ "ok": true, "policy": policy })))
}

pub async fn get_reliability(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "ok": true, "reliability": state.store.reliability() })))
}

pub async fn set_reliability(
    State(state): State<AppState>,
    Json(policy): Json<ReliabilityPolicy>,
) -> ApiResult<Json<serde_json::Value>> {
    if policy.inference_timeout_ms == 0 {
        return Err(Error::validation("inference_timeout_ms must be greater than 0").into());
    }
    if policy.max_queue_depth_per_instance == 0 {
        return Err(Error::validation("max_queue_depth_per_instance must be greater than 0").into());
    }
    if policy.circuit_breaker.failure_threshold == 0 {
        return Err(Error::validation("failure_threshold must be greater than 0").into());
    }
    state.store.set_reliability(policy.clone());
    state
        .store
        .push_audit("reliability.update", serde_json::to_value(&policy)?);
    state.store.persist_best_effort();
    Ok(Json(json!({ "ok": true, "reliability": policy })))
}

// ---- observability ----

pub async fn observability(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let snapshot = state.store.observability().snapshot();
    Ok(Json(json!({
        "ok": true,
        "success_rate": snapshot.success_rate(),
        "avg_latency_ms": snapshot.avg_latency_ms(),
        "observability": snapshot,
    })))
}

pub async fn audit_logs(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(json!({ "ok": true, "entries": state.store.audit_entries() })))
}
