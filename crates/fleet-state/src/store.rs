//! In-memory keyed store for the GPU fleet control plane
//!
//! All maps are safe for concurrent access; no lock is held across an
//! await point. Policy records are read-modify-written last-writer-wins.

use crate::observability::Observability;
use crate::snapshot::{GpuDocument, GpuNamespace};
use crate::{Result, StateError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fleet_core::{
    AuditLogEntry, BudgetPolicy, CircuitBreakerState, InferenceProfile, InferenceRequestLog,
    Instance, InstanceStatus, KmsState, ProviderAccount, ReliabilityPolicy,
};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Most-recent audit entries kept in the ring buffer
const AUDIT_LOG_CAP: usize = 500;

/// Shared state store. Cloning is cheap; clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    instances: Arc<DashMap<String, Instance>>,
    accounts: Arc<RwLock<Vec<ProviderAccount>>>,
    routing: Arc<DashMap<String, String>>,
    fallback_routes: Arc<DashMap<String, String>>,
    budget_policies: Arc<DashMap<String, BudgetPolicy>>,
    inference_profiles: Arc<DashMap<String, InferenceProfile>>,
    reliability: Arc<RwLock<ReliabilityPolicy>>,
    circuit_breakers: Arc<DashMap<String, CircuitBreakerState>>,
    request_logs: Arc<RwLock<Vec<InferenceRequestLog>>>,
    audit: Arc<RwLock<VecDeque<AuditLogEntry>>>,
    observability: Arc<Observability>,
    kms: Arc<RwLock<Option<KmsState>>>,
    providers: Arc<RwLock<serde_json::Map<String, serde_json::Value>>>,
    path: Arc<RwLock<Option<PathBuf>>>,
}

impl StateStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        let store = Self::default();
        store.ensure_default_profiles();
        store
    }

    /// Load a store from a snapshot file, or start empty if the file does
    /// not exist yet
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let doc: GpuDocument = serde_json::from_str(&raw)?;
            Self::from_document(doc)
        } else {
            debug!(path = %path.display(), "no snapshot found, starting empty");
            Self::new()
        };
        *store.path.write().expect("path lock poisoned") = Some(path);
        Ok(store)
    }

    fn ensure_default_profiles(&self) {
        for profile in InferenceProfile::defaults() {
            self.inference_profiles
                .entry(profile.id.clone())
                .or_insert(profile);
        }
    }

    // ---- instances ----

    pub fn upsert_instance(&self, instance: Instance) {
        self.instances.insert(instance.id.clone(), instance);
    }

    pub fn instance(&self, id: &str) -> Option<Instance> {
        self.instances.get(id).map(|entry| entry.clone())
    }

    pub fn list_instances(&self) -> Vec<Instance> {
        let mut all: Vec<Instance> = self.instances.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Mutate an instance in place; returns the updated copy
    pub fn update_instance<F>(&self, id: &str, mutate: F) -> Option<Instance>
    where
        F: FnOnce(&mut Instance),
    {
        self.instances.get_mut(id).map(|mut entry| {
            mutate(&mut entry);
            entry.clone()
        })
    }

    /// Any running instance, excluding `exclude` (used for fallback
    /// resolution and last-resort routing)
    pub fn any_running_instance(&self, exclude: Option<&str>) -> Option<Instance> {
        let mut running: Vec<Instance> = self
            .instances
            .iter()
            .filter(|e| e.status == InstanceStatus::Running && Some(e.id.as_str()) != exclude)
            .map(|e| e.clone())
            .collect();
        running.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        running.into_iter().next()
    }

    /// Running instances idle since before `cutoff`
    pub fn idle_running_instances(&self, cutoff: DateTime<Utc>) -> Vec<Instance> {
        self.instances
            .iter()
            .filter(|e| {
                e.status == InstanceStatus::Running
                    && e.last_activity_at.unwrap_or(e.created_at) < cutoff
            })
            .map(|e| e.clone())
            .collect()
    }

    // ---- provider accounts ----

    /// Latest account for a provider (`updated_at` wins)
    pub fn account_for_provider(&self, provider_id: &str) -> Option<ProviderAccount> {
        let accounts = self.accounts.read().expect("accounts lock poisoned");
        accounts
            .iter()
            .filter(|a| a.provider_id == provider_id)
            .max_by_key(|a| a.updated_at)
            .cloned()
    }

    pub fn upsert_account(&self, account: ProviderAccount) {
        let mut accounts = self.accounts.write().expect("accounts lock poisoned");
        match accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account,
            None => accounts.push(account),
        }
    }

    pub fn list_accounts(&self) -> Vec<ProviderAccount> {
        self.accounts.read().expect("accounts lock poisoned").clone()
    }

    // ---- routing ----

    pub fn route(&self, project_id: &str) -> Option<String> {
        self.routing.get(project_id).map(|e| e.clone())
    }

    pub fn set_route(&self, project_id: impl Into<String>, instance_id: impl Into<String>) {
        self.routing.insert(project_id.into(), instance_id.into());
    }

    pub fn routes(&self) -> Vec<(String, String)> {
        self.routing
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn fallback_route(&self, project_id: &str) -> Option<String> {
        self.fallback_routes.get(project_id).map(|e| e.clone())
    }

    pub fn set_fallback_route(
        &self,
        project_id: impl Into<String>,
        instance_id: impl Into<String>,
    ) {
        self.fallback_routes
            .insert(project_id.into(), instance_id.into());
    }

    pub fn fallback_routes(&self) -> Vec<(String, String)> {
        self.fallback_routes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // ---- policies ----

    /// Budget policy for a project, auto-created with defaults on first use
    pub fn ensure_budget_policy(&self, project_id: &str) -> BudgetPolicy {
        if let Some(existing) = self
            .budget_policies
            .iter()
            .find(|e| e.project_id == project_id)
        {
            return existing.clone();
        }
        let policy = BudgetPolicy::default_for_project(project_id);
        self.budget_policies
            .insert(policy.id.clone(), policy.clone());
        policy
    }

    pub fn budget_policy(&self, id: &str) -> Option<BudgetPolicy> {
        self.budget_policies.get(id).map(|e| e.clone())
    }

    pub fn upsert_budget_policy(&self, policy: BudgetPolicy) {
        self.budget_policies.insert(policy.id.clone(), policy);
    }

    pub fn list_budget_policies(&self) -> Vec<BudgetPolicy> {
        self.budget_policies.iter().map(|e| e.clone()).collect()
    }

    /// Budget policy governing an instance: its pinned policy if set, else
    /// the project default
    pub fn policy_for_instance(&self, instance: &Instance) -> BudgetPolicy {
        if let Some(policy_id) = &instance.budget_policy_id {
            if let Some(policy) = self.budget_policy(policy_id) {
                return policy;
            }
        }
        self.ensure_budget_policy(&instance.project_id)
    }

    pub fn reliability(&self) -> ReliabilityPolicy {
        self.reliability
            .read()
            .expect("reliability lock poisoned")
            .clone()
    }

    pub fn set_reliability(&self, policy: ReliabilityPolicy) {
        *self.reliability.write().expect("reliability lock poisoned") = policy;
    }

    pub fn inference_profiles(&self) -> Vec<InferenceProfile> {
        self.inference_profiles.iter().map(|e| e.clone()).collect()
    }

    // ---- circuit breakers ----

    /// Read a breaker record (default closed if absent)
    pub fn circuit_breaker(&self, instance_id: &str) -> CircuitBreakerState {
        self.circuit_breakers
            .get(instance_id)
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// Atomically mutate a breaker record, returning the updated copy.
    /// The closure runs under the map shard lock with no await points.
    pub fn with_circuit_breaker<F, T>(&self, instance_id: &str, mutate: F) -> T
    where
        F: FnOnce(&mut CircuitBreakerState) -> T,
    {
        let mut entry = self
            .circuit_breakers
            .entry(instance_id.to_string())
            .or_default();
        mutate(&mut entry)
    }

    pub fn circuit_breakers(&self) -> Vec<(String, CircuitBreakerState)> {
        self.circuit_breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // ---- request logs and spend ----

    pub fn append_request_log(&self, log: InferenceRequestLog) {
        self.request_logs
            .write()
            .expect("request logs lock poisoned")
            .push(log);
    }

    /// Derived cumulative spend for a budget policy.
    ///
    /// Re-sums all historical logs on every call; O(n) per request by
    /// design (see DESIGN.md).
    pub fn spend_for_policy(&self, policy_id: &str) -> f64 {
        self.request_logs
            .read()
            .expect("request logs lock poisoned")
            .iter()
            .filter(|log| log.budget_policy_id.as_deref() == Some(policy_id))
            .map(|log| log.cost_estimate_usd)
            .sum()
    }

    pub fn request_logs(&self) -> Vec<InferenceRequestLog> {
        self.request_logs
            .read()
            .expect("request logs lock poisoned")
            .clone()
    }

    // ---- audit ----

    /// Append one audit entry, dropping the oldest past the cap
    pub fn push_audit(&self, action: impl Into<String>, details: serde_json::Value) {
        let mut audit = self.audit.write().expect("audit lock poisoned");
        if audit.len() >= AUDIT_LOG_CAP {
            audit.pop_front();
        }
        audit.push_back(AuditLogEntry::new(action, details));
    }

    pub fn audit_entries(&self) -> Vec<AuditLogEntry> {
        self.audit
            .read()
            .expect("audit lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    // ---- observability ----

    pub fn observability(&self) -> &Observability {
        &self.observability
    }

    // ---- kms ----

    pub fn kms_state(&self) -> Option<KmsState> {
        self.kms.read().expect("kms lock poisoned").clone()
    }

    pub fn set_kms_state(&self, state: KmsState) {
        *self.kms.write().expect("kms lock poisoned") = Some(state);
    }

    // ---- persistence ----

    /// Build the persisted document
    pub fn snapshot(&self) -> GpuDocument {
        GpuDocument {
            gpu: GpuNamespace {
                providers: self.providers.read().expect("providers lock poisoned").clone(),
                provider_accounts: self.list_accounts(),
                instances: self.list_instances(),
                routing: self.routes().into_iter().collect(),
                inference_profiles: self
                    .inference_profiles()
                    .into_iter()
                    .map(|p| (p.id.clone(), p))
                    .collect(),
                inference_request_logs: self.request_logs(),
                budget_policies: self
                    .list_budget_policies()
                    .into_iter()
                    .map(|p| (p.id.clone(), p))
                    .collect(),
                reliability: self.reliability(),
                circuit_breakers: self.circuit_breakers().into_iter().collect(),
                fallback_routes: self.fallback_routes().into_iter().collect(),
                observability: self.observability.snapshot(),
                audit_logs: self.audit_entries(),
                kms: self.kms_state(),
            },
        }
    }

    /// Rebuild a store from a persisted document
    pub fn from_document(doc: GpuDocument) -> Self {
        let store = Self::new();
        let gpu = doc.gpu;
        *store.providers.write().expect("providers lock poisoned") = gpu.providers;
        {
            let mut accounts = store.accounts.write().expect("accounts lock poisoned");
            *accounts = gpu.provider_accounts;
        }
        for instance in gpu.instances {
            store.instances.insert(instance.id.clone(), instance);
        }
        for (project, instance) in gpu.routing {
            store.routing.insert(project, instance);
        }
        for (id, profile) in gpu.inference_profiles {
            store.inference_profiles.insert(id, profile);
        }
        {
            let mut logs = store.request_logs.write().expect("request logs lock poisoned");
            *logs = gpu.inference_request_logs;
        }
        for (id, policy) in gpu.budget_policies {
            store.budget_policies.insert(id, policy);
        }
        store.set_reliability(gpu.reliability);
        for (id, breaker) in gpu.circuit_breakers {
            store.circuit_breakers.insert(id, breaker);
        }
        for (project, instance) in gpu.fallback_routes {
            store.fallback_routes.insert(project, instance);
        }
        store.observability.restore(&gpu.observability);
        {
            let mut audit = store.audit.write().expect("audit lock poisoned");
            *audit = gpu.audit_logs.into_iter().collect();
        }
        if let Some(kms) = gpu.kms {
            store.set_kms_state(kms);
        }
        store
    }

    /// Persist the snapshot atomically (temp file + rename). A no-op for
    /// purely in-memory stores.
    pub fn persist(&self) -> Result<()> {
        let path = match self.path.read().expect("path lock poisoned").clone() {
            Some(path) => path,
            None => return Ok(()),
        };
        let doc = self.snapshot();
        let serialized = serde_json::to_string_pretty(&doc)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "snapshot persisted");
        Ok(())
    }

    /// Persist, logging instead of propagating failures. Mutating API
    /// handlers call this so a full disk never turns into a 500.
    pub fn persist_best_effort(&self) {
        if let Err(err) = self.persist() {
            warn!(error = %err, "snapshot persist failed");
        }
    }
}

impl StateStore {
    /// Validation hook used by load paths
    pub fn validate(&self) -> Result<()> {
        // Routing entries must reference known instances; dangling entries
        // are tolerated at read time but rejected from a fresh snapshot.
        for (project, instance_id) in self.routes() {
            if self.instance(&instance_id).is_none() {
                return Err(StateError::Store(format!(
                    "routing for project {} references unknown instance {}",
                    project, instance_id
                )));
            }
        }
        Ok(())
    }
}
