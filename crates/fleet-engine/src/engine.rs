//! Inference dispatch with retries, circuit breaking, and fallback routing

use crate::{breaker, budget, queue::AdmissionControl};

use chrono::Utc;
use fleet_adapter::AdapterRegistry;
use fleet_core::types::{InferenceOutcome, InferencePayload, Instance};
use fleet_core::{BudgetPolicy, Error, InferenceRequestLog, ReliabilityPolicy, Result};
use fleet_state::{classify_error, StateStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One logical inference request against a project or explicit instance
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub project_id: String,
    pub instance_id: Option<String>,
    pub payload: InferencePayload,
}

/// Result of a dispatched inference request
#[derive(Debug, Clone)]
pub struct InferenceReport {
    /// Instance the request actually executed on (fallbacks included)
    pub routed_instance_id: String,
    pub request_log: InferenceRequestLog,
    pub result: InferenceOutcome,
}

/// The reliability engine. Owns per-instance admission state; breaker
/// records live in the injected store so engines sharing a store share
/// breakers, and engines over separate stores are fully isolated.
pub struct ReliabilityEngine {
    store: StateStore,
    registry: Arc<AdapterRegistry>,
    admission: AdmissionControl,
}

impl ReliabilityEngine {
    pub fn new(store: StateStore, registry: Arc<AdapterRegistry>) -> Self {
        Self {
            store,
            registry,
            admission: AdmissionControl::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Pure routing resolution: explicit id, else the project's routing
    /// table entry, else any running instance. No side effects.
    pub fn resolve_instance(&self, project_id: &str, explicit: Option<&str>) -> Option<Instance> {
        if let Some(id) = explicit {
            return self.store.instance(id);
        }
        if let Some(routed) = self.store.route(project_id) {
            if let Some(instance) = self.store.instance(&routed) {
                return Some(instance);
            }
        }
        self.store.any_running_instance(None)
    }

    /// Fallback resolution: the project's explicit fallback mapping when it
    /// points at another running instance, else any other running instance.
    pub fn resolve_fallback(&self, project_id: &str, exclude: &str) -> Option<Instance> {
        if let Some(fallback_id) = self.store.fallback_route(project_id) {
            if fallback_id != exclude {
                if let Some(instance) = self.store.instance(&fallback_id) {
                    if instance.status == fleet_core::InstanceStatus::Running {
                        return Some(instance);
                    }
                }
            }
        }
        self.store.any_running_instance(Some(exclude))
    }

    /// Stop instances idle beyond their budget policy threshold
    pub fn sweep_idle(&self) -> Vec<String> {
        budget::sweep_idle(&self.store, Utc::now())
    }

    /// Run one inference request through admission, the circuit breaker,
    /// timeout+retry dispatch, and at most one fallback hop.
    pub async fn run_inference(&self, request: InferenceRequest) -> Result<InferenceReport> {
        if request.payload.prompt.trim().is_empty() {
            return Err(Error::validation("prompt is required"));
        }

        let policy = self.store.reliability();
        let now = Utc::now();

        let primary = self
            .resolve_instance(&request.project_id, request.instance_id.as_deref())
            .ok_or_else(|| Error::not_found("no instance available for inference"))?;

        if primary.status != fleet_core::InstanceStatus::Running {
            return Err(Error::validation(format!(
                "instance {} is not running (status: {})",
                primary.id, primary.status
            )));
        }

        let budget_policy = self.store.policy_for_instance(&primary);
        if let Err(err) = budget::check_stop_window(&budget_policy, now) {
            self.store.push_audit(
                "inference.stop_window_block",
                serde_json::json!({ "instance_id": primary.id, "policy_id": budget_policy.id }),
            );
            return Err(err);
        }
        if let Err(err) = budget::check_spend_cap(&self.store, &budget_policy) {
            self.store.push_audit(
                "inference.budget_block",
                serde_json::json!({ "instance_id": primary.id, "policy_id": budget_policy.id }),
            );
            return Err(err);
        }

        let payload = self.payload_with_profile(&primary, request.payload.clone());

        // Circuit check on the resolved instance; open circuits reroute to
        // the fallback transparently when one exists.
        let mut target = primary.clone();
        let mut rerouted = false;
        if let breaker::Admission::Refuse { open_until } =
            breaker::admit(&self.store, &primary.id, now)
        {
            match self.resolve_fallback(&request.project_id, &primary.id) {
                Some(fallback) => {
                    debug!(from = %primary.id, to = %fallback.id, "circuit open, rerouting");
                    self.store.push_audit(
                        "inference.reroute",
                        serde_json::json!({
                            "from": primary.id,
                            "to": fallback.id,
                            "reason": "circuit-open",
                        }),
                    );
                    target = fallback;
                    rerouted = true;
                }
                None => {
                    self.store.push_audit(
                        "inference.circuit_block",
                        serde_json::json!({ "instance_id": primary.id }),
                    );
                    return Err(Error::CircuitOpen {
                        instance_id: primary.id.clone(),
                        open_until,
                    });
                }
            }
        }

        match self.dispatch(&target, &payload, &policy).await {
            Ok(outcome) => Ok(self.finish_success(&target, &budget_policy, &payload, outcome)),
            Err(err) => {
                // Queue-full is an admission rejection, not an attempt:
                // no provider call happened, so neither the breaker nor
                // the request log should see it.
                if matches!(err, Error::Capacity { .. }) {
                    self.store.push_audit(
                        "inference.queue_full",
                        serde_json::json!({ "instance_id": target.id }),
                    );
                    return Err(err);
                }

                breaker::record_failure(
                    &self.store,
                    &target.id,
                    &policy.circuit_breaker,
                    err.code(),
                    Utc::now(),
                );

                if rerouted {
                    self.finish_failure(&target, &budget_policy, &payload, &err);
                    return Err(err);
                }

                // Exactly one fallback hop, repeating the full
                // timeout+retry sequence on the alternate instance.
                match self.resolve_fallback(&request.project_id, &target.id) {
                    Some(fallback) => {
                        warn!(
                            from = %target.id,
                            to = %fallback.id,
                            error = %err,
                            "dispatch failed, attempting fallback"
                        );
                        self.store.push_audit(
                            "inference.reroute",
                            serde_json::json!({
                                "from": target.id,
                                "to": fallback.id,
                                "reason": "dispatch-failure",
                            }),
                        );
                        match self.dispatch(&fallback, &payload, &policy).await {
                            Ok(outcome) => {
                                Ok(self.finish_success(&fallback, &budget_policy, &payload, outcome))
                            }
                            Err(fallback_err) => {
                                if matches!(fallback_err, Error::Capacity { .. }) {
                                    self.store.push_audit(
                                        "inference.queue_full",
                                        serde_json::json!({ "instance_id": fallback.id }),
                                    );
                                    return Err(fallback_err);
                                }
                                breaker::record_failure(
                                    &self.store,
                                    &fallback.id,
                                    &policy.circuit_breaker,
                                    fallback_err.code(),
                                    Utc::now(),
                                );
                                self.finish_failure(
                                    &fallback,
                                    &budget_policy,
                                    &payload,
                                    &fallback_err,
                                );
                                Err(fallback_err)
                            }
                        }
                    }
                    None => {
                        self.finish_failure(&target, &budget_policy, &payload, &err);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Fill unset sampling parameters from the instance's inference profile
    fn payload_with_profile(
        &self,
        instance: &Instance,
        mut payload: InferencePayload,
    ) -> InferencePayload {
        if let Some(profile_id) = &instance.inference_profile_id {
            if let Some(profile) = self
                .store
                .inference_profiles()
                .into_iter()
                .find(|p| &p.id == profile_id)
            {
                payload.max_tokens = payload.max_tokens.or(Some(profile.max_tokens));
                payload.temperature = payload.temperature.or(Some(profile.temperature));
            }
        }
        payload
    }

    /// One full timeout+retry sequence against a single instance. The
    /// queue permit is acquired before any network call and held for the
    /// whole sequence; RAII releases it on every exit path.
    async fn dispatch(
        &self,
        instance: &Instance,
        payload: &InferencePayload,
        policy: &ReliabilityPolicy,
    ) -> Result<InferenceOutcome> {
        let _permit = self
            .admission
            .acquire(&instance.id, policy.max_queue_depth_per_instance)?;

        let adapter = self.registry.require(&instance.provider_id)?;
        let deadline = Duration::from_millis(policy.inference_timeout_ms);

        let mut attempt: u32 = 0;
        loop {
            let call = adapter.run_inference(instance, payload, deadline);
            let err = match tokio::time::timeout(deadline, call).await {
                Ok(Ok(outcome)) => return Ok(outcome),
                Ok(Err(wire)) => Error::Transport(wire),
                Err(_) => Error::timeout(format!(
                    "inference attempt timed out after {}ms",
                    policy.inference_timeout_ms
                )),
            };

            if err.is_retriable() && attempt < policy.retry.max_retries {
                let delay = policy.retry.backoff_ms(attempt);
                debug!(
                    instance = %instance.id,
                    attempt,
                    delay_ms = delay,
                    error = %err,
                    "retrying inference attempt"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
                continue;
            }
            return Err(err);
        }
    }

    fn finish_success(
        &self,
        executed: &Instance,
        budget_policy: &BudgetPolicy,
        payload: &InferencePayload,
        outcome: InferenceOutcome,
    ) -> InferenceReport {
        let now = Utc::now();
        self.store
            .update_instance(&executed.id, |i| i.touch_activity(now));
        breaker::record_success(&self.store, &executed.id);

        let cost = budget::request_cost_estimate_usd(
            &executed.gpu_type,
            executed.gpu_count,
            outcome.latency_ms,
        );

        let mut log = InferenceRequestLog::new(&executed.id, &executed.project_id);
        log.budget_policy_id = Some(budget_policy.id.clone());
        log.model = outcome.model.clone();
        log.prompt_chars = payload.prompt.chars().count();
        log.tokens_estimate = outcome.tokens_estimate;
        log.latency_ms = outcome.latency_ms;
        log.cost_estimate_usd = cost;
        log.ok = true;
        self.store.append_request_log(log.clone());

        self.store
            .observability()
            .record_inference(true, outcome.latency_ms, cost);
        self.store.push_audit(
            "inference.success",
            serde_json::json!({
                "instance_id": executed.id,
                "latency_ms": outcome.latency_ms,
                "cost_estimate_usd": cost,
            }),
        );

        InferenceReport {
            routed_instance_id: executed.id.clone(),
            request_log: log,
            result: outcome,
        }
    }

    fn finish_failure(
        &self,
        attempted: &Instance,
        budget_policy: &BudgetPolicy,
        payload: &InferencePayload,
        err: &Error,
    ) {
        let mut log = InferenceRequestLog::new(&attempted.id, &attempted.project_id);
        log.budget_policy_id = Some(budget_policy.id.clone());
        log.prompt_chars = payload.prompt.chars().count();
        log.error_code = Some(err.code().to_string());
        self.store.append_request_log(log);

        self.store.observability().record_inference(false, 0, 0.0);
        self.store.observability().record_provider_error(
            &attempted.provider_id,
            classify_error(err.code(), &err.to_string()),
        );
        self.store.push_audit(
            "inference.failure",
            serde_json::json!({
                "instance_id": attempted.id,
                "error_code": err.code(),
            }),
        );
    }
}
