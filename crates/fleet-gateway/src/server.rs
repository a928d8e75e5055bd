//! HTTP server wiring for the gpufleet gateway

use crate::config::GatewayConfig;
use crate::handlers;

use axum::routing::{get, post};
use axum::Router;
use fleet_adapter::AdapterRegistry;
use fleet_core::Result;
use fleet_engine::ReliabilityEngine;
use fleet_state::StateStore;
use fleet_vault::Vault;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub registry: Arc<AdapterRegistry>,
    pub engine: Arc<ReliabilityEngine>,
    pub vault: Arc<Vault>,
    pub config: GatewayConfig,
}

/// Build the application state from configuration
pub fn build_state(config: GatewayConfig) -> Result<AppState> {
    let store = match &config.state_path {
        Some(path) => StateStore::load(path)?,
        None => StateStore::new(),
    };
    let vault = init_vault(&config, &store)?;
    let registry = Arc::new(AdapterRegistry::new());
    let engine = Arc::new(ReliabilityEngine::new(store.clone(), Arc::clone(&registry)));

    Ok(AppState {
        store,
        registry,
        engine,
        vault,
        config,
    })
}

/// Resolve the master key: explicit config, else persisted KMS state, else
/// generate once and persist
fn init_vault(config: &GatewayConfig, store: &StateStore) -> Result<Arc<Vault>> {
    if let Some(key) = &config.master_key {
        let vault = Vault::from_base64(key, "mk-config")?;
        return Ok(Arc::new(vault));
    }
    if let Some(kms) = store.kms_state() {
        let vault = Vault::from_kms_state(&kms)?;
        return Ok(Arc::new(vault));
    }
    let (vault, kms) = Vault::generate();
    info!(key_id = vault.key_id(), "generated new master key");
    store.set_kms_state(kms);
    store.persist_best_effort();
    Ok(Arc::new(vault))
}

/// Build the axum router with all API routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/gpu/providers", get(handlers::list_providers))
        .route(
            "/api/gpu/provider/configure",
            post(handlers::configure_provider),
        )
        .route("/api/gpu/provider/test", post(handlers::test_provider))
        .route("/api/gpu/runtime-templates", get(handlers::runtime_templates))
        .route("/api/gpu/instances", get(handlers::list_instances))
        .route("/api/gpu/instance/launch", post(handlers::launch_instance))
        .route("/api/gpu/instance/action", post(handlers::instance_action))
        .route("/api/gpu/instance/:id/health", get(handlers::instance_health))
        .route("/api/gpu/inference", post(handlers::run_inference))
        .route(
            "/api/gpu/routing",
            get(handlers::get_routing).post(handlers::set_routing),
        )
        .route(
            "/api/gpu/fallback-route",
            get(handlers::get_fallback_route).post(handlers::set_fallback_route),
        )
        .route(
            "/api/gpu/budget-policy",
            get(handlers::get_budget_policy).post(handlers::set_budget_policy),
        )
        .route(
            "/api/gpu/reliability",
            get(handlers::get_reliability).post(handlers::set_reliability),
        )
        .route("/api/gpu/observability", get(handlers::observability))
        .route("/api/gpu/audit-logs", get(handlers::audit_logs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the gateway until shutdown, running the idle sweep in the
/// background
pub async fn serve(config: GatewayConfig) -> Result<()> {
    config.validate()?;
    let state = build_state(config.clone())?;

    spawn_idle_sweep(Arc::clone(&state.engine), config.idle_sweep_interval_secs);

    let app = build_router(state);
    let addr = config.bind_addr();
    info!(addr = %addr, "starting gpufleet gateway");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gateway shutdown complete");
    Ok(())
}

fn spawn_idle_sweep(engine: Arc<ReliabilityEngine>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick fires immediately; skip it so a fresh start never
        // races instance creation.
        interval.tick().await;
        loop {
            interval.tick().await;
            let stopped = engine.sweep_idle();
            if !stopped.is_empty() {
                warn!(count = stopped.len(), "idle sweep stopped instances");
                engine.store().persist_best_effort();
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state(state_path: Option<std::path::PathBuf>) -> AppState {
        let config = GatewayConfig {
            state_path,
            ..GatewayConfig::default()
        };
        build_state(config).unwrap()
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = match body {
            Some(value) => Request::builder()
                .method(method)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn ssh_credentials() -> Value {
        json!({
            "SSH_HOST": "127.0.0.1",
            "SSH_USER": "tester",
            "SSH_PRIVATE_KEY": "-----BEGIN TEST KEY-----abc",
        })
    }

    async fn configure_selfhosted(app: &Router) {
        let (status, body) = call(
            app,
            "POST",
            "/api/gpu/provider/configure",
            Some(json!({
                "provider_id": "selfhosted",
                "credentials": ssh_credentials(),
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["account"]["status"], "valid");
    }

    async fn launch_t4(app: &Router, project: &str, name: &str) -> String {
        let (status, body) = call(
            app,
            "POST",
            "/api/gpu/instance/launch",
            Some(json!({
                "provider_id": "selfhosted",
                "region": "custom",
                "gpu_type": "T4",
                "gpu_count": 1,
                "name": name,
                "project_id": project,
                "runtime": { "template_id": "vllm", "model": "test-model" },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "launch failed: {}", body);
        assert_eq!(body["ok"], true);
        assert_eq!(body["instance"]["status"], "running");
        assert_eq!(body["instance"]["health"], "ready");
        body["instance"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_configure_launch_route_infer_stop_flow() {
        let state = test_state(None);
        let app = build_router(state);

        configure_selfhosted(&app).await;
        let instance_id = launch_t4(&app, "e2e", "e2e-instance").await;

        let (status, _) = call(
            &app,
            "POST",
            "/api/gpu/routing",
            Some(json!({ "project_id": "e2e", "instance_id": instance_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/inference",
            Some(json!({
                "project_id": "e2e",
                "prompt": "Write one sentence about reliability testing",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["routed_instance_id"], instance_id.as_str());
        assert!(body["result"]["output"].as_str().unwrap().contains("reliability"));
        assert_eq!(body["request_log"]["ok"], true);

        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/instance/action",
            Some(json!({ "instance_id": instance_id, "action": "stop" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["instance"]["status"], "stopped");

        // Inference against a stopped instance is a 400
        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/inference",
            Some(json!({
                "instance_id": instance_id,
                "project_id": "e2e",
                "prompt": "should fail while stopped",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");
    }

    #[tokio::test]
    async fn test_launch_blocked_by_budget_cap() {
        let state = test_state(None);
        let app = build_router(state.clone());
        configure_selfhosted(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/instance/launch",
            Some(json!({
                "provider_id": "selfhosted",
                "region": "custom",
                "gpu_type": "T4",
                "name": "budget-instance",
                "project_id": "budget",
                "budget_policy": { "hard_spend_cap_usd": 0.0001 },
            })),
        )
        .await;
        // Pre-launch budget refusals are client errors, not backpressure
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BUDGET_CAP_REACHED");
        assert!(body["details"]["policy_id"].as_str().unwrap().contains("budget"));

        // The refusal happened before any provider call: no instance exists
        let (_, body) = call(&app, "GET", "/api/gpu/instances", None).await;
        assert_eq!(body["instances"].as_array().unwrap().len(), 0);
        // But the attempt is not even counted as provisioning
        assert_eq!(
            state.store.observability().snapshot().provisioning.attempts,
            0
        );
    }

    #[tokio::test]
    async fn test_launch_validates_region_and_gpu() {
        let state = test_state(None);
        let app = build_router(state);
        configure_selfhosted(&app).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/instance/launch",
            Some(json!({
                "provider_id": "selfhosted",
                "region": "mars-north-1",
                "gpu_type": "T4",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let (status, _) = call(
            &app,
            "POST",
            "/api/gpu/instance/launch",
            Some(json!({
                "provider_id": "selfhosted",
                "region": "custom",
                "gpu_type": "TPUv9",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_secrets_never_exposed_or_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("gpufleet.json");
        let state = test_state(Some(snapshot_path.clone()));
        let app = build_router(state);

        let secret = "SUPER_SECRET_AWS_KEY_123456";
        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/provider/configure",
            Some(json!({
                "provider_id": "aws",
                "credentials": {
                    "AWS_ACCESS_KEY_ID": "AKIA-STRICT-TEST",
                    "AWS_SECRET_ACCESS_KEY": secret,
                },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.to_string().contains(secret));

        let (status, body) = call(&app, "GET", "/api/gpu/providers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            !body.to_string().contains(secret),
            "API response must never expose the plaintext secret"
        );

        let persisted = std::fs::read_to_string(&snapshot_path).unwrap();
        assert!(
            !persisted.contains(secret),
            "snapshot must never store the plaintext secret"
        );
        let doc: Value = serde_json::from_str(&persisted).unwrap();
        assert!(doc["gpu"]["provider_accounts"][0]["credential_ref"]["payload"].is_string());

        // Authorization boundaries: unknown targets are 404s
        let (status, _) = call(
            &app,
            "POST",
            "/api/gpu/instance/action",
            Some(json!({ "instance_id": "missing-instance", "action": "start" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            "POST",
            "/api/gpu/routing",
            Some(json!({ "project_id": "security", "instance_id": "missing-instance" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_permission_gap_reported() {
        let state = test_state(None);
        let app = build_router(state);

        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/provider/configure",
            Some(json!({
                "provider_id": "aws",
                "credentials": {
                    "AWS_ACCESS_KEY_ID": "AKIA-TEST",
                    "AWS_SECRET_ACCESS_KEY": "secret",
                },
                "granted_permissions": ["ec2:DescribeInstances", "ec2:RunInstances"],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["account"]["status"], "permissions-missing");
        let missing = body["account"]["permissions"]["missing"].as_array().unwrap();
        assert!(missing.iter().any(|m| m == "ec2:StopInstances"));
    }

    #[tokio::test]
    async fn test_fallback_route_and_reliability_crud() {
        let state = test_state(None);
        let app = build_router(state);
        configure_selfhosted(&app).await;
        let primary = launch_t4(&app, "fb", "primary").await;
        let secondary = launch_t4(&app, "fb", "secondary").await;

        let (status, _) = call(
            &app,
            "POST",
            "/api/gpu/routing",
            Some(json!({ "project_id": "fb", "instance_id": primary })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            "POST",
            "/api/gpu/fallback-route",
            Some(json!({ "project_id": "fb", "fallback_instance_id": secondary })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, "GET", "/api/gpu/fallback-route?project_id=fb", None).await;
        assert_eq!(body["fallback_instance_id"], secondary.as_str());

        // Reliability policy roundtrip
        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/reliability",
            Some(json!({
                "inference_timeout_ms": 10_000,
                "max_queue_depth_per_instance": 4,
                "retry": { "max_retries": 1, "base_delay_ms": 100, "max_delay_ms": 1000 },
                "circuit_breaker": { "failure_threshold": 2, "reset_timeout_ms": 5000 },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);

        let (_, body) = call(&app, "GET", "/api/gpu/reliability", None).await;
        assert_eq!(body["reliability"]["max_queue_depth_per_instance"], 4);

        let (status, _) = call(
            &app,
            "POST",
            "/api/gpu/reliability",
            Some(json!({
                "inference_timeout_ms": 0,
                "max_queue_depth_per_instance": 4,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_observability_and_audit_endpoints() {
        let state = test_state(None);
        let app = build_router(state);
        configure_selfhosted(&app).await;
        let instance_id = launch_t4(&app, "obs", "obs-instance").await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/inference",
            Some(json!({ "instance_id": instance_id, "project_id": "obs", "prompt": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);

        let (status, body) = call(&app, "GET", "/api/gpu/observability", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["observability"]["inference"]["total"], 1);
        assert_eq!(body["observability"]["provisioning"]["success"], 1);
        assert_eq!(body["success_rate"], 1.0);

        let (status, body) = call(&app, "GET", "/api/gpu/audit-logs", None).await;
        assert_eq!(status, StatusCode::OK);
        let actions: Vec<&str> = body["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["action"].as_str().unwrap())
            .collect();
        assert!(actions.contains(&"provider.configure"));
        assert!(actions.contains(&"instance.launch"));
        assert!(actions.contains(&"inference.success"));
    }

    #[tokio::test]
    async fn test_instance_health_endpoint_updates_timestamp() {
        let state = test_state(None);
        let app = build_router(state.clone());
        configure_selfhosted(&app).await;
        let instance_id = launch_t4(&app, "health", "health-instance").await;

        let before = state
            .store
            .instance(&instance_id)
            .unwrap()
            .last_health_check_at;
        let (status, body) = call(
            &app,
            "GET",
            &format!("/api/gpu/instance/{}/health", instance_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["health"]["ok"], true);
        let after = state
            .store
            .instance(&instance_id)
            .unwrap()
            .last_health_check_at;
        assert!(after.is_some());
        assert_ne!(before, after);

        let (status, _) = call(&app, "GET", "/api/gpu/instance/nope/health", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_prompt_is_400() {
        let state = test_state(None);
        let app = build_router(state);
        configure_selfhosted(&app).await;
        let instance_id = launch_t4(&app, "default", "prompt-test").await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/gpu/inference",
            Some(json!({ "instance_id": instance_id, "project_id": "default" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");
    }
}
