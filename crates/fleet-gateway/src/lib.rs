//! # fleet-gateway
//!
//! HTTP JSON API for gpufleet.
//!
//! This crate provides:
//! - The axum router exposing provider configuration, instance lifecycle,
//!   inference dispatch, policy CRUD, and observability endpoints
//! - Error-to-status mapping from `fleet_core::Error` with structured
//!   response bodies
//! - The `fleetd` daemon binary with layered configuration and a
//!   background idle-shutdown sweep

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

pub mod config;
pub mod handlers;
pub mod server;

pub use config::GatewayConfig;
pub use server::{build_router, serve, AppState};

/// Result alias for gateway handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Wrapper mapping core errors onto HTTP responses.
///
/// Bodies carry a stable code plus structured details so callers can act
/// without log access. The status normally derives from the error kind;
/// pre-launch gates override it (budget and stop-window refusals are 400
/// at launch time but 429/403 at inference time).
#[derive(Debug)]
pub struct ApiError {
    pub error: fleet_core::Error,
    status: Option<StatusCode>,
}

impl ApiError {
    /// Force a 400 response regardless of the error kind
    pub fn bad_request(error: impl Into<fleet_core::Error>) -> Self {
        Self {
            error: error.into(),
            status: Some(StatusCode::BAD_REQUEST),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status.unwrap_or_else(|| {
            StatusCode::from_u16(self.error.to_http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        });
        let body = serde_json::json!({
            "ok": false,
            "code": self.error.code(),
            "error": self.error.to_string(),
            "details": self.error.details(),
        });
        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<fleet_core::Error>,
{
    fn from(err: E) -> Self {
        ApiError {
            error: err.into(),
            status: None,
        }
    }
}
