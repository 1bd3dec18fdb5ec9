use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::controller::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    storage: ComponentHealth,
    control_loop: ComponentHealth,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: "healthy",
            error: None,
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy",
            error: Some(error),
        }
    }
}

/// GET /healthz
///
/// Storage must be readable. A failing control cycle degrades the report but keeps 200,
/// since the loop retries on its own.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage = match state.repos.devices.load_all().await {
        Ok(_) => ComponentHealth::healthy(),
        Err(e) => ComponentHealth::unhealthy(e.to_string()),
    };
    let control_loop = match state.cycle_status.read().await.last_error.clone() {
        None => ComponentHealth::healthy(),
        Some(e) => ComponentHealth::unhealthy(e),
    };

    let (code, status) = match (storage.error.is_some(), control_loop.error.is_some()) {
        (true, _) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
        (false, true) => (StatusCode::OK, "degraded"),
        (false, false) => (StatusCode::OK, "healthy"),
    };

    (
        code,
        Json(HealthResponse {
            status,
            timestamp: chrono::Utc::now(),
            checks: HealthChecks { storage, control_loop },
        }),
    )
}
