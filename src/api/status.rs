use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    controller::{AppState, ControlSnapshot, TaskStatus},
};

/// Controller status
#[derive(Debug, Serialize)]
pub struct SystemStatus {
    running: bool,
    version: &'static str,
    power_optimization_enabled: bool,
    manual_power_override: Option<f64>,
    devices: usize,
    devices_on: usize,
    control_loop: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct PowerOverrideRequest {
    /// Watts; `null` clears the override
    pub power: Option<f64>,
}

/// GET /api/status
pub async fn get_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<SystemStatus>>, ApiError> {
    let settings = state.repos.load_settings().await?;
    let views = state.engine.get_device_states().await;
    let control_loop = state.cycle_status.read().await.clone();

    Ok(Json(ApiResponse::success(SystemStatus {
        running: control_loop.run_count > 0,
        version: env!("CARGO_PKG_VERSION"),
        power_optimization_enabled: settings.power_optimization_enabled,
        manual_power_override: state.engine.manual_power_override().await,
        devices: views.len(),
        devices_on: views.values().filter(|v| v.is_on).count(),
        control_loop,
    })))
}

/// GET /api/debug. `data` is `null` until the first cycle has run.
pub async fn get_debug(
    State(state): State<AppState>,
) -> Json<ApiResponse<Option<ControlSnapshot>>> {
    Json(ApiResponse::success(state.engine.get_debug_snapshot().await))
}

/// POST /api/debug/power_override
pub async fn set_power_override(
    State(state): State<AppState>,
    Json(req): Json<PowerOverrideRequest>,
) -> Result<Json<ApiResponse<Option<f64>>>, ApiError> {
    if req.power.is_some_and(|w| !w.is_finite() || w < 0.0) {
        return Err(ApiError::BadRequest("power must be a non-negative number".into()));
    }
    state.engine.set_manual_power_override(req.power).await;
    Ok(Json(ApiResponse::success(state.engine.manual_power_override().await)))
}

/// POST /api/control/run. Runs one cycle now, serialised with the periodic loop.
pub async fn run_control(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ControlSnapshot>>, ApiError> {
    let started = Instant::now();
    let snapshot = state.engine.run_cycle_now().await?;
    let elapsed = started.elapsed().as_millis() as u64;
    Ok(Json(ApiResponse::success(snapshot).with_duration(elapsed)))
}
