use axum::{extract::State, Json};
use serde::Deserialize;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    config::{ControlConfig, ControlConfigPatch, Settings},
    controller::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PowerOptimizationRequest {
    pub enabled: bool,
}

/// GET /api/config
pub async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ControlConfig>>, ApiError> {
    Ok(Json(ApiResponse::success(state.repos.load_control_config().await?)))
}

/// PUT /api/config. Field-wise overlay; unknown keys are rejected at extraction.
pub async fn update_config(
    State(state): State<AppState>,
    Json(patch): Json<ControlConfigPatch>,
) -> Result<Json<ApiResponse<ControlConfig>>, ApiError> {
    let cfg = state.engine.update_config(patch).await?;
    Ok(Json(ApiResponse::success(cfg)))
}

/// GET /api/settings
pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Settings>>, ApiError> {
    Ok(Json(ApiResponse::success(state.repos.load_settings().await?)))
}

/// POST /api/settings/power_optimization
pub async fn set_power_optimization(
    State(state): State<AppState>,
    Json(req): Json<PowerOptimizationRequest>,
) -> Result<Json<ApiResponse<Settings>>, ApiError> {
    let settings = state.repos.set_power_optimization(req.enabled).await?;
    tracing::info!(enabled = req.enabled, "power optimization toggled");
    Ok(Json(ApiResponse::success(settings)))
}
