use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    controller::{AppState, DeviceRuntimeState, DeviceView},
    domain::{device_from_value, Device},
    repo::OrderUpdate,
};

/// Desired or observed switch position, as `"on"` / `"off"`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchState {
    pub state: String,
}

fn parse_switch_state(raw: &str) -> Result<bool, ApiError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(ApiError::BadRequest(format!(
            "state must be \"on\" or \"off\", got {other:?}"
        ))),
    }
}

async fn load_device(state: &AppState, name: &str) -> Result<Device, ApiError> {
    state
        .repos
        .devices
        .get(name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("device {name}")))
}

/// Stored records merged with the controller's runtime view, by priority.
async fn device_views(state: &AppState) -> Result<Vec<DeviceView>, ApiError> {
    let devices = state.repos.devices.load_all().await?;
    let runtime = state.engine.get_device_states().await;
    let now = Utc::now();
    let mut views: Vec<DeviceView> = devices
        .into_iter()
        .map(|d| match runtime.get(&d.name) {
            Some(view) => DeviceView {
                device: Device {
                    energy_delivered_today: view.device.energy_delivered_today,
                    last_power_update: view.device.last_power_update,
                    last_dawn_reset: view.device.last_dawn_reset,
                    ..d
                },
                ..view.clone()
            },
            None => DeviceRuntimeState::new(d, now).view(),
        })
        .collect();
    views.sort_by_key(|v| v.device.order);
    Ok(views)
}

/// GET /api/devices
pub async fn list_devices(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<DeviceView>>>, ApiError> {
    let views = device_views(&state).await?;
    let total = views.len();
    Ok(Json(ApiResponse::success(views).with_count(total)))
}

/// GET /api/devices/:name
pub async fn get_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<DeviceView>>, ApiError> {
    device_views(&state)
        .await?
        .into_iter()
        .find(|v| v.device.name == name)
        .map(|v| Json(ApiResponse::success(v)))
        .ok_or_else(|| ApiError::NotFound(format!("device {name}")))
}

/// POST /api/devices
pub async fn add_device(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<Device>>), ApiError> {
    let device = device_from_value(&payload)?;
    let device = state.repos.devices.add(device).await?;
    tracing::info!(device = %device.name, order = device.order, "device added");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(device))))
}

/// PUT /api/devices/:name
///
/// The stored priority is kept unless the payload carries an `order`.
pub async fn update_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<ApiResponse<Device>>, ApiError> {
    let existing = load_device(&state, &name).await?;
    let mut device = device_from_value(&payload)?;
    if payload.get("order").map_or(true, Value::is_null) {
        device.order = existing.order;
    }
    let device = state.repos.devices.update(&name, device).await?;
    tracing::info!(device = %name, "device updated");
    Ok(Json(ApiResponse::success(device)))
}

/// DELETE /api/devices/:name. Unknown names are a no-op.
pub async fn delete_device(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let removed = state.repos.devices.delete(&name).await?;
    if removed {
        tracing::info!(device = %name, "device deleted");
    }
    Ok(Json(ApiResponse::success(removed)))
}

/// POST /api/devices/reorder
pub async fn reorder_devices(
    State(state): State<AppState>,
    Json(updates): Json<Vec<OrderUpdate>>,
) -> Result<Json<ApiResponse<Vec<Device>>>, ApiError> {
    let devices = state.repos.devices.reorder(&updates).await?;
    Ok(Json(ApiResponse::success(devices)))
}

/// GET /api/devices/:name/state. Live switch state from the platform.
pub async fn get_device_state(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<SwitchState>>, ApiError> {
    let device = load_device(&state, &name).await?;
    let entity = state.gateway.read_state(&device.switch_entity).await?;
    Ok(Json(ApiResponse::success(SwitchState { state: entity.value })))
}

/// POST /api/devices/:name/set_state
pub async fn set_device_state(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SwitchState>,
) -> Result<Json<ApiResponse<SwitchState>>, ApiError> {
    let on = parse_switch_state(&body.state)?;
    load_device(&state, &name).await?;
    if !state.engine.set_device_power(&name, on).await? {
        return Err(ApiError::UpstreamError(format!("switch command for {name} was rejected")));
    }
    Ok(Json(ApiResponse::success(SwitchState {
        state: if on { "on" } else { "off" }.to_string(),
    })))
}
