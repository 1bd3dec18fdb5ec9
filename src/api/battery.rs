//! Battery record endpoints

use axum::{extract::State, Json};
use serde_json::Value;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    controller::AppState,
    domain::{battery_from_value, Battery},
};

/// GET /api/battery. `data` is `null` when no battery is configured.
pub async fn get_battery(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Option<Battery>>>, ApiError> {
    Ok(Json(ApiResponse::success(state.repos.load_battery().await?)))
}

/// PUT /api/battery. Creates or replaces the single battery record.
pub async fn put_battery(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Json<ApiResponse<Battery>>, ApiError> {
    let battery = battery_from_value(&payload)?;
    state.repos.battery.save(&battery).await?;
    tracing::info!(
        size_kwh = battery.size_kwh,
        entity = %battery.battery_percent_entity,
        "battery saved"
    );
    Ok(Json(ApiResponse::success(battery)))
}

/// DELETE /api/battery
pub async fn delete_battery(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<bool>>, ApiError> {
    let removed = state.repos.battery.remove().await?;
    Ok(Json(ApiResponse::success(removed)))
}
