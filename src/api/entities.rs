//! Read-only views onto the smart-home platform.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::{
    api::{error::ApiError, response::ApiResponse},
    controller::AppState,
    domain::TariffMode,
    gateway::EntityState,
};

#[derive(Debug, Serialize)]
pub struct TariffModes {
    modes: Vec<TariffMode>,
    current_modes: BTreeMap<String, TariffMode>,
    /// Rates the tariff entity can take, from its `options` attribute
    options: Vec<String>,
}

/// GET /api/tariff_modes
pub async fn get_tariff_modes(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<TariffModes>>, ApiError> {
    let cfg = state.repos.load_control_config().await?;

    let mut options = Vec::new();
    if let Some(entity) = cfg.tariff_rate.as_deref() {
        match state.gateway.read_state(entity).await {
            Ok(tariff) => {
                options = tariff
                    .attributes
                    .get("options")
                    .and_then(|v| v.as_array())
                    .map(|opts| {
                        opts.iter()
                            .filter_map(|o| o.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
            }
            Err(e) => tracing::warn!(entity, error = %e, "tariff entity unavailable"),
        }
    }

    Ok(Json(ApiResponse::success(TariffModes {
        modes: TariffMode::ALL.to_vec(),
        current_modes: cfg.tariff_modes,
        options,
    })))
}

/// GET /api/states/:entity_id
pub async fn get_entity_state(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> Result<Json<ApiResponse<EntityState>>, ApiError> {
    Ok(Json(ApiResponse::success(state.gateway.read_state(&entity_id).await?)))
}
