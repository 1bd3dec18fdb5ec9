pub mod battery;
pub mod devices;
pub mod entities;
pub mod error;
pub mod health;
pub mod response;
pub mod settings;
pub mod status;

use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::controller::AppState;

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/devices", get(devices::list_devices).post(devices::add_device))
        .route("/devices/reorder", post(devices::reorder_devices))
        .route(
            "/devices/:name",
            get(devices::get_device)
                .put(devices::update_device)
                .delete(devices::delete_device),
        )
        .route("/devices/:name/state", get(devices::get_device_state))
        .route("/devices/:name/set_state", post(devices::set_device_state))
        .route(
            "/battery",
            get(battery::get_battery)
                .put(battery::put_battery)
                .delete(battery::delete_battery),
        )
        .route("/config", get(settings::get_config).put(settings::update_config))
        .route("/settings", get(settings::get_settings))
        .route("/settings/power_optimization", post(settings::set_power_optimization))
        .route("/status", get(status::get_status))
        .route("/debug", get(status::get_debug))
        .route("/debug/power_override", post(status::set_power_override))
        .route("/control/run", post(status::run_control))
        .route("/tariff_modes", get(entities::get_tariff_modes))
        .route("/states/:entity_id", get(entities::get_entity_state))
}

pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.cfg.server.request_timeout_secs.max(1));

    Router::new()
        .nest("/api", api_routes())
        .route("/healthz", get(health::health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024))
                .layer(TimeoutLayer::new(timeout)),
        )
        .layer(TraceLayer::new_for_http())
}
