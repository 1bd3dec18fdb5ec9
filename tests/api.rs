#![cfg(feature = "sim")]
//! HTTP surface, driven through the router without a socket.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{Harness, TARIFF};
use serde_json::{json, Value};
use solar_surplus_controller::api;
use solar_surplus_controller::gateway::EntityState;
use tower::ServiceExt;

const SET_STATE: &str = "/api/devices/Boiler/set_state";
const OVERRIDE: &str = "/api/debug/power_override";

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn boiler_form() -> Value {
    json!({
        "name": "Boiler",
        "switch_entity": "switch.boiler",
        "typical_power_draw": "2000",
        "min_on_time": "0",
        "min_off_time": "",
        "run_once": "on"
    })
}

async fn setup() -> (Harness, Router) {
    let h = Harness::new().await;
    let app = api::router(h.state.clone());
    (h, app)
}

#[tokio::test]
async fn test_healthz() {
    let (_h, app) = setup().await;
    let (status, body) = send(&app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_add_device_coerces_form_values() {
    let (_h, app) = setup().await;

    let (status, body) = send(&app, "POST", "/api/devices", Some(boiler_form())).await;
    assert_eq!(status, StatusCode::CREATED);
    let device = &body["data"];
    assert_eq!(device["typical_power_draw"], 2000.0);
    assert_eq!(device["min_on_time"], 0);
    assert_eq!(device["min_off_time"], 60);
    assert_eq!(device["run_once"], true);
    assert_eq!(device["order"], 0);

    let (status, _) = send(&app, "POST", "/api/devices", Some(boiler_form())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        "POST",
        "/api/devices",
        Some(json!({"name": "Pool", "switch_entity": "switch.pool", "typical_power_draw": "lots"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");
}

#[tokio::test]
async fn test_list_is_sorted_by_priority() {
    let (_h, app) = setup().await;
    send(&app, "POST", "/api/devices", Some(boiler_form())).await;
    send(
        &app,
        "POST",
        "/api/devices",
        Some(json!({"name": "Pool", "switch_entity": "switch.pool", "typical_power_draw": 800})),
    )
    .await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/devices/reorder",
        Some(json!([
            {"name": "Pool", "order": 0},
            {"name": "Boiler", "order": 1},
            {"name": "Ghost", "order": 2}
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", "/api/devices", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Pool", "Boiler"]);
    assert_eq!(body["metadata"]["total_count"], 2);
    assert_eq!(body["data"][0]["is_on"], false);
}

#[tokio::test]
async fn test_update_keeps_order_unless_given() {
    let (_h, app) = setup().await;
    send(
        &app,
        "POST",
        "/api/devices",
        Some(json!({"name": "Pool", "switch_entity": "switch.pool", "typical_power_draw": 800})),
    )
    .await;
    send(&app, "POST", "/api/devices", Some(boiler_form())).await;

    let mut form = boiler_form();
    form["typical_power_draw"] = json!("2500");
    let (status, body) = send(&app, "PUT", "/api/devices/Boiler", Some(form)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["order"], 1);
    assert_eq!(body["data"]["typical_power_draw"], 2500.0);

    let mut form = boiler_form();
    form["order"] = json!("5");
    let (_, body) = send(&app, "PUT", "/api/devices/Boiler", Some(form)).await;
    assert_eq!(body["data"]["order"], 5);

    let (status, _) = send(&app, "PUT", "/api/devices/Ghost", Some(boiler_form())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_unknown_is_noop() {
    let (_h, app) = setup().await;
    send(&app, "POST", "/api/devices", Some(boiler_form())).await;

    let (status, body) = send(&app, "DELETE", "/api/devices/Ghost", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], false);

    let (_, body) = send(&app, "DELETE", "/api/devices/Boiler", None).await;
    assert_eq!(body["data"], true);
    let (status, _) = send(&app, "GET", "/api/devices/Boiler", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_switching() {
    let (h, app) = setup().await;
    h.gw.set_state("switch.boiler", "off").await;
    send(&app, "POST", "/api/devices", Some(boiler_form())).await;

    let (status, body) = send(&app, "POST", SET_STATE, Some(json!({"state": "on"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "on");
    assert!(h.switch_is_on("switch.boiler").await);

    let (_, body) = send(&app, "GET", "/api/devices/Boiler/state", None).await;
    assert_eq!(body["data"]["state"], "on");
    let (_, body) = send(&app, "GET", "/api/devices/Boiler", None).await;
    assert_eq!(body["data"]["is_on"], true);

    let (status, _) = send(&app, "POST", SET_STATE, Some(json!({"state": "dim"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    h.gw.reject_commands("switch.boiler").await;
    let (status, _) = send(&app, "POST", SET_STATE, Some(json!({"state": "off"}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_battery_record() {
    let (_h, app) = setup().await;
    let (_, body) = send(&app, "GET", "/api/battery", None).await;
    assert!(body["data"].is_null());

    let (status, body) = send(
        &app,
        "PUT",
        "/api/battery",
        Some(json!({
            "size_kwh": "10",
            "battery_percent_entity": "sensor.soc",
            "bring_forward_mode": "on"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["size_kwh"], 10.0);
    assert_eq!(body["data"]["bring_forward_mode"], true);

    let (_, body) = send(&app, "GET", "/api/battery", None).await;
    assert_eq!(body["data"]["battery_percent_entity"], "sensor.soc");

    let (status, _) = send(&app, "PUT", "/api/battery", Some(json!({"size_kwh": 10}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_config_patch() {
    let (_h, app) = setup().await;

    let (status, body) = send(
        &app,
        "PUT",
        "/api/config",
        Some(json!({"site_export_limit": 4000, "grid_power": null})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["site_export_limit"], 4000.0);
    assert!(body["data"]["grid_power"].is_null());
    assert_eq!(body["data"]["tariff_rate"], TARIFF);

    let (status, _) = send(&app, "PUT", "/api/config", Some(json!({"bogus": 1}))).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_tariff_modes_lists_entity_options() {
    let (h, app) = setup().await;
    h.gw.set_entity(
        EntityState::new(TARIFF, "normal")
            .with_attribute("options", json!(["normal", "cheap", "free", "peak"])),
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/tariff_modes", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["modes"], json!(["normal", "cheap", "free"]));
    assert_eq!(body["data"]["current_modes"]["cheap"], "cheap");
    assert_eq!(body["data"]["options"][3], "peak");
}

#[tokio::test]
async fn test_run_cycle_and_debug_snapshot() {
    let (h, app) = setup().await;
    let mut form = boiler_form();
    form["min_off_time"] = json!("0");
    send(&app, "POST", "/api/devices", Some(form)).await;
    h.gw.set_state("switch.boiler", "off").await;
    h.sun_up(true).await;
    h.grid(-300.0).await;

    let (_, body) = send(&app, "GET", "/api/debug", None).await;
    assert!(body["data"].is_null());

    let (status, body) = send(&app, "POST", OVERRIDE, Some(json!({"power": 2500}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], 2500.0);

    let (status, body) = send(&app, "POST", "/api/control/run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["available_power"], 2500.0);
    assert_eq!(body["data"]["manual_power_override"], 2500.0);
    assert!(body["metadata"]["duration_ms"].is_number());
    assert!(h.switch_is_on("switch.boiler").await);

    let (_, body) = send(&app, "GET", "/api/debug", None).await;
    assert_eq!(body["data"]["mode"], "solar");
    assert_eq!(body["data"]["optional_devices"][0]["reason"], "Turned on");

    let (_, body) = send(&app, "POST", OVERRIDE, Some(json!({"power": null}))).await;
    assert!(body["data"].is_null());
    let (status, _) = send(&app, "POST", OVERRIDE, Some(json!({"power": -5}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_and_settings() {
    let (_h, app) = setup().await;

    let (_, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(body["data"]["power_optimization_enabled"], true);
    assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["data"]["control_loop"]["run_count"], 0);

    let (status, body) = send(
        &app,
        "POST",
        "/api/settings/power_optimization",
        Some(json!({"enabled": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["power_optimization_enabled"], false);

    let (_, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(body["data"]["power_optimization_enabled"], false);
}

#[tokio::test]
async fn test_entity_state_passthrough() {
    let (h, app) = setup().await;
    h.gw.set_entity(EntityState::new("sensor.pv", "3.2").with_unit("kW")).await;

    let (status, body) = send(&app, "GET", "/api/states/sensor.pv", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["value"], "3.2");
    assert_eq!(body["data"]["unit"], "kW");

    let (status, _) = send(&app, "GET", "/api/states/sensor.nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    h.gw.make_unreachable("sensor.pv").await;
    let (status, _) = send(&app, "GET", "/api/states/sensor.pv", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
