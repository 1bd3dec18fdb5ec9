#![allow(dead_code)]
//! Shared fixtures: a controller wired to the simulated platform and temp-dir storage.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use solar_surplus_controller::config::{AppConfig, ControlConfig};
use solar_surplus_controller::controller::{AppState, ControlEngine, DeviceView};
use solar_surplus_controller::domain::{Device, TariffMode};
use solar_surplus_controller::gateway::SimulatedGateway;
use solar_surplus_controller::publish::RecordingPublisher;
use solar_surplus_controller::repo::Repositories;

pub const GRID: &str = "sensor.grid_power";
pub const SUN: &str = "sun.sun";
pub const TARIFF: &str = "sensor.tariff_rate";

pub struct Harness {
    _dir: TempDir,
    pub gw: SimulatedGateway,
    pub publisher: Arc<RecordingPublisher>,
    pub state: AppState,
}

impl Harness {
    /// Grid sensor and tariff entity wired, `"cheap"` and `"free"` mapped.
    pub async fn new() -> Self {
        let mut cfg = ControlConfig {
            grid_power: Some(GRID.into()),
            tariff_rate: Some(TARIFF.into()),
            ..Default::default()
        };
        cfg.tariff_modes.insert("cheap".into(), TariffMode::Cheap);
        cfg.tariff_modes.insert("free".into(), TariffMode::Free);
        Self::with_config(cfg).await
    }

    pub async fn with_config(cfg: ControlConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repos = Arc::new(Repositories::in_dir(dir.path()));
        repos.control.save(&cfg).await.unwrap();

        let gw = SimulatedGateway::new();
        gw.set_state(GRID, "0").await;
        gw.set_state(SUN, "below_horizon").await;
        gw.set_state(TARIFF, "normal").await;

        let publisher = Arc::new(RecordingPublisher::new());
        let state = AppState::with_parts(
            AppConfig::default(),
            Arc::new(gw.clone()),
            repos,
            publisher.clone(),
        );
        Self {
            _dir: dir,
            gw,
            publisher,
            state,
        }
    }

    pub fn engine(&self) -> &ControlEngine {
        &self.state.engine
    }

    /// A fresh process on the same store and platform: runtime state starts empty.
    pub fn restarted(&self) -> AppState {
        AppState::with_parts(
            AppConfig::default(),
            Arc::new(self.gw.clone()),
            self.state.repos.clone(),
            self.publisher.clone(),
        )
    }

    /// Store the device (priority = insertion order) and create its switch, off.
    pub async fn add_device(&self, device: Device) -> Device {
        self.gw.set_state(&device.switch_entity, "off").await;
        self.state.repos.devices.add(device).await.unwrap()
    }

    pub async fn sun_up(&self, up: bool) {
        self.gw.set_state(SUN, if up { "above_horizon" } else { "below_horizon" }).await;
    }

    /// Negative while exporting.
    pub async fn grid(&self, watts: f64) {
        self.gw.set_state(GRID, watts.to_string()).await;
    }

    pub async fn tariff(&self, rate: &str) {
        self.gw.set_state(TARIFF, rate).await;
    }

    pub async fn view(&self, name: &str) -> DeviceView {
        self.engine().get_device_states().await.remove(name).unwrap()
    }

    pub async fn switch_is_on(&self, entity: &str) -> bool {
        use solar_surplus_controller::gateway::SensorGateway;
        self.gw.read_is_on(entity).await.unwrap()
    }
}

/// A fixed-draw device without dwell times.
pub fn device(name: &str, watts: f64) -> Device {
    let entity = format!("switch.{}", name.to_lowercase().replace(' ', "_"));
    let mut d = Device::new(name, entity, watts);
    d.min_on_time = 0;
    d.min_off_time = 0;
    d
}

pub fn charger(name: &str, min: f64, max: f64) -> Device {
    let mut d = device(name, max * 230.0);
    d.has_variable_amperage = true;
    d.min_amperage = Some(min);
    d.max_amperage = Some(max);
    d.variable_amperage_control = Some(format!("number.{}_amps", name.to_lowercase()));
    d
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
}
