use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::domain::TariffMode;

/// Process configuration, read once at start-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub home_assistant: HomeAssistantConfig,
    pub controller: ControllerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig { pub host: String, pub port: u16, pub request_timeout_secs: u64 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".into(), port: 5000, request_timeout_secs: 30 }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    pub base_url: String,
    /// Bearer token; without it every reading falls back to its default
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// Drive the in-memory platform instead of a real one
    pub simulate: bool,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://supervisor/core".into(),
            token: None,
            timeout_secs: 10,
            simulate: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub cycle_interval_secs: u64,
    /// How far back to look for the most recent sunrise
    pub history_lookback_hours: i64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { cycle_interval_secs: 60, history_lookback_hours: 24 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig { pub data_dir: PathBuf }

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("/data") }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    /// Write a daily rolling log file here as well as to stdout
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), json: false, directory: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "core-mosquitto".into(),
            port: 1883,
            username: None,
            password: None,
            client_id: "solar-surplus-controller".into(),
            topic_prefix: "solar_control".into(),
        }
    }
}

/// Add-on environment variables and the config keys they feed.
const ADDON_ENV: [(&str, &str); 4] = [
    ("SUPERVISOR_TOKEN", "home_assistant.token"),
    ("HASS_URL", "home_assistant.base_url"),
    ("DATA_DIR", "storage.data_dir"),
    ("PORT", "server.port"),
];

impl AppConfig {
    pub fn load() -> Result<Self> {
        let path = std::env::var("SOLAR_CONTROL_CONFIG")
            .unwrap_or_else(|_| "config/default.toml".into());
        Self::figment(&path).extract().context("invalid configuration")
    }

    pub fn figment(path: &str) -> Figment {
        let addon = Env::raw()
            .only(&ADDON_ENV.map(|(var, _)| var))
            .map(|key| {
                ADDON_ENV
                    .iter()
                    .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
                    .map(|(_, target)| *target)
                    .unwrap_or("unmapped")
                    .into()
            });

        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(addon)
            .merge(Env::prefixed("SOLAR_CONTROL__").split("__"))
    }
}

/// Entity wiring and tariff mapping, edited at runtime and re-read every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Grid power sensor, negative while exporting
    #[serde(default)]
    pub grid_power: Option<String>,
    #[serde(default)]
    pub grid_voltage: Option<String>,
    /// Fixed voltage, wins over the sensor
    #[serde(default)]
    pub grid_voltage_fixed: Option<f64>,
    #[serde(default)]
    pub tariff_rate: Option<String>,
    /// Tariff-rate state -> mode
    #[serde(default)]
    pub tariff_modes: BTreeMap<String, TariffMode>,
    /// Maximum export in watts
    #[serde(default)]
    pub site_export_limit: Option<f64>,
    /// Remaining solar production today, kWh
    #[serde(default)]
    pub solar_forecast: Option<String>,
    #[serde(default)]
    pub solar_generation: Option<String>,
    #[serde(default = "default_sun_entity")]
    pub sun_entity: String,
}

fn default_sun_entity() -> String {
    "sun.sun".into()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            grid_power: None,
            grid_voltage: None,
            grid_voltage_fixed: None,
            tariff_rate: None,
            tariff_modes: BTreeMap::new(),
            site_export_limit: None,
            solar_forecast: None,
            solar_generation: None,
            sun_entity: default_sun_entity(),
        }
    }
}

impl ControlConfig {
    /// Mode for a tariff-rate reading; unmapped rates are normal.
    pub fn tariff_mode_for(&self, rate: &str) -> TariffMode {
        self.tariff_modes.get(rate.trim()).copied().unwrap_or_default()
    }
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Field-wise update of [`ControlConfig`].
///
/// An absent key leaves the field alone, `null` clears it, a value replaces it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfigPatch {
    #[serde(default, deserialize_with = "double_option")]
    pub grid_power: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub grid_voltage: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub grid_voltage_fixed: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub tariff_rate: Option<Option<String>>,
    #[serde(default)]
    pub tariff_modes: Option<BTreeMap<String, TariffMode>>,
    #[serde(default, deserialize_with = "double_option")]
    pub site_export_limit: Option<Option<f64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub solar_forecast: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub solar_generation: Option<Option<String>>,
    #[serde(default)]
    pub sun_entity: Option<String>,
}

impl ControlConfigPatch {
    pub fn apply(self, cfg: &mut ControlConfig) {
        fn overlay<T>(slot: &mut Option<T>, patch: Option<Option<T>>) {
            if let Some(v) = patch {
                *slot = v;
            }
        }

        overlay(&mut cfg.grid_power, self.grid_power);
        overlay(&mut cfg.grid_voltage, self.grid_voltage);
        overlay(&mut cfg.grid_voltage_fixed, self.grid_voltage_fixed);
        overlay(&mut cfg.tariff_rate, self.tariff_rate);
        overlay(&mut cfg.site_export_limit, self.site_export_limit);
        overlay(&mut cfg.solar_forecast, self.solar_forecast);
        overlay(&mut cfg.solar_generation, self.solar_generation);
        if let Some(modes) = self.tariff_modes {
            cfg.tariff_modes = modes;
        }
        if let Some(sun) = self.sun_entity.filter(|s| !s.trim().is_empty()) {
            cfg.sun_entity = sun;
        }
    }
}

/// User toggles persisted next to the control configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "enabled")]
    pub power_optimization_enabled: bool,
}

fn enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self { power_optimization_enabled: true }
    }
}
