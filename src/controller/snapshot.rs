use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ControlMode, TariffMode};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRationale {
    pub name: String,
    pub power: f64,
    pub reason: String,
}

/// Advisory forecast figures. Never gate switching.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ForecastSummary {
    /// kWh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solar_forecast_remaining: Option<f64>,
    /// kWh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_energy_remaining: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_until_sunset: Option<f64>,
    /// W
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bring_forward_power: Option<f64>,
}

/// What the last cycle saw and decided. Rebuilt from scratch every cycle.
///
/// `available_power` is infinite under a free tariff and serializes as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlSnapshot {
    pub timestamp: DateTime<Utc>,
    pub mode: ControlMode,
    pub tariff_mode: TariffMode,
    pub available_power: f64,
    pub grid_voltage: f64,
    pub grid_power: f64,
    pub power_optimization_enabled: bool,
    pub manual_power_override: Option<f64>,
    pub mandatory_devices: Vec<DeviceRationale>,
    pub optional_devices: Vec<DeviceRationale>,
    #[serde(flatten)]
    pub forecast: ForecastSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_serialized_shape() {
        let snapshot = ControlSnapshot {
            timestamp: Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap(),
            mode: ControlMode::Free,
            tariff_mode: TariffMode::Free,
            available_power: f64::INFINITY,
            grid_voltage: 230.0,
            grid_power: 150.0,
            power_optimization_enabled: true,
            manual_power_override: None,
            mandatory_devices: vec![],
            optional_devices: vec![DeviceRationale {
                name: "EV".into(),
                power: 3680.0,
                reason: "Free tariff, maximum draw".into(),
            }],
            forecast: ForecastSummary {
                hours_until_sunset: Some(3.5),
                ..Default::default()
            },
        };

        let v = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(v["mode"], "free");
        assert!(v["available_power"].is_null());
        assert_eq!(v["hours_until_sunset"], 3.5);
        assert!(v.get("bring_forward_power").is_none());
        assert_eq!(v["optional_devices"][0]["name"], "EV");
    }
}
