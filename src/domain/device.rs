use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub const DEFAULT_MIN_ON_TIME_SECS: u64 = 60;
pub const DEFAULT_MIN_OFF_TIME_SECS: u64 = 60;

fn default_min_on_time() -> u64 {
    DEFAULT_MIN_ON_TIME_SECS
}

fn default_min_off_time() -> u64 {
    DEFAULT_MIN_OFF_TIME_SECS
}

/// A switchable household load.
///
/// Records are kept in insertion order by the store; `order` is the priority used by
/// the controller (ascending = served first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_amperage_bounds"))]
pub struct Device {
    #[validate(length(min = 1, message = "device name must not be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "switch entity must not be empty"))]
    pub switch_entity: String,
    /// Nominal draw in watts
    #[validate(range(min = 0.0))]
    pub typical_power_draw: f64,
    #[serde(default)]
    pub current_power_sensor: Option<String>,
    #[serde(default)]
    pub energy_sensor: Option<String>,
    #[serde(default)]
    pub power_delivery_sensor: Option<String>,
    #[serde(default)]
    pub has_variable_amperage: bool,
    #[serde(default)]
    pub min_amperage: Option<f64>,
    #[serde(default)]
    pub max_amperage: Option<f64>,
    /// Number entity that accepts the charge current setpoint
    #[serde(default)]
    pub variable_amperage_control: Option<String>,
    #[serde(default = "default_min_on_time")]
    pub min_on_time: u64,
    #[serde(default = "default_min_off_time")]
    pub min_off_time: u64,
    #[serde(default)]
    pub run_once: bool,
    #[serde(default)]
    pub completion_sensor: Option<String>,
    #[serde(default)]
    pub order: i64,
    /// Wh delivered since the last dawn reset
    #[serde(default)]
    pub energy_delivered_today: f64,
    /// When `energy_delivered_today` was last integrated
    #[serde(default)]
    pub last_power_update: Option<DateTime<Utc>>,
    /// Sunrise the daily counter was last zeroed at
    #[serde(default)]
    pub last_dawn_reset: Option<DateTime<Utc>>,
    /// Daily energy floor in Wh, honoured in tariff windows only
    #[serde(default)]
    pub min_daily_power: Option<f64>,
}

fn validate_amperage_bounds(device: &Device) -> Result<(), ValidationError> {
    if !device.has_variable_amperage {
        return Ok(());
    }
    match (device.min_amperage, device.max_amperage) {
        (Some(min), Some(max)) if min >= 0.0 && min <= max => Ok(()),
        (Some(_), Some(_)) => Err(ValidationError::new("amperage_range")
            .with_message("min_amperage must be between 0 and max_amperage".into())),
        _ => Err(ValidationError::new("amperage_missing").with_message(
            "variable amperage devices need both min_amperage and max_amperage".into(),
        )),
    }
}

impl Device {
    pub fn new(
        name: impl Into<String>,
        switch_entity: impl Into<String>,
        typical_power_draw: f64,
    ) -> Self {
        Self {
            name: name.into(),
            switch_entity: switch_entity.into(),
            typical_power_draw,
            current_power_sensor: None,
            energy_sensor: None,
            power_delivery_sensor: None,
            has_variable_amperage: false,
            min_amperage: None,
            max_amperage: None,
            variable_amperage_control: None,
            min_on_time: DEFAULT_MIN_ON_TIME_SECS,
            min_off_time: DEFAULT_MIN_OFF_TIME_SECS,
            run_once: false,
            completion_sensor: None,
            order: 0,
            energy_delivered_today: 0.0,
            last_power_update: None,
            last_dawn_reset: None,
            min_daily_power: None,
        }
    }

    /// `(min, max)` amps, only for a complete variable-amperage configuration.
    pub fn amperage_bounds(&self) -> Option<(f64, f64)> {
        if !self.has_variable_amperage {
            return None;
        }
        match (self.min_amperage, self.max_amperage) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    /// Service domain of the switch entity (`switch.boiler` -> `switch`).
    pub fn switch_domain(&self) -> &str {
        self.switch_entity
            .split_once('.')
            .map(|(domain, _)| domain)
            .unwrap_or("switch")
    }

    /// Highest draw the device can be asked for at `voltage`.
    pub fn max_power(&self, voltage: f64) -> f64 {
        match self.amperage_bounds() {
            Some((_, max)) => max * voltage,
            None => self.typical_power_draw,
        }
    }
}
