//! Lenient coercion of form-submitted records.
//!
//! Browsers post numbers as strings and empty inputs as `""`. Everything in here turns
//! such payloads into typed records; the rest of the crate only sees `Device` and
//! `Battery` with real numeric fields.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use super::{Battery, Device};
use crate::domain::device::{DEFAULT_MIN_OFF_TIME_SECS, DEFAULT_MIN_ON_TIME_SECS};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record must be a JSON object")]
    NotAnObject,
    #[error("missing or invalid field: {0}")]
    Missing(&'static str),
    #[error("validation failed: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// Numeric types a form field can be coerced into.
pub trait FormNumber: Sized {
    fn from_json_number(n: &serde_json::Number) -> Option<Self>;
    fn parse_text(s: &str) -> Option<Self>;
}

impl FormNumber for f64 {
    fn from_json_number(n: &serde_json::Number) -> Option<Self> {
        n.as_f64()
    }
    fn parse_text(s: &str) -> Option<Self> {
        s.parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

impl FormNumber for i64 {
    fn from_json_number(n: &serde_json::Number) -> Option<Self> {
        n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|v| v.fract() == 0.0 && v.abs() < i64::MAX as f64)
                .map(|v| v as i64)
        })
    }
    fn parse_text(s: &str) -> Option<Self> {
        s.parse::<i64>().ok()
    }
}

impl FormNumber for u64 {
    fn from_json_number(n: &serde_json::Number) -> Option<Self> {
        i64::from_json_number(n).and_then(|v| u64::try_from(v).ok())
    }
    fn parse_text(s: &str) -> Option<Self> {
        s.parse::<u64>().ok()
    }
}

/// Coerce a raw field into `T`.
///
/// Missing, `null` and empty strings give `None`, as does anything that fails to
/// parse. Never errors.
pub fn safe_convert<T: FormNumber>(value: Option<&Value>) -> Option<T> {
    match value? {
        Value::Number(n) => T::from_json_number(n),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                T::parse_text(s)
            }
        }
        _ => None,
    }
}

fn opt_string(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// RFC 3339 timestamp; anything else is treated as absent.
fn opt_time(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    opt_string(obj, key)?.parse().ok()
}

fn form_bool(obj: &Map<String, Value>, key: &str) -> bool {
    match obj.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "on" | "1" | "yes"
        ),
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// Build a `Device` from a submitted object. Unknown and legacy keys are ignored.
pub fn device_from_value(value: &Value) -> Result<Device, RecordError> {
    let obj = value.as_object().ok_or(RecordError::NotAnObject)?;

    let name = opt_string(obj, "name").ok_or(RecordError::Missing("name"))?;
    let switch_entity =
        opt_string(obj, "switch_entity").ok_or(RecordError::Missing("switch_entity"))?;
    let typical_power_draw =
        safe_convert::<f64>(obj.get("typical_power_draw"))
            .ok_or(RecordError::Missing("typical_power_draw"))?;

    let device = Device {
        name,
        switch_entity,
        typical_power_draw,
        current_power_sensor: opt_string(obj, "current_power_sensor"),
        energy_sensor: opt_string(obj, "energy_sensor"),
        power_delivery_sensor: opt_string(obj, "power_delivery_sensor"),
        has_variable_amperage: form_bool(obj, "has_variable_amperage"),
        min_amperage: safe_convert(obj.get("min_amperage")),
        max_amperage: safe_convert(obj.get("max_amperage")),
        variable_amperage_control: opt_string(obj, "variable_amperage_control"),
        min_on_time: safe_convert(obj.get("min_on_time")).unwrap_or(DEFAULT_MIN_ON_TIME_SECS),
        min_off_time: safe_convert(obj.get("min_off_time")).unwrap_or(DEFAULT_MIN_OFF_TIME_SECS),
        run_once: form_bool(obj, "run_once"),
        completion_sensor: opt_string(obj, "completion_sensor"),
        order: safe_convert(obj.get("order")).unwrap_or(0),
        energy_delivered_today: safe_convert(obj.get("energy_delivered_today")).unwrap_or(0.0),
        last_power_update: opt_time(obj, "last_power_update"),
        last_dawn_reset: opt_time(obj, "last_dawn_reset"),
        min_daily_power: safe_convert(obj.get("min_daily_power")),
    };
    device.validate()?;
    Ok(device)
}

pub fn battery_from_value(value: &Value) -> Result<Battery, RecordError> {
    let obj = value.as_object().ok_or(RecordError::NotAnObject)?;

    let battery = Battery {
        size_kwh: safe_convert(obj.get("size_kwh")).ok_or(RecordError::Missing("size_kwh"))?,
        battery_percent_entity: opt_string(obj, "battery_percent_entity")
            .ok_or(RecordError::Missing("battery_percent_entity"))?,
        max_charging_speed_kw: safe_convert(obj.get("max_charging_speed_kw")),
        expected_kwh_per_hour: safe_convert(obj.get("expected_kwh_per_hour")),
        bring_forward_mode: form_bool(obj, "bring_forward_mode"),
    };
    battery.validate()?;
    Ok(battery)
}
