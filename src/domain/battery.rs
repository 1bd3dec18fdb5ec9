use serde::{Deserialize, Serialize};
use validator::Validate;

/// Charge level above which surplus may be spent ahead of sunset.
pub const FULL_ENOUGH_PERCENT: f64 = 95.0;

/// Home battery, at most one per installation.
///
/// Rates are optional; a missing rate means "unknown" and never limits anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Battery {
    /// Usable capacity (kWh)
    #[validate(range(min = 0.0))]
    pub size_kwh: f64,
    /// Sensor reporting state of charge in percent
    #[validate(length(min = 1, message = "battery percentage entity is required"))]
    pub battery_percent_entity: String,
    #[serde(default)]
    pub max_charging_speed_kw: Option<f64>,
    /// Expected house consumption per hour, netted out of the solar forecast
    #[serde(default)]
    pub expected_kwh_per_hour: Option<f64>,
    /// Allow spending surplus early once the battery is nearly full (experimental)
    #[serde(default)]
    pub bring_forward_mode: bool,
}

impl Battery {
    pub fn new(size_kwh: f64, battery_percent_entity: impl Into<String>) -> Self {
        Self {
            size_kwh,
            battery_percent_entity: battery_percent_entity.into(),
            max_charging_speed_kw: None,
            expected_kwh_per_hour: None,
            bring_forward_mode: false,
        }
    }

    /// Energy still needed to reach 100% at the given charge level.
    pub fn charging_requirement_kwh(&self, charge_percent: f64) -> f64 {
        self.size_kwh * (100.0 - charge_percent) / 100.0
    }
}

pub fn is_full_enough(charge_percent: f64) -> bool {
    charge_percent > FULL_ENOUGH_PERCENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_optional_fields_default() {
        let b: Battery =
            serde_json::from_str(r#"{"size_kwh":5.0,"battery_percent_entity":"sensor.batt"}"#)
                .unwrap();
        assert!(b.max_charging_speed_kw.is_none());
        assert!(b.expected_kwh_per_hour.is_none());
        assert!(!b.bring_forward_mode);
    }

    #[test]
    fn test_round_trip() {
        let b = Battery {
            size_kwh: 13.5,
            battery_percent_entity: "sensor.batt_pct".into(),
            max_charging_speed_kw: Some(5.0),
            expected_kwh_per_hour: Some(0.4),
            bring_forward_mode: true,
        };
        let value = serde_json::to_value(&b).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "size_kwh": 13.5,
                "battery_percent_entity": "sensor.batt_pct",
                "max_charging_speed_kw": 5.0,
                "expected_kwh_per_hour": 0.4,
                "bring_forward_mode": true,
            })
        );
        let back: Battery = serde_json::from_value(value).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn test_charging_requirement() {
        let b = Battery::new(10.0, "sensor.batt");
        assert!((b.charging_requirement_kwh(80.0) - 2.0).abs() < 1e-9);
        assert_eq!(b.charging_requirement_kwh(100.0), 0.0);
    }

    #[rstest]
    #[case(96.0, true)]
    #[case(95.0, false)]
    #[case(90.0, false)]
    #[case(100.0, true)]
    fn test_full_enough_boundary(#[case] percent: f64, #[case] expected: bool) {
        assert_eq!(is_full_enough(percent), expected);
    }

    #[test]
    fn test_missing_entity_is_invalid() {
        assert!(Battery::new(10.0, "").validate().is_err());
    }
}
