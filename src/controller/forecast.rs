//! Battery and solar-forecast heuristics behind the bring-forward advisory.

use chrono::{DateTime, Utc};
use tracing::warn;

use super::snapshot::ForecastSummary;
use crate::config::ControlConfig;
use crate::domain::{is_full_enough, Battery};
use crate::gateway::{EntityState, SensorGateway};

/// Hours from `now` to the sun entity's `next_setting`, clamped at zero.
pub fn hours_until_sunset(sun: &EntityState, now: DateTime<Utc>) -> Option<f64> {
    let sunset = sun.attribute_time("next_setting")?;
    let hours = (sunset - now).num_seconds() as f64 / 3600.0;
    Some(hours.max(0.0))
}

/// Forecast solar minus expected house load and battery top-up, clamped at zero.
///
/// Without a battery, or without its hourly load figure, the raw forecast is returned.
pub fn expected_energy_remaining(
    forecast_kwh: Option<f64>,
    battery: Option<&Battery>,
    hours_until_sunset: f64,
    charging_requirement_kwh: Option<f64>,
) -> Option<f64> {
    let forecast = forecast_kwh?;
    let Some(per_hour) = battery.and_then(|b| b.expected_kwh_per_hour) else {
        return Some(forecast);
    };
    let house = per_hour * hours_until_sunset.max(0.0);
    Some((forecast - house - charging_requirement_kwh.unwrap_or(0.0)).max(0.0))
}

/// Watts that could be spent ahead of sunset without starving the battery.
pub fn bring_forward_power(
    battery: Option<&Battery>,
    full_enough: bool,
    expected_kwh: Option<f64>,
    hours_until_sunset: Option<f64>,
) -> Option<f64> {
    if !battery?.bring_forward_mode || !full_enough {
        return None;
    }
    let hours = hours_until_sunset.filter(|h| *h > 0.0)?;
    Some(expected_kwh? * 1000.0 / hours)
}

async fn read_charge_percent(gateway: &dyn SensorGateway, battery: &Battery) -> Option<f64> {
    match gateway.read_number(&battery.battery_percent_entity).await {
        Ok(pct) => Some(pct),
        Err(e) => {
            warn!(
                entity = %battery.battery_percent_entity,
                error = %e,
                "battery charge unavailable"
            );
            None
        }
    }
}

/// kWh needed to fill the battery; `None` without a battery or a reading.
pub async fn battery_charging_requirement(
    gateway: &dyn SensorGateway,
    battery: Option<&Battery>,
) -> Option<f64> {
    let battery = battery?;
    let pct = read_charge_percent(gateway, battery).await?;
    Some(battery.charging_requirement_kwh(pct))
}

/// True with no battery, above 95 %, or when the charge cannot be read.
pub async fn is_battery_full_enough(
    gateway: &dyn SensorGateway,
    battery: Option<&Battery>,
) -> bool {
    let Some(battery) = battery else {
        return true;
    };
    read_charge_percent(gateway, battery).await.map_or(true, is_full_enough)
}

/// Remaining solar production today in kWh, from the forecast entity.
pub async fn solar_forecast_remaining(
    gateway: &dyn SensorGateway,
    cfg: &ControlConfig,
) -> Option<f64> {
    let entity = cfg.solar_forecast.as_deref()?;
    let state = match gateway.read_state(entity).await {
        Ok(s) => s,
        Err(e) => {
            warn!(entity, error = %e, "solar forecast unavailable");
            return None;
        }
    };
    let value = state.as_f64().ok()?;
    match state.unit.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("wh") => Some(value / 1000.0),
        Some("mwh") => Some(value * 1000.0),
        _ => Some(value),
    }
}

/// Gather every advisory figure for the snapshot.
pub async fn summarize(
    gateway: &dyn SensorGateway,
    cfg: &ControlConfig,
    battery: Option<&Battery>,
    now: DateTime<Utc>,
) -> ForecastSummary {
    let hours = match gateway.read_state(&cfg.sun_entity).await {
        Ok(sun) => hours_until_sunset(&sun, now),
        Err(e) => {
            warn!(entity = %cfg.sun_entity, error = %e, "sun entity unavailable");
            None
        }
    };
    let forecast = solar_forecast_remaining(gateway, cfg).await;

    let requirement = battery_charging_requirement(gateway, battery).await;
    let full_enough = is_battery_full_enough(gateway, battery).await;

    let expected = expected_energy_remaining(forecast, battery, hours.unwrap_or(0.0), requirement);
    ForecastSummary {
        solar_forecast_remaining: forecast,
        expected_energy_remaining: expected,
        hours_until_sunset: hours,
        bring_forward_power: bring_forward_power(battery, full_enough, expected, hours),
    }
}
