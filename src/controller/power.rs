//! Numeric helpers of the allocation pass. Everything here is pure.

use crate::domain::Device;

/// Voltage assumed when none is configured or the sensor cannot be read.
pub const DEFAULT_GRID_VOLTAGE: f64 = 230.0;

/// Whole amps a variable-amperage device should run at for `available_power_w`.
///
/// `floor(clamp(available / voltage, min, max))`, never below `min`: a fractional
/// minimum is returned as is rather than floored under the floor. A selected device may
/// therefore draw up to its minimum even beyond the available power.
/// `None` for fixed-draw devices and for incomplete amperage configurations.
pub fn calculate_optimal_amperage(
    device: &Device,
    available_power_w: f64,
    voltage: f64,
) -> Option<f64> {
    let (min, max) = device.amperage_bounds()?;
    let raw = if voltage > 0.0 {
        available_power_w / voltage
    } else {
        0.0
    };
    Some(raw.max(min).min(max).floor().max(min))
}

/// Surplus in watts during daylight.
///
/// `grid_power_w` is negative while exporting. Power already going into controlled loads
/// counts as available since those loads may be re-allocated. Export beyond the site
/// limit is taken off the result.
pub fn solar_available_power(
    grid_power_w: f64,
    controlled_on_power_w: f64,
    site_export_limit_w: Option<f64>,
) -> f64 {
    let mut available = (-grid_power_w + controlled_on_power_w).max(0.0);
    if let Some(limit) = site_export_limit_w {
        let export = (-grid_power_w).max(0.0);
        if export > limit {
            available = (available - (export - limit)).max(0.0);
        }
    }
    available
}

/// Power a device will draw once set to `target_amperage`.
///
/// A running device is scaled from its measured consumption so sensor calibration
/// carries over; otherwise the nominal figure is used.
pub fn power_needed(
    device: &Device,
    is_on: bool,
    current_power_w: f64,
    current_amperage: Option<f64>,
    target_amperage: Option<f64>,
    voltage: f64,
) -> f64 {
    match target_amperage {
        Some(target) => match current_amperage {
            Some(current) if is_on && current > 0.0 && current_power_w > 0.0 => {
                current_power_w * target / current
            }
            _ => voltage * target,
        },
        None if is_on && current_power_w > 0.0 => current_power_w,
        None => device.typical_power_draw,
    }
}

/// Amperage and power for running a device flat out.
pub fn full_draw(device: &Device, voltage: f64) -> (Option<f64>, f64) {
    let amps = device.amperage_bounds().map(|(_, max)| max);
    (amps, device.max_power(voltage))
}
