use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::Device;

/// Energy delivered since the most recent dawn.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailyEnergy {
    pub delivered_wh: f64,
    pub last_update: Option<DateTime<Utc>>,
    pub last_dawn_reset: Option<DateTime<Utc>>,
}

impl DailyEnergy {
    /// Resume the counter stored on a device record.
    pub fn from_device(device: &Device) -> Self {
        Self {
            delivered_wh: device.energy_delivered_today.max(0.0),
            last_update: device.last_power_update,
            last_dawn_reset: device.last_dawn_reset,
        }
    }

    /// Integrate `power_w` over the time since the previous update.
    pub fn accumulate(&mut self, power_w: f64, now: DateTime<Utc>) {
        if let Some(prev) = self.last_update {
            let hours = (now - prev).num_milliseconds() as f64 / 3_600_000.0;
            if hours > 0.0 && power_w > 0.0 {
                self.delivered_wh += power_w * hours;
            }
        }
        self.last_update = Some(now);
    }

    /// Zero the counter if `sunrise` is newer than the last reset. Returns whether it reset.
    pub fn reset_on_dawn(&mut self, sunrise: DateTime<Utc>) -> bool {
        if self.last_dawn_reset.is_some_and(|prev| sunrise <= prev) {
            return false;
        }
        self.delivered_wh = 0.0;
        self.last_dawn_reset = Some(sunrise);
        // the next integration starts at sunrise, not at the pre-dawn sample
        if self.last_update.is_some_and(|prev| prev < sunrise) {
            self.last_update = Some(sunrise);
        }
        true
    }
}

/// What the controller believes about one device between cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRuntimeState {
    pub device: Device,
    pub is_on: bool,
    pub last_state_change: DateTime<Utc>,
    pub current_amperage: Option<f64>,
    /// Sticky: set once a run-once device reports completion
    pub has_completed: bool,
    pub energy: DailyEnergy,
}

impl DeviceRuntimeState {
    pub fn new(device: Device, now: DateTime<Utc>) -> Self {
        let energy = DailyEnergy::from_device(&device);
        Self {
            device,
            is_on: false,
            last_state_change: now,
            current_amperage: None,
            has_completed: false,
            energy,
        }
    }

    pub fn seconds_since_change(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_state_change).num_seconds()
    }

    pub fn min_on_time_pending(&self, now: DateTime<Utc>) -> bool {
        self.is_on && self.seconds_since_change(now) < self.device.min_on_time as i64
    }

    pub fn min_off_time_pending(&self, now: DateTime<Utc>) -> bool {
        !self.is_on && self.seconds_since_change(now) < self.device.min_off_time as i64
    }

    /// Record a confirmed transition.
    pub fn mark_switched(&mut self, on: bool, now: DateTime<Utc>) {
        if self.is_on != on {
            self.is_on = on;
            self.last_state_change = now;
        }
        if !on {
            self.current_amperage = None;
        }
    }

    /// Whether the counter moved away from what the stored record holds.
    pub fn energy_unsaved(&self) -> bool {
        self.device.energy_delivered_today != self.energy.delivered_wh
            || self.device.last_power_update != self.energy.last_update
            || self.device.last_dawn_reset != self.energy.last_dawn_reset
    }

    pub fn view(&self) -> DeviceView {
        let mut device = self.device.clone();
        device.energy_delivered_today = self.energy.delivered_wh;
        device.last_power_update = self.energy.last_update;
        device.last_dawn_reset = self.energy.last_dawn_reset;
        DeviceView {
            device,
            is_on: self.is_on,
            last_state_change: self.last_state_change,
            current_amperage: self.current_amperage,
            has_completed: self.has_completed,
        }
    }
}

/// Device record merged with its runtime state, as shown to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,
    pub is_on: bool,
    pub last_state_change: DateTime<Utc>,
    pub current_amperage: Option<f64>,
    pub has_completed: bool,
}
