use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{JsonFile, StoreError};
use crate::domain::Device;

/// New priority for one device.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdate {
    pub name: String,
    pub order: i64,
}

/// Daily energy counter of one device, as written back by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyRecord {
    pub name: String,
    pub energy_delivered_today: f64,
    pub last_power_update: Option<DateTime<Utc>>,
    pub last_dawn_reset: Option<DateTime<Utc>>,
}

/// Device list kept in insertion order. Priority is the `order` field, not the position.
#[derive(Debug)]
pub struct DeviceRepository {
    file: JsonFile<Vec<Device>>,
}

impl DeviceRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { file: JsonFile::new(path) }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub async fn load_all(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.file.load().await?.unwrap_or_default())
    }

    pub async fn save_all(&self, devices: &[Device]) -> Result<(), StoreError> {
        self.file.save(&devices.to_vec()).await
    }

    pub async fn get(&self, name: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.load_all().await?.into_iter().find(|d| d.name == name))
    }

    /// Append a device behind the lowest current priority.
    pub async fn add(&self, mut device: Device) -> Result<Device, StoreError> {
        self.file
            .update(|current| {
                let mut devices = current.unwrap_or_default();
                if devices.iter().any(|d| d.name == device.name) {
                    return Err(StoreError::Duplicate(device.name.clone()));
                }
                device.order = devices.iter().map(|d| d.order + 1).max().unwrap_or(0);
                devices.push(device.clone());
                Ok((devices, device))
            })
            .await
            .inspect(|d| info!(device = %d.name, order = d.order, "device added"))
    }

    /// Replace the device called `name` in place. Renaming onto another device's name fails.
    pub async fn update(&self, name: &str, device: Device) -> Result<Device, StoreError> {
        self.file
            .update(|current| {
                let mut devices = current.unwrap_or_default();
                if device.name != name && devices.iter().any(|d| d.name == device.name) {
                    return Err(StoreError::Duplicate(device.name.clone()));
                }
                let slot = devices
                    .iter_mut()
                    .find(|d| d.name == name)
                    .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
                *slot = device.clone();
                Ok((devices, device))
            })
            .await
    }

    /// Returns whether a device was removed; unknown names are a no-op.
    pub async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let removed = self
            .file
            .update(|current| {
                let mut devices = current.unwrap_or_default();
                let before = devices.len();
                devices.retain(|d| d.name != name);
                let removed = devices.len() != before;
                Ok((devices, removed))
            })
            .await?;
        if removed {
            info!(device = name, "device deleted");
        }
        Ok(removed)
    }

    /// Store daily energy counters. Records for devices no longer present are dropped.
    pub async fn record_energy(&self, records: &[EnergyRecord]) -> Result<(), StoreError> {
        self.file
            .update(|current| {
                let mut devices = current.unwrap_or_default();
                for record in records {
                    if let Some(d) = devices.iter_mut().find(|d| d.name == record.name) {
                        d.energy_delivered_today = record.energy_delivered_today;
                        d.last_power_update = record.last_power_update;
                        d.last_dawn_reset = record.last_dawn_reset;
                    }
                }
                Ok((devices, ()))
            })
            .await
    }

    /// Apply new priorities; names that do not exist are ignored.
    pub async fn reorder(&self, updates: &[OrderUpdate]) -> Result<Vec<Device>, StoreError> {
        self.file
            .update(|current| {
                let mut devices = current.unwrap_or_default();
                for update in updates {
                    if let Some(d) = devices.iter_mut().find(|d| d.name == update.name) {
                        d.order = update.order;
                    }
                }
                let out = devices.clone();
                Ok((devices, out))
            })
            .await
    }
}
