mod devices;
mod json;

pub use devices::{DeviceRepository, EnergyRecord, OrderUpdate};
pub use json::JsonFile;

use anyhow::{Context, Result};
use std::path::Path;
use thiserror::Error;

use crate::config::{ControlConfig, ControlConfigPatch, Settings, StorageConfig};
use crate::domain::Battery;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("record already exists: {0}")]
    Duplicate(String),
    #[error("invalid record: {0}")]
    Invalid(String),
}

/// The four record files the controller depends on, each loadable on its own.
#[derive(Debug)]
pub struct Repositories {
    pub devices: DeviceRepository,
    pub battery: JsonFile<Battery>,
    pub control: JsonFile<ControlConfig>,
    pub settings: JsonFile<Settings>,
}

impl Repositories {
    pub async fn new(cfg: &StorageConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&cfg.data_dir)
            .await
            .with_context(|| format!("cannot create data directory {}", cfg.data_dir.display()))?;
        Ok(Self::in_dir(&cfg.data_dir))
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self {
            devices: DeviceRepository::new(dir.join("devices.json")),
            battery: JsonFile::new(dir.join("battery.json")),
            control: JsonFile::new(dir.join("solar_config.json")),
            settings: JsonFile::new(dir.join("settings.json")),
        }
    }

    pub async fn load_battery(&self) -> Result<Option<Battery>, StoreError> {
        self.battery.load().await
    }

    pub async fn load_control_config(&self) -> Result<ControlConfig, StoreError> {
        Ok(self.control.load().await?.unwrap_or_default())
    }

    pub async fn update_control_config(
        &self,
        patch: ControlConfigPatch,
    ) -> Result<ControlConfig, StoreError> {
        self.control
            .update(|current| {
                let mut cfg = current.unwrap_or_default();
                patch.apply(&mut cfg);
                Ok((cfg.clone(), cfg))
            })
            .await
    }

    pub async fn load_settings(&self) -> Result<Settings, StoreError> {
        Ok(self.settings.load().await?.unwrap_or_default())
    }

    pub async fn set_power_optimization(&self, enabled: bool) -> Result<Settings, StoreError> {
        self.settings
            .update(|current| {
                let mut settings = current.unwrap_or_default();
                settings.power_optimization_enabled = enabled;
                Ok((settings.clone(), settings))
            })
            .await
    }
}
