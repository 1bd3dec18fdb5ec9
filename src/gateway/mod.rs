pub mod home_assistant;
#[cfg(feature = "sim")]
pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use home_assistant::HomeAssistantGateway;
#[cfg(feature = "sim")]
pub use simulated::SimulatedGateway;

/// Errors reading from or writing to the smart-home platform
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No credential configured, or the service cannot be reached at all
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed upstream payload: {0}")]
    Decode(String),
    #[error("entity {entity_id} has non-numeric state '{value}'")]
    InvalidValue { entity_id: String, value: String },
}

impl GatewayError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// One entity reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub value: String,
    pub unit: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub last_changed: Option<DateTime<Utc>>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            value: value.into(),
            unit: None,
            attributes: Map::new(),
            last_changed: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        let unit = unit.into();
        self.attributes
            .insert("unit_of_measurement".into(), Value::String(unit.clone()));
        self.unit = Some(unit);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn as_f64(&self) -> GatewayResult<f64> {
        self.value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| GatewayError::InvalidValue {
                entity_id: self.entity_id.clone(),
                value: self.value.clone(),
            })
    }

    /// Numeric state in watts, honouring a `kW` unit.
    pub fn power_watts(&self) -> GatewayResult<f64> {
        Ok(normalize_power(self.as_f64()?, self.unit.as_deref()))
    }

    pub fn is_on(&self) -> bool {
        self.value.trim().eq_ignore_ascii_case("on")
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    pub fn attribute_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.attribute_str(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Scale a power reading to watts. Absent unit means watts.
pub fn normalize_power(value: f64, unit: Option<&str>) -> f64 {
    match unit {
        Some(u) if u.trim().eq_ignore_ascii_case("kw") => value * 1000.0,
        _ => value,
    }
}

/// One historical state, oldest first in any returned list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub value: String,
}

/// Access to entity states and services of the smart-home platform.
///
/// Every call is fallible except `call_service`, which reports failure as `false` and
/// logs the cause so the control loop keeps going.
#[async_trait]
pub trait SensorGateway: Send + Sync {
    async fn read_state(&self, entity_id: &str) -> GatewayResult<EntityState>;

    async fn read_history(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> GatewayResult<Vec<HistoryPoint>>;

    async fn call_service(
        &self,
        domain: &str,
        action: &str,
        entity_id: &str,
        params: Map<String, Value>,
    ) -> bool;

    async fn read_number(&self, entity_id: &str) -> GatewayResult<f64> {
        self.read_state(entity_id).await?.as_f64()
    }

    async fn read_power_w(&self, entity_id: &str) -> GatewayResult<f64> {
        self.read_state(entity_id).await?.power_watts()
    }

    async fn read_is_on(&self, entity_id: &str) -> GatewayResult<bool> {
        Ok(self.read_state(entity_id).await?.is_on())
    }
}
