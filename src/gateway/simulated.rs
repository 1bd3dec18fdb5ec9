use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{EntityState, GatewayError, GatewayResult, HistoryPoint, SensorGateway};

/// A service call as received by the simulated platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCall {
    pub domain: String,
    pub action: String,
    pub entity_id: String,
    pub params: Map<String, Value>,
}

#[derive(Debug, Default)]
struct SimState {
    entities: HashMap<String, EntityState>,
    history: HashMap<String, Vec<HistoryPoint>>,
    unreachable: HashSet<String>,
    rejecting: HashSet<String>,
    calls: Vec<ServiceCall>,
}

/// In-memory smart-home platform for dry runs and tests
///
/// Switch and number services mutate the targeted entity, so a controller driving this
/// gateway observes its own commands on the next read.
#[derive(Debug, Clone, Default)]
pub struct SimulatedGateway {
    state: Arc<RwLock<SimState>>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_entity(&self, entity: EntityState) {
        let mut st = self.state.write().await;
        st.entities.insert(entity.entity_id.clone(), entity);
    }

    pub async fn set_state(&self, entity_id: &str, value: impl Into<String>) {
        let mut st = self.state.write().await;
        let value = value.into();
        match st.entities.get_mut(entity_id) {
            Some(existing) => {
                existing.value = value;
                existing.last_changed = Some(Utc::now());
            }
            None => {
                let mut entity = EntityState::new(entity_id, value);
                entity.last_changed = Some(Utc::now());
                st.entities.insert(entity_id.to_string(), entity);
            }
        }
    }

    pub async fn push_history(
        &self,
        entity_id: &str,
        timestamp: DateTime<Utc>,
        value: impl Into<String>,
    ) {
        let mut st = self.state.write().await;
        let series = st.history.entry(entity_id.to_string()).or_default();
        series.push(HistoryPoint {
            timestamp,
            value: value.into(),
        });
        series.sort_by_key(|p| p.timestamp);
    }

    /// Make reads of `entity_id` fail as if the platform were unreachable.
    pub async fn make_unreachable(&self, entity_id: &str) {
        self.state.write().await.unreachable.insert(entity_id.to_string());
    }

    pub async fn make_reachable(&self, entity_id: &str) {
        self.state.write().await.unreachable.remove(entity_id);
    }

    /// Make service calls targeting `entity_id` fail.
    pub async fn reject_commands(&self, entity_id: &str) {
        self.state.write().await.rejecting.insert(entity_id.to_string());
    }

    pub async fn accept_commands(&self, entity_id: &str) {
        self.state.write().await.rejecting.remove(entity_id);
    }

    pub async fn calls(&self) -> Vec<ServiceCall> {
        self.state.read().await.calls.clone()
    }
}

fn apply_call(st: &mut SimState, call: &ServiceCall) {
    let new_value = match call.action.as_str() {
        "turn_on" => Some("on".to_string()),
        "turn_off" => Some("off".to_string()),
        "toggle" => {
            let on = st.entities.get(&call.entity_id).map(EntityState::is_on).unwrap_or(false);
            Some(if on { "off" } else { "on" }.to_string())
        }
        "set_value" => call.params.get("value").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        _ => None,
    };

    if let Some(value) = new_value {
        let entity = st
            .entities
            .entry(call.entity_id.clone())
            .or_insert_with(|| EntityState::new(call.entity_id.clone(), ""));
        entity.value = value;
        entity.last_changed = Some(Utc::now());
    }
}

#[async_trait]
impl SensorGateway for SimulatedGateway {
    async fn read_state(&self, entity_id: &str) -> GatewayResult<EntityState> {
        let st = self.state.read().await;
        if st.unreachable.contains(entity_id) {
            return Err(GatewayError::Unavailable(format!("simulated outage for {entity_id}")));
        }
        st.entities.get(entity_id).cloned().ok_or_else(|| GatewayError::Status {
            status: 404,
            body: format!("entity {entity_id} not found"),
        })
    }

    async fn read_history(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> GatewayResult<Vec<HistoryPoint>> {
        let st = self.state.read().await;
        if st.unreachable.contains(entity_id) {
            return Err(GatewayError::Unavailable(format!("simulated outage for {entity_id}")));
        }
        Ok(st
            .history
            .get(entity_id)
            .map(|series| series.iter().filter(|p| p.timestamp >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn call_service(
        &self,
        domain: &str,
        action: &str,
        entity_id: &str,
        params: Map<String, Value>,
    ) -> bool {
        let mut st = self.state.write().await;
        let call = ServiceCall {
            domain: domain.to_string(),
            action: action.to_string(),
            entity_id: entity_id.to_string(),
            params,
        };
        st.calls.push(call.clone());

        if st.rejecting.contains(entity_id) {
            debug!(domain, action, entity = entity_id, "simulated service call rejected");
            return false;
        }
        apply_call(&mut st, &call);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_switch_services_mutate_entity() {
        let gw = SimulatedGateway::new();
        gw.set_state("switch.boiler", "off").await;

        assert!(gw.call_service("switch", "turn_on", "switch.boiler", Map::new()).await);
        assert!(gw.read_is_on("switch.boiler").await.unwrap());

        assert!(gw.call_service("switch", "toggle", "switch.boiler", Map::new()).await);
        assert!(!gw.read_is_on("switch.boiler").await.unwrap());
        assert_eq!(gw.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_number_set_value() {
        let gw = SimulatedGateway::new();
        let mut params = Map::new();
        params.insert("value".into(), json!(13.0));
        assert!(gw.call_service("number", "set_value", "number.ev_amps", params).await);
        assert_eq!(gw.read_number("number.ev_amps").await.unwrap(), 13.0);
    }

    #[tokio::test]
    async fn test_failures() {
        let gw = SimulatedGateway::new();
        gw.set_state("sensor.grid", "-500").await;
        gw.make_unreachable("sensor.grid").await;
        assert!(gw.read_state("sensor.grid").await.unwrap_err().is_unavailable());
        gw.make_reachable("sensor.grid").await;
        assert_eq!(gw.read_power_w("sensor.grid").await.unwrap(), -500.0);

        assert!(matches!(
            gw.read_state("sensor.missing").await,
            Err(GatewayError::Status { status: 404, .. })
        ));

        gw.set_state("switch.ev", "off").await;
        gw.reject_commands("switch.ev").await;
        assert!(!gw.call_service("switch", "turn_on", "switch.ev", Map::new()).await);
        assert!(!gw.read_is_on("switch.ev").await.unwrap());
    }

    #[tokio::test]
    async fn test_history_window() {
        let gw = SimulatedGateway::new();
        let now = Utc::now();
        gw.push_history("sun.sun", now - chrono::Duration::hours(30), "above_horizon").await;
        gw.push_history("sun.sun", now - chrono::Duration::hours(2), "above_horizon").await;
        gw.push_history("sun.sun", now - chrono::Duration::hours(14), "below_horizon").await;

        let points = gw.read_history("sun.sun", now - chrono::Duration::hours(24)).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, "below_horizon");
        assert!(gw.read_history("sensor.none", now).await.unwrap().is_empty());
    }
}
