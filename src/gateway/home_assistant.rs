use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{EntityState, GatewayError, GatewayResult, HistoryPoint, SensorGateway};
use crate::config::HomeAssistantConfig;

/// REST client for the Home Assistant core API.
#[derive(Clone)]
pub struct HomeAssistantGateway {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HomeAssistantGateway {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> GatewayResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                "solar-surplus-controller/",
                env!("CARGO_PKG_VERSION")
            )),
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        let token = token.filter(|t| !t.trim().is_empty());
        if token.is_none() {
            warn!("no Home Assistant token configured; every reading will fall back to defaults");
        }

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    pub fn from_config(cfg: &HomeAssistantConfig) -> GatewayResult<Self> {
        info!(base_url = %cfg.base_url, "initializing Home Assistant gateway");
        Self::new(
            cfg.base_url.clone(),
            cfg.token.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    fn token(&self) -> GatewayResult<&str> {
        self.token
            .as_deref()
            .ok_or_else(|| GatewayError::Unavailable("no access token configured".into()))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> GatewayResult<T> {
        let resp = request.bearer_auth(self.token()?).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        match status {
            s if s.is_success() => {
                serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                error!(status = %status, "Home Assistant rejected the access token");
                Err(GatewayError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
            _ => Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawState {
    entity_id: String,
    state: String,
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default)]
    last_changed: Option<DateTime<Utc>>,
}

impl From<RawState> for EntityState {
    fn from(raw: RawState) -> Self {
        let unit = raw
            .attributes
            .get("unit_of_measurement")
            .and_then(Value::as_str)
            .map(str::to_string);
        EntityState {
            entity_id: raw.entity_id,
            value: raw.state,
            unit,
            attributes: raw.attributes,
            last_changed: raw.last_changed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHistory {
    state: String,
    #[serde(default)]
    last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

#[async_trait]
impl SensorGateway for HomeAssistantGateway {
    async fn read_state(&self, entity_id: &str) -> GatewayResult<EntityState> {
        let url = format!("{}/api/states/{}", self.base_url, entity_id);
        debug!(entity = entity_id, "reading entity state");
        let raw: RawState = self.get_json(self.client.get(url)).await?;
        Ok(raw.into())
    }

    async fn read_history(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> GatewayResult<Vec<HistoryPoint>> {
        let url = format!(
            "{}/api/history/period/{}",
            self.base_url,
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let request = self.client.get(url).query(&[("filter_entity_id", entity_id)]);
        let series: Vec<Vec<RawHistory>> = self.get_json(request).await?;

        let mut points: Vec<HistoryPoint> = series
            .into_iter()
            .flatten()
            .filter_map(|h| {
                let timestamp = h.last_changed.or(h.last_updated)?;
                Some(HistoryPoint {
                    timestamp,
                    value: h.state,
                })
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        debug!(entity = entity_id, points = points.len(), "history loaded");
        Ok(points)
    }

    async fn call_service(
        &self,
        domain: &str,
        action: &str,
        entity_id: &str,
        params: Map<String, Value>,
    ) -> bool {
        let token = match self.token() {
            Ok(t) => t,
            Err(e) => {
                warn!(domain, action, entity = entity_id, error = %e, "service call skipped");
                return false;
            }
        };

        let mut body = params;
        body.insert("entity_id".into(), Value::String(entity_id.to_string()));
        let url = format!("{}/api/services/{}/{}", self.base_url, domain, action);

        match self.client.post(url).bearer_auth(token).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(domain, action, entity = entity_id, "service call succeeded");
                true
            }
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                error!(
                    domain,
                    action,
                    entity = entity_id,
                    status = %status,
                    body = %text,
                    "service call rejected"
                );
                false
            }
            Err(e) => {
                error!(domain, action, entity = entity_id, error = %e, "service call failed");
                false
            }
        }
    }
}
