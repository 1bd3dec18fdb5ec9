pub mod decision;
pub mod engine;
pub mod forecast;
pub mod power;
pub mod runtime;
pub mod scheduler;
pub mod snapshot;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AppConfig;
use crate::gateway::{HomeAssistantGateway, SensorGateway};
use crate::publish::{NullPublisher, StatePublisher};
use crate::repo::Repositories;

pub use decision::{Decision, DecisionGroup, DecisionTable, Reason};
pub use engine::{ControlEngine, EngineOptions};
pub use runtime::{DailyEnergy, DeviceRuntimeState, DeviceView};
pub use scheduler::{CycleScheduler, CycleTask, TaskStatus};
pub use snapshot::{ControlSnapshot, DeviceRationale, ForecastSummary};

#[derive(Clone)]
pub struct AppState {
    pub cfg: AppConfig,
    pub engine: Arc<ControlEngine>,
    pub repos: Arc<Repositories>,
    pub gateway: Arc<dyn SensorGateway>,
    pub scheduler: Arc<CycleScheduler>,
    pub cycle_status: Arc<RwLock<TaskStatus>>,
    #[cfg(feature = "mqtt")]
    pub mqtt: Option<crate::publish::MqttPublisher>,
}

impl AppState {
    pub async fn new(cfg: AppConfig) -> Result<Self> {
        let repos = Arc::new(Repositories::new(&cfg.storage).await?);
        let gateway = build_gateway(&cfg)?;

        #[cfg(feature = "mqtt")]
        let (publisher, mqtt) = if cfg.mqtt.enabled {
            let (publisher, _driver) = crate::publish::MqttPublisher::start(&cfg.mqtt);
            (Arc::new(publisher.clone()) as Arc<dyn StatePublisher>, Some(publisher))
        } else {
            (Arc::new(NullPublisher) as Arc<dyn StatePublisher>, None)
        };
        #[cfg(not(feature = "mqtt"))]
        let publisher: Arc<dyn StatePublisher> = Arc::new(NullPublisher);

        let state = Self::with_parts(cfg, gateway, repos, publisher);
        #[cfg(feature = "mqtt")]
        let state = Self { mqtt, ..state };
        Ok(state)
    }

    /// Assemble from ready-made parts. Used by tests and simulations.
    pub fn with_parts(
        cfg: AppConfig,
        gateway: Arc<dyn SensorGateway>,
        repos: Arc<Repositories>,
        publisher: Arc<dyn StatePublisher>,
    ) -> Self {
        let opts = EngineOptions {
            history_lookback: chrono::Duration::hours(cfg.controller.history_lookback_hours.max(1)),
        };
        let engine = Arc::new(ControlEngine::new(gateway.clone(), repos.clone(), publisher, opts));
        let scheduler = Arc::new(CycleScheduler::new(
            engine.clone(),
            std::time::Duration::from_secs(cfg.controller.cycle_interval_secs.max(1)),
        ));
        let cycle_status = scheduler.status_handle();

        Self {
            cfg,
            engine,
            repos,
            gateway,
            scheduler,
            cycle_status,
            #[cfg(feature = "mqtt")]
            mqtt: None,
        }
    }
}

fn build_gateway(cfg: &AppConfig) -> Result<Arc<dyn SensorGateway>> {
    #[cfg(feature = "sim")]
    if cfg.home_assistant.simulate {
        info!("using simulated smart-home platform");
        return Ok(Arc::new(crate::gateway::SimulatedGateway::new()));
    }
    Ok(Arc::new(HomeAssistantGateway::from_config(&cfg.home_assistant)?))
}

/// Start the periodic control loop. Flip `shutdown` to stop it.
pub fn spawn_controller_tasks(state: &AppState, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    state.scheduler.clone().start(shutdown)
}
