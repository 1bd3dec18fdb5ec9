use anyhow::Result;
use solar_surplus_controller::{api, config::AppConfig, controller, telemetry};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = AppConfig::load()?;
    let _log_guard = telemetry::init_tracing(&cfg.logging);

    if cfg.home_assistant.simulate {
        warn!("running against the simulated platform, no real devices will be switched");
    }

    let app_state = controller::AppState::new(cfg.clone()).await?;
    let app = api::router(app_state.clone());
    let addr = cfg.server.socket_addr()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let control_loop = controller::spawn_controller_tasks(&app_state, shutdown_rx);

    info!(%addr, data_dir = %cfg.storage.data_dir.display(), "starting solar surplus controller");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = control_loop.await {
        warn!(error = %e, "control loop did not stop cleanly");
    }

    #[cfg(feature = "mqtt")]
    if let Some(mqtt) = &app_state.mqtt {
        mqtt.shutdown().await;
    }

    warn!("shutdown complete");
    Ok(())
}
