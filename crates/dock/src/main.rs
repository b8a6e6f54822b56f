use anyhow::{Context, Result};
use camera_control::{CameraFleet, CameraRoster, PresetWorkflow, ReqwestTransport, Transport};
use dock::{config::DockConfig, routes, state::AppState};
use obs_session::{Session, WebSocketConnector};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = telemetry::init_with_service("booth-dock");

    let config = DockConfig::from_env()?;
    let roster = CameraRoster::load(&config.roster_path)
        .with_context(|| format!("failed to load roster {}", config.roster_path.display()))?;

    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.http_timeout)?);
    let fleet = CameraFleet::from_roster(&roster, transport, &config.controller)
        .context("invalid camera roster")?;

    let session = Session::spawn(config.session.clone(), Arc::new(WebSocketConnector));
    session.open()?;

    let state = AppState::new(fleet, PresetWorkflow::new(config.preset_settle), session.clone());
    let app = routes::router(state.clone());
    let listener = TcpListener::bind(config.bind_addr).await?;

    info!(
        addr = %config.bind_addr,
        cameras = state.fleet().len(),
        obs = %config.session.url,
        "booth-dock listening"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.dispose().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            let _ = sigterm.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
