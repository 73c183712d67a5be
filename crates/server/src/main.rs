mod app;
mod config;

use anyhow::{Context, Result};
use app::AppState;
use config::Config;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use whatsbridge_link::{AuthMethod, StatusStore, Supervisor, SupervisorConfig};
use whatsbridge_whatsapp::api::GatewayEndpoint;
use whatsbridge_whatsapp::session::Session;
use whatsbridge_whatsapp::socket::EventSocket;
use whatsbridge_whatsapp::{GatewayApi, MessagingClient};

/// Exit status asking the service manager to start us again.
const RESTART_EXIT_CODE: u8 = 75;

const BACKGROUND_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(true) => {
            info!("Exiting for restart");
            ExitCode::from(RESTART_EXIT_CODE)
        }
        Ok(false) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Serves until shutdown. Returns whether a restart was requested.
async fn run() -> Result<bool> {
    let config = Config::load_or_default(&config::default_config_path());

    let endpoint = GatewayEndpoint::new(
        &config.gateway.base_url,
        &config.gateway.api_key,
        &config.gateway.instance,
    )
    .context("invalid gateway configuration")?;
    let client: Arc<dyn MessagingClient> = Arc::new(GatewayApi::new(endpoint.clone()));

    let session_path = config.session_path()?;
    let session = Session::load_or_new(&session_path, &config.gateway.instance);
    if session.is_paired() {
        info!("Found linked session in {}", session_path.display());
    }

    let status = StatusStore::new();
    let shutdown = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let socket = tokio::spawn(EventSocket::new(endpoint, event_tx).run(shutdown.clone()));

    let supervisor_config = SupervisorConfig {
        phone_number: config.whatsapp.phone_number.clone(),
        auth: if config.whatsapp.use_qr {
            AuthMethod::QrCode
        } else {
            AuthMethod::PairingCode
        },
    };
    let supervisor = Supervisor::new(client.clone(), status.clone(), supervisor_config)
        .with_session(session, session_path)
        .spawn(event_rx, shutdown.clone());

    let state = AppState::new(client, status, shutdown.clone());
    let router = app::router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    info!("WhatsApp Bot API listening on http://{}", config.server.bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                _ = signal.cancelled() => {}
            }
            signal.cancel();
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    for (name, handle) in [("event socket", socket), ("supervisor", supervisor)] {
        if tokio::time::timeout(BACKGROUND_GRACE, handle).await.is_err() {
            warn!("Timed out waiting for the {} to stop", name);
        }
    }

    info!("Server shutdown complete");
    Ok(state.restart_requested())
}
