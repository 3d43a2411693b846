// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use autotrader_server::{
    api::router,
    config::{AppConfig, LogFormat, DEFAULT_LOG_FILTER},
    scheduler::SessionHousekeeper,
    state::AppState,
};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() {
    init_tracing(LogFormat::from_env());

    let config = AppConfig::from_env();
    info!(config = ?config, "Starting autotrader server");

    if config.scheduler_secret.is_none() {
        warn!("SCHEDULER_SECRET unset: scheduler trigger will reject every request");
    }
    if config.owner_jwt_secret.is_none() {
        warn!("OWNER_JWT_SECRET unset: owner endpoints will reject every request");
    }
    if config.persistent_secret_key.is_none() {
        info!("PERSISTENT_SECRET_KEY unset: persistent credential tier disabled");
    }

    let state = AppState::from_config(&config).expect("Failed to initialize application state");

    let shutdown = CancellationToken::new();
    let housekeeper = SessionHousekeeper::new(
        state.custodian.clone(),
        config.housekeeping_interval,
        config.session_retention,
    );
    let housekeeping = tokio::spawn(housekeeper.run(shutdown.clone()));

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listener");
    info!(%addr, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    shutdown.cancel();
    if let Err(e) = housekeeping.await {
        warn!(error = %e, "Housekeeping task ended abnormally");
    }
    info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
