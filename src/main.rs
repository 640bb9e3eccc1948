// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use oidc_session_gateway::{
    api::router,
    auth::KeySetRefresher,
    config::{AuthConfig, ServerConfig, DEFAULT_LOG_FILTER},
    state::AppState,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let server = ServerConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });
    init_tracing(server.json_logs);

    let config = AuthConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Configuration error");
        std::process::exit(1);
    });
    tracing::info!(
        issuer = %config.issuer,
        client_id = %config.client_id,
        jwks_uri = %config.jwks_uri,
        cookie_secure = config.cookie_secure,
        "Starting OIDC session gateway"
    );

    let state = AppState::from_config(config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build HTTP client");
        std::process::exit(1);
    });

    // Warm the key set; the refresher keeps retrying if the provider is down.
    if let Err(e) = state.key_set().refresh().await {
        tracing::warn!(error = %e, "Initial key set fetch failed");
    }

    let shutdown = CancellationToken::new();
    let refresher = tokio::spawn(KeySetRefresher::new(state.key_set().clone()).run(shutdown.clone()));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(server.bind_addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(addr = %server.bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    tracing::info!(addr = %server.bind_addr, "Listening (docs at /docs)");

    let serve_shutdown = shutdown.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_shutdown.cancel();
        })
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    shutdown.cancel();
    let _ = refresher.await;
    tracing::info!("Server shutdown complete");
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
