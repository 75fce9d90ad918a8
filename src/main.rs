use std::net::SocketAddr;

use concept_mastery_service::config::Config;
use concept_mastery_service::logging::init_tracing;
use concept_mastery_service::{create_app, state_from_config};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let state = match state_from_config(&config).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, database_url = %config.database_url, "service initialization failed");
            std::process::exit(1);
        }
    };
    let store = state.store().clone();
    let shutdown = state.shutdown_token();

    tracing::info!(
        events_service = %config.events_service_url,
        max_attempts = config.retry.max_attempts,
        recompute_mode = ?config.recompute_mode,
        "mastery engine configured"
    );

    let app = create_app(state);

    let addr = config.bind_addr();
    tracing::info!(%addr, "concept-mastery-service listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind listener failed");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    store.close().await;
    tracing::info!("Graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
