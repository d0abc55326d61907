use std::env;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config = guac_gateway::config::load_config().expect("failed to load configuration");
    let port = config.websocket.port;
    let (router, cancel_tx) = guac_gateway::build_app(Arc::new(config));

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel_tx))
        .await
        .expect("server error");
    info!("gateway shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C, then broadcasts cancellation to every
/// in-flight session before returning to let `axum::serve` finish draining.
async fn shutdown_signal(cancel_tx: tokio::sync::watch::Sender<bool>) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }

    let _ = cancel_tx.send(true);
}
