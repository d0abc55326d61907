pub mod config;
pub mod error;
pub mod intake;
pub mod protocol;
pub mod session;
pub mod state;
pub mod token;
pub mod tunnel;
pub mod ws;

pub use state::AppState;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::sync::{mpsc, watch};

use config::GatewayConfig;

/// Number of intake workers sharing the bounded accept queue.
const INTAKE_WORKERS: usize = 16;
const INTAKE_QUEUE_DEPTH: usize = 64;

/// Build the router and spawn the intake worker pool. Returns the router and
/// the `watch::Sender` the caller should drop (or send `true` on) to signal
/// every in-flight session to wind down.
pub fn build_app(config: Arc<GatewayConfig>) -> (Router, watch::Sender<bool>) {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (intake_tx, intake_rx) = mpsc::channel(INTAKE_QUEUE_DEPTH);

    intake::spawn_workers(INTAKE_WORKERS, intake_rx, config.clone(), cancel_rx.clone());

    let state = AppState::new(config, intake_tx, cancel_rx);
    let router = Router::new()
        .route("/tunnel", get(ws::tunnel_handler))
        .route("/healthz", get(healthz))
        .with_state(state);

    (router, cancel_tx)
}

async fn healthz() -> &'static str {
    "ok"
}
