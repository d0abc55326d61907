//! Intake queue: accepts upgraded WebSocket sessions, assigns ids, and
//! dispatches each to a worker from a fixed pool. Backpressure is the bound
//! on the channel itself — no unbounded queue.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, WebSocket};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::session;

/// One pending connection, handed from the axum handler to a worker task.
pub struct IntakeRequest {
    pub id: u64,
    pub socket: WebSocket,
    pub query: HashMap<String, String>,
    pub completion: oneshot::Sender<bool>,
}

/// Enqueue an accepted socket. On failure (queue full/closed), attempt a
/// clean close with `InternalServerError` and resolve `completion=false`.
pub async fn enqueue(
    tx: &mpsc::Sender<IntakeRequest>,
    id: u64,
    mut socket: WebSocket,
    query: HashMap<String, String>,
) -> oneshot::Receiver<bool> {
    let (completion_tx, completion_rx) = oneshot::channel();
    let request = IntakeRequest { id, socket, query, completion: completion_tx };

    if let Err(mpsc::error::TrySendError::Full(request) | mpsc::error::TrySendError::Closed(request)) =
        tx.try_send(request)
    {
        socket = request.socket;
        warn!(id, "intake queue full or closed; rejecting connection");
        close_internal_error(&mut socket).await;
        let _ = request.completion.send(false);
    }

    completion_rx
}

async fn close_internal_error(socket: &mut WebSocket) {
    let _ = socket
        .send(axum::extract::ws::Message::Close(Some(CloseFrame {
            code: 1011,
            reason: "internal server error".into(),
        })))
        .await;
}

/// Spawn a fixed pool of workers draining `rx`, each running one session to
/// completion at a time before picking up the next pending request.
pub fn spawn_workers(
    pool_size: usize,
    rx: mpsc::Receiver<IntakeRequest>,
    config: Arc<GatewayConfig>,
    cancel_rx: watch::Receiver<bool>,
) {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    for worker_id in 0..pool_size {
        let rx = rx.clone();
        let config = config.clone();
        let cancel_rx = cancel_rx.clone();
        tokio::spawn(async move {
            loop {
                let request = {
                    let mut guard = rx.lock().await;
                    guard.recv().await
                };
                let Some(request) = request else {
                    info!(worker_id, "intake worker shutting down: queue closed");
                    break;
                };
                run_one(request, &config, cancel_rx.clone()).await;
            }
        });
    }
}

async fn run_one(request: IntakeRequest, config: &Arc<GatewayConfig>, cancel_rx: watch::Receiver<bool>) {
    let IntakeRequest { id, socket, query, completion } = request;
    info!(id, "session accepted");
    if let Err(e) = session::run(id, socket, query, config.clone(), cancel_rx, completion).await {
        error!(id, kind = %e.kind(), error = %e, "session ended with error");
    }
}
