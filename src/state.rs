//! Process-wide shared state handed to every axum handler via
//! `axum::extract::State`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::GatewayConfig;
use crate::intake::IntakeRequest;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    intake_tx: mpsc::Sender<IntakeRequest>,
    next_id: Arc<AtomicU64>,
    cancel_rx: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        config: Arc<GatewayConfig>,
        intake_tx: mpsc::Sender<IntakeRequest>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self { config, intake_tx, next_id: Arc::new(AtomicU64::new(1)), cancel_rx }
    }

    /// Assign the next monotonically increasing session id.
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn intake_sender(&self) -> mpsc::Sender<IntakeRequest> {
        self.intake_tx.clone()
    }

    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }
}
