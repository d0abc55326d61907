//! `/tunnel` WebSocket upgrade handler: extracts the query string, assigns a
//! session id, and hands the accepted socket to the intake queue.

use std::collections::HashMap;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use tracing::warn;

use crate::intake;
use crate::state::AppState;

pub async fn tunnel_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: AppState, query: HashMap<String, String>) {
    let id = state.next_session_id();
    let tx = state.intake_sender();
    let completion = intake::enqueue(&tx, id, socket, query).await;
    // The worker pool owns the socket from here on; wait only long enough to
    // log if the completion signal is ever dropped without resolving.
    if let Err(e) = completion.await {
        warn!(id, error = %e, "intake worker dropped completion signal without resolving it");
    }
}
