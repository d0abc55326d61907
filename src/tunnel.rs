//! Per-connection tunnel: relays Guacamole instructions between the browser
//! WebSocket and the `guacd` TCP socket until one side gives up, with
//! shutdown, timeout and disconnect semantics.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::{ErrorKind, GatewayError};
use crate::protocol::codec::InstructionReader;
use crate::protocol::handshake::HandshakeOutcome;

/// Drive the relay to completion, then close the WebSocket with the close
/// code matching the terminal condition. Always returns `Ok(())` — by the
/// time this runs, the intake completion signal has already resolved `true`
/// and there is nothing left for the caller to propagate.
///
/// `handshake` carries the handshake driver's `InstructionReader` (which may
/// still hold an unconsumed partial remainder) and any instructions already
/// parsed past `ready` from the same `read()` — both must feed into this
/// relay rather than be dropped, or guacd's first post-`ready` instructions
/// (commonly `sync`) are silently lost.
pub async fn run_tunnel(
    id: u64,
    ws: WebSocket,
    daemon: TcpStream,
    handshake: HandshakeOutcome,
    config: &GatewayConfig,
    mut cancel_rx: watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    let HandshakeOutcome { ready, reader: mut daemon_reader, pending } = handshake;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let ready_text = String::from_utf8(ready.encode())
        .map_err(|e| GatewayError::Internal(format!("ready instruction was not UTF-8: {e}")))?;
    if ws_tx.send(Message::Text(ready_text.into())).await.is_err() {
        return Ok(());
    }

    // Flush instructions guacd packed in behind `ready` before entering the
    // relay loop, preserving their order relative to everything after.
    for instr in pending {
        let text = String::from_utf8(instr.encode())
            .map_err(|e| GatewayError::Internal(format!("instruction was not UTF-8: {e}")))?;
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            return Ok(());
        }
    }

    let (mut daemon_rx, mut daemon_tx) = daemon.into_split();
    let max_inactivity = config.websocket.max_inactivity;

    let mut client_reader = InstructionReader::new();
    let mut daemon_buf = [0u8; 8192];

    let outcome: Result<(), GatewayError> = 'relay: loop {
        tokio::select! {
            client_msg = tokio::time::timeout(max_inactivity, ws_rx.next()) => {
                match client_msg {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        let instructions = match client_reader.push(text.as_bytes()) {
                            Ok(i) => i,
                            Err(_) => break 'relay Err(GatewayError::Framing("client sent malformed instruction".to_owned())),
                        };
                        for instr in instructions {
                            let is_disconnect = instr.opcode() == "disconnect";
                            if daemon_tx.write_all(&instr.encode()).await.is_err() {
                                break 'relay Err(GatewayError::Internal("write to guacd failed".to_owned()));
                            }
                            if is_disconnect {
                                break 'relay Ok(());
                            }
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break 'relay Ok(()),
                    Ok(Some(Ok(_))) => {} // ignore ping/pong/binary frames
                    Ok(Some(Err(_))) => break 'relay Err(GatewayError::PeerClosed),
                    Err(_) => break 'relay Err(GatewayError::Timeout),
                }
            }
            daemon_read = tokio::time::timeout(max_inactivity, daemon_rx.read(&mut daemon_buf)) => {
                match daemon_read {
                    Ok(Ok(0)) => break 'relay Err(GatewayError::PeerClosed),
                    Ok(Ok(n)) => {
                        let instructions = match daemon_reader.push(&daemon_buf[..n]) {
                            Ok(i) => i,
                            Err(_) => break 'relay Err(GatewayError::Framing("guacd sent malformed instruction".to_owned())),
                        };
                        for instr in instructions {
                            let text = match String::from_utf8(instr.encode()) {
                                Ok(t) => t,
                                Err(e) => break 'relay Err(GatewayError::Internal(format!("instruction was not UTF-8: {e}"))),
                            };
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break 'relay Ok(());
                            }
                        }
                    }
                    Ok(Err(e)) => break 'relay Err(GatewayError::Internal(format!("read from guacd failed: {e}"))),
                    Err(_) => break 'relay Err(GatewayError::Timeout),
                }
            }
            _ = cancel_rx.changed() => break 'relay Err(GatewayError::Cancelled),
        }
    };

    log_outcome(id, &outcome);

    let close = match &outcome {
        Ok(()) => (1000, "session ended"),
        Err(e) => (e.close_code(), "session ended"),
    };
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame { code: close.0, reason: close.1.into() })))
        .await;

    Ok(())
}

fn log_outcome(id: u64, outcome: &Result<(), GatewayError>) {
    match outcome {
        Ok(()) => info!(id, "session closed: disconnect or client hangup"),
        Err(e) => match e.kind() {
            ErrorKind::Timeout => info!(id, "session closed: inactivity timeout"),
            ErrorKind::PeerClosed => info!(id, "session closed: peer disconnected"),
            ErrorKind::Cancelled => info!(id, "session closed: server shutdown"),
            ErrorKind::Framing => warn!(id, "session closed: framing violation"),
            _ => warn!(id, error = %e, "session closed unexpectedly"),
        },
    }
}
