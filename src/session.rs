//! Ties the token envelope, argument merger, handshake driver and tunnel
//! together into one session's lifecycle, from intake to teardown.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::protocol::{args, handshake};
use crate::token;
use crate::tunnel;

/// Run one session end to end. `completion` is resolved exactly once, with
/// `true` the instant the handshake reaches `ready` (relaying is reached),
/// `false` on any earlier failure — never both, never neither.
///
/// Returns `Err` for logging purposes only; the completion signal has
/// already been resolved by the time this returns.
pub async fn run(
    id: u64,
    mut socket: WebSocket,
    query: HashMap<String, String>,
    config: Arc<GatewayConfig>,
    cancel_rx: watch::Receiver<bool>,
    completion: oneshot::Sender<bool>,
) -> Result<(), GatewayError> {
    match establish(id, &query, &config).await {
        Ok((daemon, handshake)) => {
            let _ = completion.send(true);
            info!(id, "handshake complete, entering relay");
            tunnel::run_tunnel(id, socket, daemon, handshake, &config, cancel_rx).await
        }
        Err(e) => {
            let _ = completion.send(false);
            close_with(&mut socket, e.close_code(), &e.to_string()).await;
            Err(e)
        }
    }
}

/// Authenticate the token, merge arguments, connect to `guacd`, and drive
/// the handshake to `ready`. No TCP connection is attempted until the token
/// and merged arguments are valid (S6).
async fn establish(
    id: u64,
    query: &HashMap<String, String>,
    config: &GatewayConfig,
) -> Result<(TcpStream, crate::protocol::handshake::HandshakeOutcome), GatewayError> {
    let token_str = query
        .get("token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GatewayError::BadToken("missing 'token' query parameter".to_owned()))?;

    let descriptor = token::decrypt(&config.password, token_str)?;
    let merged = args::merge_arguments(&descriptor.conn_type, &descriptor.arguments, &config.client, query)?;

    info!(id, conn_type = %descriptor.conn_type, "token decrypted, connecting to guacd");

    let daemon_ip = resolve_daemon_host(&config.guacd.hostname).await?;
    let daemon_addr = SocketAddr::new(daemon_ip, config.guacd.port);
    let mut daemon = TcpStream::connect(daemon_addr)
        .await
        .map_err(|e| GatewayError::Handshake(format!("connect to guacd {daemon_addr} failed: {e}")))?;

    let handshake = handshake::drive_handshake(&mut daemon, &descriptor.conn_type, &merged, config.guacd.timeout)
        .await
        .inspect_err(|_| warn!(id, "handshake with guacd failed"))?;

    Ok((daemon, handshake))
}

/// IP literal fast path; otherwise resolve to the first IPv4 address.
async fn resolve_daemon_host(hostname: &str) -> Result<IpAddr, GatewayError> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((hostname, 0))
        .await
        .map_err(|e| GatewayError::Handshake(format!("resolving guacd host '{hostname}' failed: {e}")))?;
    addrs
        .find_map(|a| match a.ip() {
            IpAddr::V4(v4) => Some(IpAddr::V4(v4)),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| GatewayError::Handshake(format!("no IPv4 address found for '{hostname}'")))
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code, reason: reason.to_owned().into() })))
        .await;
}
