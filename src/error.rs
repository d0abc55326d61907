//! Error kinds shared across the gateway, matching the terminal outcomes a
//! session can have (see the error table in the design doc).

use std::fmt;

/// The seven terminal error kinds a session can end in.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("bad token: {0}")]
    BadToken(String),
    #[error("framing error: {0}")]
    Framing(String),
    #[error("handshake error: {0}")]
    Handshake(String),
    #[error("inactivity timeout")]
    Timeout,
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable, lower-cardinality name for `tracing` fields and tests; avoids
/// matching on the `Display` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadToken,
    Framing,
    Handshake,
    Timeout,
    PeerClosed,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::BadToken => "BadToken",
            ErrorKind::Framing => "Framing",
            ErrorKind::Handshake => "Handshake",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::PeerClosed => "PeerClosed",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::BadToken(_) => ErrorKind::BadToken,
            GatewayError::Framing(_) => ErrorKind::Framing,
            GatewayError::Handshake(_) => ErrorKind::Handshake,
            GatewayError::Timeout => ErrorKind::Timeout,
            GatewayError::PeerClosed => ErrorKind::PeerClosed,
            GatewayError::Cancelled => ErrorKind::Cancelled,
            GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The WebSocket close code a client should observe for this error.
    pub fn close_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::BadToken | ErrorKind::Handshake | ErrorKind::Internal => 1011, // Internal Error
            ErrorKind::Framing | ErrorKind::Timeout | ErrorKind::PeerClosed => 1000, // Normal
            ErrorKind::Cancelled => 1001, // Going Away
        }
    }
}
