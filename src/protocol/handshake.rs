//! Drives the `select`/`args`/`size|audio|video|image`/`connect`/`ready`
//! exchange with `guacd` on the client's behalf.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::codec::{encode_instruction, Instruction, InstructionReader};
use crate::error::GatewayError;

/// Configured defaults applied when the client supplied no display hints.
pub const DEFAULT_WIDTH: u32 = 1024;
pub const DEFAULT_HEIGHT: u32 = 768;
pub const DEFAULT_DPI: u32 = 96;

/// Everything the handshake produced that the tunnel must not lose: the
/// `ready` instruction itself, the `InstructionReader` that parsed it (which
/// may still hold an unconsumed partial remainder), and any further
/// instructions already fully parsed from the same `read()` that produced
/// `ready` — guacd routinely emits its first display/`sync` instructions
/// immediately afterward, and TCP coalescing means those bytes frequently
/// arrive before the handshake driver ever returns. Both must be carried
/// into the tunnel's relay loop rather than discarded at this boundary.
pub struct HandshakeOutcome {
    pub ready: Instruction,
    pub reader: InstructionReader,
    pub pending: Vec<Instruction>,
}

/// Drive the handshake to completion and return the `ready` instruction
/// (still unconsumed by the caller, who forwards it to the client verbatim)
/// together with the reader state and any instructions parsed past it.
/// Fails with `GatewayError::Handshake` on any framing violation, unexpected
/// opcode, socket error, or overall timeout.
pub async fn drive_handshake<S>(
    daemon: &mut S,
    conn_type: &str,
    merged_args: &HashMap<String, String>,
    timeout: Duration,
) -> Result<HandshakeOutcome, GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::time::timeout(timeout, drive_handshake_inner(daemon, conn_type, merged_args))
        .await
        .map_err(|_| GatewayError::Handshake("timed out waiting for guacd".to_owned()))?
}

async fn drive_handshake_inner<S>(
    daemon: &mut S,
    conn_type: &str,
    merged_args: &HashMap<String, String>,
) -> Result<HandshakeOutcome, GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = InstructionReader::new();
    let mut pending: Vec<Instruction> = Vec::new();

    // 1. select
    send(daemon, "select", &[conn_type]).await?;

    // 2. args
    let args_instr = recv_one(daemon, &mut reader, &mut pending).await?;
    if args_instr.opcode() != "args" {
        return Err(GatewayError::Handshake(format!(
            "expected 'args', got '{}'",
            args_instr.opcode()
        )));
    }
    let param_names: Vec<String> = args_instr.args().to_vec();

    // 3. client info: size, audio, video, image
    let width = parse_or_default(merged_args.get("width"), DEFAULT_WIDTH);
    let height = parse_or_default(merged_args.get("height"), DEFAULT_HEIGHT);
    let dpi = parse_or_default(merged_args.get("dpi"), DEFAULT_DPI);
    send(
        daemon,
        "size",
        &[&width.to_string(), &height.to_string(), &dpi.to_string()],
    )
    .await?;
    send_list(daemon, "audio", merged_args.get("audio")).await?;
    send_list(daemon, "video", merged_args.get("video")).await?;
    send_list(daemon, "image", merged_args.get("image")).await?;

    // 4. connect — positional alignment with the names guacd asked for.
    // The first parameter name is a protocol-version sentinel (e.g.
    // "VERSION_1_3_0"), echoed back verbatim; the rest are real argument
    // names looked up in the merged map, missing keys becoming "".
    let connect_args: Vec<String> = param_names
        .iter()
        .map(|name| {
            if name.starts_with("VERSION_") {
                name.clone()
            } else {
                merged_args.get(name).cloned().unwrap_or_default()
            }
        })
        .collect();
    let connect_refs: Vec<&str> = connect_args.iter().map(String::as_str).collect();
    send(daemon, "connect", &connect_refs).await?;

    // 5. ready
    let ready = recv_one(daemon, &mut reader, &mut pending).await?;
    if ready.opcode() != "ready" {
        return Err(GatewayError::Handshake(format!(
            "expected 'ready', got '{}'",
            ready.opcode()
        )));
    }

    Ok(HandshakeOutcome { ready, reader, pending })
}

fn parse_or_default(value: Option<&String>, default: u32) -> u32 {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// `size,<width>,<height>,<dpi>` splits on commas in `merged_args`; `audio`,
/// `video`, `image` are each a single comma-separated list value or absent.
async fn send_list<S>(daemon: &mut S, opcode: &str, value: Option<&String>) -> Result<(), GatewayError>
where
    S: AsyncWrite + Unpin,
{
    let elements: Vec<&str> = match value {
        Some(v) if !v.is_empty() => v.split(',').collect(),
        _ => Vec::new(),
    };
    send(daemon, opcode, &elements).await
}

async fn send<S>(daemon: &mut S, opcode: &str, args: &[&str]) -> Result<(), GatewayError>
where
    S: AsyncWrite + Unpin,
{
    let bytes = encode_instruction(opcode, args);
    daemon
        .write_all(&bytes)
        .await
        .map_err(|e| GatewayError::Handshake(format!("write to guacd failed: {e}")))
}

/// Return the next instruction, either already queued in `pending` from a
/// previous `push` that yielded more than one instruction, or freshly read
/// from `daemon`. Any instructions beyond the first parsed out of a single
/// `push` are appended to `pending` rather than discarded, since guacd is
/// free to pack several instructions (or an instruction plus the next
/// one's opening bytes) into one `read()`.
async fn recv_one<S>(
    daemon: &mut S,
    reader: &mut InstructionReader,
    pending: &mut Vec<Instruction>,
) -> Result<Instruction, GatewayError>
where
    S: AsyncRead + Unpin,
{
    if !pending.is_empty() {
        return Ok(pending.remove(0));
    }
    let mut buf = [0u8; 4096];
    loop {
        let n = daemon
            .read(&mut buf)
            .await
            .map_err(|e| GatewayError::Handshake(format!("read from guacd failed: {e}")))?;
        if n == 0 {
            return Err(GatewayError::Handshake("guacd closed during handshake".to_owned()));
        }
        let mut instrs = reader.push(&buf[..n]).map_err(|_| {
            GatewayError::Handshake("framing violation during handshake".to_owned())
        })?;
        if !instrs.is_empty() {
            let first = instrs.remove(0);
            pending.extend(instrs);
            return Ok(first);
        }
    }
}
