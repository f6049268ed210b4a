//! Connection handshake.
//!
//! After the transport connects, the client performs a single exchange
//! before any command may be issued:
//!
//! 1. **hello**: a `Handshake`-opcode frame carrying
//!    `{"v":1,"client_id":"…"}`.
//! 2. **ready**: exactly one frame is read back. A `code` field means the
//!    server refused us (4000 is an unknown client id); otherwise the frame
//!    must be the `DISPATCH`/`READY` event announcing protocol version 1.
//!
//! The caller must not hand the read half to the dispatcher until
//! [`perform_handshake`] returns successfully.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

use crate::models::message::{
    Hello, Message, INVALID_CLIENT_ID_CODE, PROTOCOL_VERSION, READY_EVENT,
};
use crate::protocol::codec::{write_frame, Frame, FrameCodec, Opcode};
use crate::{AppError, Result};

/// Data carried by the READY dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadyInfo {
    /// Server-side configuration (`data.config`).
    pub config: Value,
    /// The logged-in user (`data.user`).
    pub user: Value,
}

/// Send the hello frame and wait for READY.
///
/// `timeout` bounds the wait for the server's reply; `None` waits
/// indefinitely.
///
/// # Errors
///
/// - [`AppError::InvalidClientId`]: the server answered with code 4000.
/// - [`AppError::ServerError`]: any other handshake error code.
/// - [`AppError::ProtocolVersionMismatch`]: READY announced `v != 1`.
/// - [`AppError::Protocol`]: the reply was not JSON or not READY.
/// - [`AppError::Timeout`]: no reply within `timeout`.
/// - [`AppError::ConnectionClosed`] / [`AppError::TruncatedFrame`]: the
///   channel closed before a full reply arrived.
pub async fn perform_handshake<R, W>(
    reader: &mut FramedRead<R, FrameCodec>,
    writer: &mut W,
    client_id: &str,
    timeout: Option<Duration>,
) -> Result<ReadyInfo>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let hello = Frame::json(Opcode::Handshake, &Hello::new(client_id))?;
    write_frame(writer, &hello).await?;
    debug!(client_id, "handshake: hello sent");

    let reply = match timeout {
        Some(limit) => tokio::time::timeout(limit, reader.next())
            .await
            .map_err(|_| {
                AppError::Timeout(format!("no handshake reply within {limit:?}"))
            })?,
        None => reader.next().await,
    };

    let frame = match reply {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Err(e),
        None => {
            return Err(AppError::ConnectionClosed(
                "server closed the channel during handshake".into(),
            ))
        }
    };

    let message: Message = frame.parse()?;
    let ready = interpret_reply(&message)?;
    info!(client_id, "handshake: READY received");
    Ok(ready)
}

/// Classify the single handshake reply.
///
/// # Errors
///
/// See [`perform_handshake`]; this is the part that does not touch I/O.
pub fn interpret_reply(message: &Message) -> Result<ReadyInfo> {
    if message.has_code() {
        let code = message.code();
        if code == Some(INVALID_CLIENT_ID_CODE) {
            return Err(AppError::InvalidClientId(
                message.text().unwrap_or_else(|| "client id rejected".into()),
            ));
        }
        return Err(AppError::ServerError(message.text().unwrap_or_else(|| {
            code.map_or_else(
                || "handshake refused".to_owned(),
                |c| format!("handshake refused with code {c}"),
            )
        })));
    }

    if !(message.is_dispatch() && message.evt() == Some(READY_EVENT)) {
        return Err(AppError::Protocol(format!(
            "expected DISPATCH/READY, got cmd={:?} evt={:?}",
            message.cmd, message.evt
        )));
    }

    let data = message.data.clone().unwrap_or(Value::Null);
    match data.get("v").and_then(Value::as_u64) {
        Some(PROTOCOL_VERSION) => {}
        other => {
            return Err(AppError::ProtocolVersionMismatch(format!(
                "server announced v={}, expected {PROTOCOL_VERSION}",
                other.map_or_else(|| "none".to_owned(), |v| v.to_string())
            )))
        }
    }

    Ok(ReadyInfo {
        config: data.get("config").cloned().unwrap_or(Value::Null),
        user: data.get("user").cloned().unwrap_or(Value::Null),
    })
}
