//! Single-reader frame dispatcher.
//!
//! The dispatcher is the only task that reads from the transport. Each
//! decoded frame is classified and routed; the wire carries no correlation
//! id, so command responses are paired with requests strictly in the order
//! the requests were written.
//!
//! # Routing rules (checked in this order for every frame)
//!
//! | # | Condition                                          | Action                                   |
//! |---|----------------------------------------------------|------------------------------------------|
//! | 1 | `evt == "ERROR"`                                   | fail the oldest pending command          |
//! | 2 | `cmd` equals the oldest pending command's verb     | resolve the oldest pending command       |
//! | 3 | `cmd == "DISPATCH"` and `evt` is registered        | invoke the event handler with `data`     |
//! | 4 | *(anything else)*                                  | drop; logged at `DEBUG`                  |
//!
//! Rule 2 is always tried before rule 3, so `SUBSCRIBE`/`UNSUBSCRIBE`
//! acknowledgements are consumed as command responses and never reach an
//! event handler.
//!
//! Only the head of the queue is ever matched. If the server answers out of
//! order, a reply is bound to the earliest unresolved entry when the verbs
//! agree (so two `SET_ACTIVITY` replies resolve the two callers in send
//! order, whichever request the server actually answered first); no
//! reordering is attempted.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::events::{ErrorContext, ErrorHandler, EventRegistry};
use crate::models::message::{Message, ERROR_EVENT};
use crate::protocol::codec::{Frame, FrameCodec, Opcode};
use crate::{AppError, Result};

/// Receiving side of a pending command's result slot.
pub type ResultSlot = oneshot::Receiver<Result<Message>>;

/// A command written to the wire and not yet answered.
#[derive(Debug)]
pub struct PendingCommand {
    /// Nonce sent with the request.
    pub nonce: String,
    /// Verb the response is expected to echo.
    pub cmd: String,
    /// When the entry was queued.
    pub enqueued_at: Instant,
    result: oneshot::Sender<Result<Message>>,
}

impl PendingCommand {
    /// Hand `outcome` to the waiting caller, if it is still waiting.
    fn resolve(self, outcome: Result<Message>) {
        let waited = self.enqueued_at.elapsed();
        if self.result.send(outcome).is_err() {
            debug!(
                nonce = %self.nonce,
                cmd = %self.cmd,
                ?waited,
                "dispatcher: caller stopped waiting, reply discarded"
            );
        }
    }
}

/// What the dispatcher did with one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Rule 1: the oldest pending command (by nonce) was failed.
    Failed(String),
    /// Rule 1 with nothing pending: reported to the error handler.
    UnmatchedError,
    /// Rule 2: the oldest pending command (by nonce) was resolved.
    Resolved(String),
    /// Rule 3: delivered to the handler for this event.
    Delivered(String),
    /// Rule 4: dropped.
    Dropped,
}

#[derive(Debug, Default)]
struct PendingQueue {
    entries: VecDeque<PendingCommand>,
    closed: Option<AppError>,
}

/// Routes frames read from the transport to commands and event handlers.
pub struct Dispatcher {
    pending: Mutex<PendingQueue>,
    registry: Arc<EventRegistry>,
    error_handler: Option<ErrorHandler>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("error_handler", &self.error_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher routing events through `registry`.
    #[must_use]
    pub fn new(registry: Arc<EventRegistry>, error_handler: Option<ErrorHandler>) -> Self {
        Self {
            pending: Mutex::new(PendingQueue::default()),
            registry,
            error_handler,
        }
    }

    /// Queue a command expecting a reply with verb `cmd`.
    ///
    /// Must be called while holding the write lock, immediately before the
    /// request frame is written, so queue order equals wire order.
    ///
    /// # Errors
    ///
    /// Returns the terminal error (normally [`AppError::ConnectionClosed`])
    /// once the dispatcher has shut down.
    pub async fn enqueue(&self, cmd: &str, nonce: &str) -> Result<ResultSlot> {
        let mut queue = self.pending.lock().await;
        if let Some(err) = &queue.closed {
            return Err(err.clone());
        }
        let (tx, rx) = oneshot::channel();
        queue.entries.push_back(PendingCommand {
            nonce: nonce.to_owned(),
            cmd: cmd.to_owned(),
            enqueued_at: Instant::now(),
            result: tx,
        });
        debug!(cmd, nonce, depth = queue.entries.len(), "dispatcher: command queued");
        Ok(rx)
    }

    /// Drop a queued entry whose request never made it onto the wire.
    pub async fn abandon(&self, nonce: &str) {
        let mut queue = self.pending.lock().await;
        queue.entries.retain(|p| p.nonce != nonce);
    }

    /// Number of commands awaiting a reply.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.entries.len()
    }

    /// Fail every pending command with `reason` and refuse new ones.
    ///
    /// Idempotent; the first reason wins.
    pub async fn shutdown(&self, reason: AppError) {
        let drained: Vec<PendingCommand> = {
            let mut queue = self.pending.lock().await;
            if queue.closed.is_none() {
                queue.closed = Some(reason.clone());
            }
            queue.entries.drain(..).collect()
        };
        if !drained.is_empty() {
            info!(count = drained.len(), %reason, "dispatcher: failing pending commands");
        }
        for entry in drained {
            entry.resolve(Err(reason.clone()));
        }
    }

    /// Read frames until EOF, a transport error, a server Close, or
    /// cancellation, routing each one. Always ends with [`Self::shutdown`].
    ///
    /// Returns the reason the loop stopped.
    pub async fn run<R>(
        self: Arc<Self>,
        mut frames: FramedRead<R, FrameCodec>,
        cancel: CancellationToken,
    ) -> AppError
    where
        R: AsyncRead + Unpin + Send,
    {
        let span = info_span!("presence_dispatcher");
        let reason = async {
            loop {
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => {
                        debug!("dispatcher: cancellation received, stopping");
                        break AppError::ConnectionClosed("client closed".into());
                    }

                    item = frames.next() => match item {
                        None => {
                            debug!("dispatcher: EOF detected");
                            break AppError::ConnectionClosed("server closed the channel".into());
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "dispatcher: read failed, stopping");
                            break e;
                        }
                        Some(Ok(frame)) => {
                            if let Some(reason) = self.handle_frame(&frame).await {
                                break reason;
                            }
                        }
                    },
                }
            }
        }
        .instrument(span)
        .await;

        self.shutdown(AppError::ConnectionClosed(closed_detail(&reason))).await;
        reason
    }

    /// Handle one frame; `Some` means the connection must end.
    async fn handle_frame(&self, frame: &Frame) -> Option<AppError> {
        match frame.kind() {
            Some(Opcode::Message) => {}
            Some(Opcode::Close) => {
                let detail = frame.parse::<Message>().map_or_else(
                    |_| "server sent close".to_owned(),
                    |m| {
                        let code = m
                            .code
                            .as_ref()
                            .map_or_else(|| "none".to_owned(), Value::to_string);
                        format!("server sent close (code {code}): {}", m.error_message())
                    },
                );
                info!(%detail, "dispatcher: close frame received");
                return Some(AppError::ConnectionClosed(detail));
            }
            Some(Opcode::Handshake) | None => {
                debug!(opcode = frame.opcode, "dispatcher: unexpected opcode, dropping frame");
                return None;
            }
        }

        match frame.parse::<Message>() {
            Ok(message) => {
                self.route(message).await;
            }
            Err(e) => {
                debug!(error = %e, "dispatcher: unparseable payload, dropping frame");
            }
        }
        None
    }

    /// Apply the routing rules to one decoded message.
    pub async fn route(&self, message: Message) -> Route {
        if message.is_error() {
            let head = self.pending.lock().await.entries.pop_front();
            let err = AppError::ServerError(message.error_message());
            return match head {
                Some(entry) => {
                    let nonce = entry.nonce.clone();
                    debug!(%nonce, cmd = %entry.cmd, "dispatcher: error reply for oldest command");
                    entry.resolve(Err(err));
                    Route::Failed(nonce)
                }
                None => {
                    warn!(%err, "dispatcher: error reply with no pending command");
                    let context = ErrorContext {
                        event: ERROR_EVENT.to_owned(),
                        data: message.data.unwrap_or_default(),
                    };
                    self.report(&err, &context);
                    Route::UnmatchedError
                }
            };
        }

        let matched = {
            let mut queue = self.pending.lock().await;
            let head_matches = matches!(
                (queue.entries.front(), message.cmd()),
                (Some(head), Some(cmd)) if head.cmd == cmd
            );
            if head_matches {
                queue.entries.pop_front()
            } else {
                None
            }
        };
        if let Some(entry) = matched {
            let nonce = entry.nonce.clone();
            debug!(%nonce, cmd = %entry.cmd, "dispatcher: command resolved");
            entry.resolve(Ok(message));
            return Route::Resolved(nonce);
        }

        if message.is_dispatch() {
            if let Some(event) = message.evt() {
                if let Some(handler) = self.registry.handler_for(event).await {
                    let event = event.to_owned();
                    let data = message.data.unwrap_or_default();
                    let outcome = catch_unwind(AssertUnwindSafe(|| handler(data.clone())));
                    let failure = match outcome {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some(AppError::Handler(format!("{event} failed: {e}"))),
                        Err(_) => Some(AppError::Handler(format!("{event} panicked"))),
                    };
                    if let Some(err) = failure {
                        self.report(&err, &ErrorContext { event: event.clone(), data });
                    }
                    return Route::Delivered(event);
                }
            }
        }

        debug!(cmd = ?message.cmd, evt = ?message.evt, "dispatcher: unrecognised message, dropping");
        Route::Dropped
    }

    /// Pass an out-of-band failure to the error handler, or log it.
    fn report(&self, err: &AppError, context: &ErrorContext) {
        match &self.error_handler {
            Some(on_error) => {
                if catch_unwind(AssertUnwindSafe(|| on_error(err, context))).is_err() {
                    warn!(event = %context.event, "dispatcher: error handler panicked");
                }
            }
            None => {
                warn!(event = %context.event, error = %err, "dispatcher: unhandled event failure");
            }
        }
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

fn closed_detail(reason: &AppError) -> String {
    match reason {
        AppError::ConnectionClosed(detail) => detail.clone(),
        other => other.to_string(),
    }
}
