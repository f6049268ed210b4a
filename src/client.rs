//! Command client.
//!
//! [`Client`] owns one connection: it drives the handshake, keeps the write
//! half behind the single write lock, and spawns the [`Dispatcher`] task
//! that exclusively owns the read half.
//!
//! Every command follows the same path:
//!
//! 1. build the [`Message`] and a fresh nonce;
//! 2. take the write lock;
//! 3. queue a pending entry on the dispatcher;
//! 4. write the frame, release the lock;
//! 5. wait for the dispatcher to resolve that entry (optionally with a
//!    deadline).
//!
//! Steps 3 and 4 happen under the same lock, so the dispatcher's FIFO
//! always matches the order frames hit the wire.
//!
//! Event handlers run on the dispatcher task; calling a command method from
//! inside a handler would wait on the very loop that has to deliver its
//! reply, so handlers must not do that.

use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::events::{
    normalize_event_name, ErrorHandler, EventHandler, EventRegistry, EventSubscription,
};
use crate::ipc::transport::{BoxedTransport, Connector, LocalSocketConnector};
use crate::models::activity::Activity;
use crate::models::message::{
    clear_activity_args, Hello, Message, SET_ACTIVITY, SUBSCRIBE, UNSUBSCRIBE,
};
use crate::models::state::ConnectionState;
use crate::protocol::codec::{write_frame, Frame, FrameCodec, Opcode};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::{perform_handshake, ReadyInfo};
use crate::{AppError, Result};

/// Presence IPC client.
pub struct Client {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    state: Arc<watch::Sender<ConnectionState>>,
    registry: Arc<EventRegistry>,
    dispatcher: Arc<Dispatcher>,
    writer: Mutex<Option<WriteHalf<BoxedTransport>>>,
    reader_task: Mutex<Option<JoinHandle<AppError>>>,
    cancel: CancellationToken,
    ready: OnceLock<ReadyInfo>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("client_id", &self.config.client_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Client connecting through the local socket selected by `config.pipe`.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let connector = LocalSocketConnector::for_current_platform(config.pipe.clone());
        Self::with_connector(config, Arc::new(connector))
    }

    /// Client connecting through an arbitrary transport factory.
    #[must_use]
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let registry = Arc::new(EventRegistry::new());
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            connector,
            state: Arc::new(state),
            dispatcher: Arc::new(Dispatcher::new(Arc::clone(&registry), None)),
            registry,
            writer: Mutex::new(None),
            reader_task: Mutex::new(None),
            cancel: CancellationToken::new(),
            ready: OnceLock::new(),
        }
    }

    /// Route handler failures and unmatched `ERROR` replies to `handler`
    /// instead of the log. Set before [`Client::connect`].
    #[must_use]
    pub fn on_error(mut self, handler: ErrorHandler) -> Self {
        self.dispatcher = Arc::new(Dispatcher::new(Arc::clone(&self.registry), Some(handler)));
        self
    }

    /// Client id sent in the hello.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// READY payload, once connected.
    #[must_use]
    pub fn ready_info(&self) -> Option<&ReadyInfo> {
        self.ready.get()
    }

    /// Names of the events with an installed handler, sorted.
    ///
    /// Bindings change only through [`Client::register_event`] and
    /// [`Client::unregister_event`], which keep the server in step.
    pub async fn registered_events(&self) -> Vec<String> {
        self.registry.events().await
    }

    /// Installed binding for `event`, if any.
    pub async fn subscription(&self, event: &str) -> Option<EventSubscription> {
        let event = normalize_event_name(event).ok()?;
        self.registry.get(&event).await
    }

    /// Open the transport, perform the handshake and start the dispatcher.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidPipe`]: the channel could not be opened.
    /// - [`AppError::InvalidClientId`], [`AppError::ServerError`],
    ///   [`AppError::ProtocolVersionMismatch`], [`AppError::Protocol`],
    ///   [`AppError::Timeout`]: the handshake failed.
    /// - [`AppError::ArgumentError`]: already connected.
    /// - [`AppError::ConnectionClosed`]: the client was closed, including by
    ///   a [`Client::close`] that raced the handshake.
    ///
    /// Any handshake failure leaves the client `Closed`.
    pub async fn connect(&self) -> Result<ReadyInfo> {
        if !self.advance(ConnectionState::Handshaking) {
            return Err(match self.state() {
                ConnectionState::Closed => AppError::ConnectionClosed("client is closed".into()),
                other => AppError::ArgumentError(format!("cannot connect while {other}")),
            });
        }

        match self.open_session().await {
            Ok(ready) => Ok(ready),
            Err(err) => {
                warn!(client_id = %self.config.client_id, error = %err, "connect failed");
                self.advance(ConnectionState::Closed);
                self.dispatcher.shutdown(err.clone()).await;
                Err(err)
            }
        }
    }

    /// Set the activity for this process.
    ///
    /// # Errors
    ///
    /// See [`Client::update_activity_for`].
    pub async fn update_activity(&self, activity: &Activity) -> Result<Message> {
        self.update_activity_for(std::process::id(), activity).await
    }

    /// Set the activity shown for `pid`.
    ///
    /// Unset fields, and sub-objects left empty by them, are pruned before
    /// sending.
    ///
    /// # Errors
    ///
    /// - [`AppError::ServerError`]: the server replied with `evt: ERROR`.
    /// - [`AppError::ConnectionClosed`]: not connected, or the connection
    ///   ended before the reply.
    /// - [`AppError::Timeout`]: the configured command deadline elapsed.
    ///   The connection is closed as well, since later replies could no
    ///   longer be paired with their commands.
    pub async fn update_activity_for(&self, pid: u32, activity: &Activity) -> Result<Message> {
        let args = serde_json::json!({ "pid": pid, "activity": activity.to_payload() });
        self.call(Message::command(SET_ACTIVITY, args, new_nonce()))
            .await
    }

    /// Clear the activity shown for `pid` (`"activity": null`).
    ///
    /// # Errors
    ///
    /// Same as [`Client::update_activity_for`].
    pub async fn clear_activity(&self, pid: u32) -> Result<Message> {
        self.call(Message::command(
            SET_ACTIVITY,
            clear_activity_args(pid),
            new_nonce(),
        ))
        .await
    }

    /// Ask the server to start sending `event`.
    ///
    /// This only issues the command; use [`Client::register_event`] to also
    /// bind a handler.
    ///
    /// # Errors
    ///
    /// [`AppError::ArgumentError`] for a blank event name, otherwise as
    /// [`Client::update_activity_for`].
    pub async fn subscribe(&self, event: &str, args: Value) -> Result<Message> {
        let event = normalize_event_name(event)?;
        self.call(Message::command(SUBSCRIBE, args, new_nonce()).with_event(event))
            .await
    }

    /// Ask the server to stop sending `event`.
    ///
    /// # Errors
    ///
    /// Same as [`Client::subscribe`].
    pub async fn unsubscribe(&self, event: &str, args: Value) -> Result<Message> {
        let event = normalize_event_name(event)?;
        self.call(Message::command(UNSUBSCRIBE, args, new_nonce()).with_event(event))
            .await
    }

    /// Subscribe to `event` and, once the server acknowledges, bind
    /// `handler` to it. A previous binding for the same name is replaced.
    ///
    /// # Errors
    ///
    /// Any [`Client::subscribe`] failure; the binding is not installed.
    pub async fn register_event(
        &self,
        event: &str,
        args: Value,
        handler: EventHandler,
    ) -> Result<()> {
        let event = normalize_event_name(event)?;
        self.subscribe(&event, args.clone()).await?;
        self.registry
            .insert(EventSubscription {
                event,
                args,
                handler,
            })
            .await;
        Ok(())
    }

    /// Unsubscribe from `event`, then drop its binding.
    ///
    /// # Errors
    ///
    /// [`AppError::EventNotFound`] if nothing is bound; otherwise any
    /// [`Client::unsubscribe`] failure, in which case the binding stays.
    pub async fn unregister_event(&self, event: &str, args: Value) -> Result<()> {
        let event = normalize_event_name(event)?;
        if !self.registry.contains(&event).await {
            return Err(AppError::EventNotFound(event));
        }
        self.unsubscribe(&event, args).await?;
        self.registry.remove(&event).await?;
        Ok(())
    }

    /// Send the Close frame and release the transport.
    ///
    /// No reply is awaited. Commands still in flight fail with
    /// [`AppError::ConnectionClosed`]. Calling `close` again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] only if the close payload cannot be
    /// serialized.
    pub async fn close(&self) -> Result<()> {
        // Cancel before touching the writer: a handshake finishing
        // concurrently checks the token under the writer lock.
        self.cancel.cancel();
        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            self.release_transport(writer).await?;
        }

        self.dispatcher
            .shutdown(AppError::ConnectionClosed("client closed".into()))
            .await;

        let task = self.reader_task.lock().await.take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(error = %err, "dispatcher task ended abnormally");
            }
        }

        if self.advance(ConnectionState::Closed) {
            info!(client_id = %self.config.client_id, "client closed");
        }
        Ok(())
    }

    // ── Private helpers ───────────────────────────────────────────────────

    async fn open_session(&self) -> Result<ReadyInfo> {
        let transport = self.connector.connect().await?;
        let (read_half, mut write_half) = tokio::io::split(transport);
        let mut frames = FramedRead::new(read_half, FrameCodec::new());

        let handshake = perform_handshake(
            &mut frames,
            &mut write_half,
            &self.config.client_id,
            self.config.handshake_timeout(),
        );
        let ready = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            outcome = handshake => Some(outcome?),
        };

        // Held until the session is installed so `close()` either sees the
        // writer or has already cancelled.
        let mut writer = self.writer.lock().await;
        let ready = match ready {
            Some(ready) if !self.cancel.is_cancelled() => ready,
            _ => {
                drop(writer);
                self.release_transport(write_half).await?;
                return Err(AppError::ConnectionClosed(
                    "client closed during handshake".into(),
                ));
            }
        };

        // Only reachable once per client: Handshaking is entered once.
        let _ = self.ready.set(ready.clone());

        let dispatcher = Arc::clone(&self.dispatcher);
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let reason = dispatcher.run(frames, cancel).await;
            state.send_if_modified(|current| {
                if current.can_transition_to(ConnectionState::Closed) {
                    *current = ConnectionState::Closed;
                    true
                } else {
                    false
                }
            });
            reason
        });
        *self.reader_task.lock().await = Some(task);
        *writer = Some(write_half);

        if !self.advance(ConnectionState::Ready) {
            let Some(write_half) = writer.take() else {
                return Err(AppError::ConnectionClosed("transport released".into()));
            };
            drop(writer);
            self.cancel.cancel();
            self.release_transport(write_half).await?;
            return Err(AppError::ConnectionClosed(
                "client closed during handshake".into(),
            ));
        }
        info!(client_id = %self.config.client_id, "client ready");
        Ok(ready)
    }

    /// Send the Close frame and shut the write half down. Delivery
    /// failures are logged only; the peer may already be gone.
    async fn release_transport(&self, mut writer: WriteHalf<BoxedTransport>) -> Result<()> {
        let frame = Frame::json(Opcode::Close, &Hello::new(self.config.client_id.as_str()))?;
        if let Err(err) = write_frame(&mut writer, &frame).await {
            debug!(error = %err, "close frame not delivered");
        }
        if let Err(err) = writer.shutdown().await {
            debug!(error = %err, "transport shutdown failed");
        }
        Ok(())
    }

    async fn call(&self, request: Message) -> Result<Message> {
        let cmd = request.cmd.clone().unwrap_or_default();
        let nonce = request.nonce.clone().unwrap_or_default();
        let frame = Frame::json(Opcode::Message, &request)?;

        let slot = {
            let mut guard = self.writer.lock().await;
            let state = self.state();
            if state != ConnectionState::Ready {
                return Err(AppError::ConnectionClosed(format!(
                    "cannot send {cmd} while {state}"
                )));
            }
            let writer = guard
                .as_mut()
                .ok_or_else(|| AppError::ConnectionClosed("transport released".into()))?;

            let slot = self.dispatcher.enqueue(&cmd, &nonce).await?;
            if let Err(err) = write_frame(writer, &frame).await {
                warn!(%cmd, %nonce, error = %err, "command write failed, closing connection");
                self.dispatcher.abandon(&nonce).await;
                self.cancel.cancel();
                return Err(err);
            }
            slot
        };
        debug!(%cmd, %nonce, "command sent");

        let outcome = match self.config.command_timeout() {
            Some(limit) => match tokio::time::timeout(limit, slot).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err =
                        AppError::Timeout(format!("no reply to {cmd} ({nonce}) within {limit:?}"));
                    self.abort_after_timeout(&err).await;
                    return Err(err);
                }
            },
            None => slot.await,
        };
        outcome.map_err(|_| {
            AppError::ConnectionClosed(format!("dispatcher stopped before replying to {cmd}"))
        })?
    }

    /// Tear the connection down after a missed reply deadline.
    ///
    /// Replies are paired by position only, so once one is missing every
    /// later reply would land on the wrong caller. Everything still queued
    /// fails with `reason`, and later commands are refused.
    async fn abort_after_timeout(&self, reason: &AppError) {
        warn!(
            client_id = %self.config.client_id,
            error = %reason,
            "reply deadline missed, closing connection"
        );
        self.dispatcher.shutdown(reason.clone()).await;
        self.cancel.cancel();
        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            if let Err(err) = self.release_transport(writer).await {
                debug!(error = %err, "close after timeout failed");
            }
        }
        self.advance(ConnectionState::Closed);
    }

    /// Apply a forward transition; `false` if it is not allowed.
    fn advance(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!(from = %current, to = %next, "connection state change");
                *current = next;
                true
            } else {
                false
            }
        })
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn new_nonce() -> String {
    Uuid::new_v4().to_string()
}
