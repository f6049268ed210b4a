//! Error types shared across the client.

use std::fmt::{Display, Formatter};

/// Shared client result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Client error enumeration covering all protocol failure modes.
///
/// `Clone` so a single terminal connection failure can be handed to every
/// command still waiting on the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// No IPC channel was found, or connecting to it was refused.
    InvalidPipe(String),
    /// The server rejected the client id during the handshake (code 4000).
    InvalidClientId(String),
    /// The server reported an error, either at handshake time or in-session.
    ServerError(String),
    /// The READY payload announced a protocol version other than 1.
    ProtocolVersionMismatch(String),
    /// The channel closed before a frame's declared length was satisfied.
    TruncatedFrame(String),
    /// The connection is closed, or closed while a command was in flight.
    ConnectionClosed(String),
    /// `unregister` was called for an event with no installed binding.
    EventNotFound(String),
    /// An event handler returned an error or panicked.
    Handler(String),
    /// A caller-supplied argument was rejected before touching the wire.
    ArgumentError(String),
    /// A frame or payload did not have the expected shape.
    Protocol(String),
    /// A command or handshake did not complete before its deadline.
    Timeout(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPipe(msg) => write!(f, "invalid pipe: {msg}"),
            Self::InvalidClientId(msg) => write!(f, "invalid client id: {msg}"),
            Self::ServerError(msg) => write!(f, "server error: {msg}"),
            Self::ProtocolVersionMismatch(msg) => write!(f, "protocol version mismatch: {msg}"),
            Self::TruncatedFrame(msg) => write!(f, "truncated frame: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::EventNotFound(msg) => write!(f, "event not found: {msg}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
            Self::ArgumentError(msg) => write!(f, "argument error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
