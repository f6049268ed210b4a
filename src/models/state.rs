//! Connection lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle status for a client connection.
///
/// Transitions only move forward; `Closed` is terminal and reachable from
/// every other state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport has been opened yet.
    Disconnected,
    /// Transport open, waiting for the READY dispatch.
    Handshaking,
    /// READY received; commands and events flow.
    Ready,
    /// Connection released, either explicitly or after a failure.
    Closed,
}

impl ConnectionState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Handshaking)
                | (Self::Handshaking, Self::Ready)
                | (
                    Self::Disconnected | Self::Handshaking | Self::Ready,
                    Self::Closed
                )
        )
    }

    /// `true` once the connection can no longer be used.
    #[must_use]
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}
