//! JSON message envelope carried inside `Message` frames.
//!
//! Requests, command responses and push events all share this one shape and
//! are told apart only by which fields are present.
//!
//! | Shape              | `cmd`                  | `evt`        | `nonce` |
//! |--------------------|------------------------|--------------|---------|
//! | command request    | verb (`SET_ACTIVITY`)  | subscribe only | set   |
//! | command response   | same verb              | optional     | echoed  |
//! | push event         | `DISPATCH`             | event name   | absent  |
//! | in-session error   | any                    | `ERROR`      | any     |

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Command verb used for server-pushed events.
pub const DISPATCH: &str = "DISPATCH";
/// Event name of the handshake acknowledgement.
pub const READY_EVENT: &str = "READY";
/// Event name of an in-session error reply.
pub const ERROR_EVENT: &str = "ERROR";
/// Verb for activity updates and clears.
pub const SET_ACTIVITY: &str = "SET_ACTIVITY";
/// Verb for event subscription.
pub const SUBSCRIBE: &str = "SUBSCRIBE";
/// Verb for event unsubscription.
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";

/// Only protocol version this client speaks.
pub const PROTOCOL_VERSION: u64 = 1;

/// Handshake close code the server uses for an unknown client id.
pub const INVALID_CLIENT_ID_CODE: i64 = 4000;

/// Message envelope (both directions).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Command verb.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    /// Event name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
    /// Caller-chosen request tag; not used for matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Response or event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Request arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Close/error code (handshake-time error shape). Kept untyped so an
    /// odd server value never makes the whole frame unreadable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    /// Close/error text (handshake-time error shape).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
}

impl Message {
    /// Build a command request.
    #[must_use]
    pub fn command(cmd: &str, args: Value, nonce: String) -> Self {
        Self {
            cmd: Some(cmd.to_owned()),
            args: Some(args),
            nonce: Some(nonce),
            ..Self::default()
        }
    }

    /// Attach an event name (subscribe/unsubscribe requests).
    #[must_use]
    pub fn with_event(mut self, evt: impl Into<String>) -> Self {
        self.evt = Some(evt.into());
        self
    }

    /// Command verb, if present.
    #[must_use]
    pub fn cmd(&self) -> Option<&str> {
        self.cmd.as_deref()
    }

    /// Event name, if present.
    #[must_use]
    pub fn evt(&self) -> Option<&str> {
        self.evt.as_deref()
    }

    /// `true` for an in-session `evt == "ERROR"` reply.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.evt() == Some(ERROR_EVENT)
    }

    /// `true` for a server push (`cmd == "DISPATCH"`).
    #[must_use]
    pub fn is_dispatch(&self) -> bool {
        self.cmd() == Some(DISPATCH)
    }

    /// `true` when a non-null top-level `code` is present.
    #[must_use]
    pub fn has_code(&self) -> bool {
        self.code.as_ref().is_some_and(|c| !c.is_null())
    }

    /// Numeric `code`, also accepting a numeric string such as `"4000"`.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self.code.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Top-level `message` rendered as text; non-string values are
    /// serialized as JSON.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        match self.message.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Text of `data.message`, falling back to the top-level `message`.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.data
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| self.text())
            .unwrap_or_else(|| "unknown error".to_owned())
    }
}

/// Payload of Handshake and Close frames: `{"v":1,"client_id":"…"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    /// Protocol version.
    pub v: u64,
    /// Application client id.
    pub client_id: String,
}

impl Hello {
    /// Hello for the current protocol version.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            client_id: client_id.into(),
        }
    }
}

/// Arguments for a `SET_ACTIVITY` clear: `{"pid":…,"activity":null}`.
#[must_use]
pub fn clear_activity_args(pid: u32) -> Value {
    json!({ "pid": pid, "activity": Value::Null })
}
