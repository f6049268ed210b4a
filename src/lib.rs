#![forbid(unsafe_code)]

//! Client for the rich-presence local IPC protocol.
//!
//! The crate speaks the length-prefixed JSON protocol a desktop application
//! exposes over a Unix domain socket or Windows named pipe: hello/READY
//! handshake, `SET_ACTIVITY`, `SUBSCRIBE`/`UNSUBSCRIBE`, and server-pushed
//! `DISPATCH` events, all multiplexed over one stream without any
//! request/response correlation id.
//!
//! ```rust,ignore
//! use presence_ipc::{Activity, Client, ClientConfig};
//!
//! let client = Client::new(ClientConfig::new("123456"));
//! client.connect().await?;
//! client.update_activity(&Activity::new().details("testing")).await?;
//! client.close().await?;
//! ```

pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod ipc;
pub mod models;
pub mod protocol;

pub use client::Client;
pub use config::ClientConfig;
pub use errors::{AppError, Result};
pub use models::activity::Activity;
pub use models::state::ConnectionState;
