//! Local IPC plumbing: channel discovery and transport.
//!
//! Connects to a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate.

pub mod locator;
pub mod transport;

pub use locator::{locate, Platform, PipeSelector};
pub use transport::{BoxedTransport, Connector, LocalSocketConnector, Transport};
