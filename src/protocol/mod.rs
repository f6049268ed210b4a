//! Wire protocol: framing, handshake and frame dispatch.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Commands / push events (JSON)          │  dispatcher
//! ├─────────────────────────────────────────┤
//! │   Handshake                              │  hello / READY
//! ├─────────────────────────────────────────┤
//! │   Framing                                │  8-byte LE header
//! ├─────────────────────────────────────────┤
//! │   Local socket / named pipe              │  ipc::transport
//! └─────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod dispatcher;
pub mod handshake;

pub use codec::{Frame, FrameCodec, Opcode};
pub use dispatcher::{Dispatcher, Route};
pub use handshake::{perform_handshake, ReadyInfo};
