//! Fluent Forward protocol client core.
//!
//! Serialises structured events into MessagePack and forwards them
//! over a stream transport (TCP, TLS, Unix socket, or WebSocket) to a
//! Fluentd-compatible collector, optionally matching per-chunk
//! acknowledgements.
//!
//! The crate splits into two subsystems:
//!
//! * [`protocol`] is the Forward-protocol codec: message variants,
//!   `EventTime` timestamps, packed/compressed event streams, chunk
//!   ids, and the structural chunk scanner used on the ACK path.
//! * the transports: [`client`] over a [`transport::ConnFactory`]
//!   stream, and [`ws`] for WebSocket sessions with a strict close
//!   handshake and async error latching.

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;
#[cfg(feature = "ws")]
pub mod ws;

pub use error::{Error, Result};
pub use protocol::{
    Ack, CompressedPackedForwardMessage, EntryExt, EventTime, ForwardMessage, Message, MessageExt,
    MessageOptions, PackedForwardMessage, RawMessage, Record, Sendable,
};
