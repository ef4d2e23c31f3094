//! Forward-protocol codec and message model.
//!
//! All messages are MessagePack. Arrays are tuple-encoded; options are
//! map-encoded with string keys. See the individual modules for the
//! wire layouts.

pub mod ack;
pub mod message;
pub mod record;
pub mod scan;
pub mod time;

pub use ack::Ack;
pub use message::{
    CompressedPackedForwardMessage, ForwardMessage, Message, MessageExt, MessageOptions,
    PackedForwardMessage, RawMessage, Sendable, COMPRESSION_GZIP,
};
pub use record::{Entry, EntryExt, Record};
pub use scan::chunk_from_bytes;
pub use time::EventTime;
