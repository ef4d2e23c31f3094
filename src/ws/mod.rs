//! WebSocket transport: one Fluent message per binary frame.

pub mod auth;
pub mod client;
pub mod connection;

pub use auth::IamTokenSource;
pub use client::{Client, ClientOptions, WsStream};
pub use connection::{
    ConnState, Connection, ConnectionOptions, Frame, FrameKind, ReadHandler, CLOSE_NORMAL,
};
