//! Full-duplex binary framing over a WebSocket.
//!
//! The connection wraps a `tokio-tungstenite` stream and enforces a
//! strict lifecycle: open, listening, close negotiation, closed. All
//! writes (data and control) serialise through one write-side lock;
//! the read loop runs on a single task and is the sole caller of the
//! installed read handler, which sees every frame in wire order and a
//! close-induced error exactly once.

use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use log::{debug, error, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::{Error, Result};

pub const CLOSE_NORMAL: u16 = 1000;

/// Connection state bitmask. Bits are monotonically additive except
/// `OPEN` and `LISTENING`, which are cleared when `CLOSED` is added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnState(u8);

impl ConnState {
    pub const OPEN: ConnState = ConnState(1);
    pub const LISTENING: ConnState = ConnState(1 << 1);
    pub const CLOSE_RECEIVED: ConnState = ConnState(1 << 2);
    pub const CLOSE_SENT: ConnState = ConnState(1 << 3);
    pub const CLOSED: ConnState = ConnState(1 << 4);
    pub const ERROR: ConnState = ConnState(1 << 5);

    pub const fn contains(self, other: ConnState) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: ConnState) {
        self.0 |= other.0;
    }

    fn remove(&mut self, other: ConnState) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for ConnState {
    type Output = ConnState;

    fn bitor(self, rhs: ConnState) -> ConnState {
        ConnState(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
    Ping,
    Pong,
}

/// One received (or outgoing) WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Frame {
    fn from_message(msg: WsMessage) -> Option<Frame> {
        match msg {
            WsMessage::Text(text) => Some(Frame {
                kind: FrameKind::Text,
                payload: text.into_bytes(),
            }),
            WsMessage::Binary(payload) => Some(Frame {
                kind: FrameKind::Binary,
                payload,
            }),
            WsMessage::Ping(payload) => Some(Frame {
                kind: FrameKind::Ping,
                payload,
            }),
            WsMessage::Pong(payload) => Some(Frame {
                kind: FrameKind::Pong,
                payload,
            }),
            WsMessage::Close(_) | WsMessage::Frame(_) => None,
        }
    }
}

/// Handler consulted by the read loop for every received frame.
pub type ReadHandler<S> =
    Arc<dyn Fn(Connection<S>, Result<Frame>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Bound on a single transport read; `None` means no deadline.
    pub read_deadline: Option<Duration>,
    /// Bound on a single transport write; `None` means no deadline.
    pub write_deadline: Option<Duration>,
    /// Bound on the graceful-close wait for the peer's reciprocal
    /// close frame; `None` blocks until it arrives.
    pub close_deadline: Option<Duration>,
}

struct Inner<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, WsMessage>>,
    stream: StdMutex<Option<SplitStream<WebSocketStream<S>>>>,
    state: RwLock<ConnState>,
    handler: StdMutex<Option<ReadHandler<S>>>,
    done: Notify,
    opts: ConnectionOptions,
}

pub struct Connection<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Connection<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(ws: WebSocketStream<S>, opts: ConnectionOptions) -> Self {
        let (sink, stream) = ws.split();
        Self {
            inner: Arc::new(Inner {
                sink: Mutex::new(sink),
                stream: StdMutex::new(Some(stream)),
                state: RwLock::new(ConnState::OPEN),
                handler: StdMutex::new(None),
                done: Notify::new(),
                opts,
            }),
        }
    }

    pub fn conn_state(&self) -> ConnState {
        *self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn closed(&self) -> bool {
        self.conn_state().contains(ConnState::CLOSED)
    }

    fn update_state(&self, apply: impl FnOnce(&mut ConnState)) {
        let mut state = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        apply(&mut state);
    }

    /// Installs the handler consulted by the read loop. Without one,
    /// data frames are dropped and errors terminate the loop.
    pub fn set_read_handler(&self, handler: ReadHandler<S>) {
        *self
            .inner
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn check_writable(&self) -> Result<()> {
        let state = self.conn_state();
        if state.contains(ConnState::CLOSED) {
            return Err(Error::ConnectionClosed);
        }
        if state.contains(ConnState::CLOSE_SENT) {
            return Err(Error::CloseSent);
        }
        Ok(())
    }

    /// Sends one binary frame; the frame boundary is the caller's byte
    /// slice. Returns the number of payload bytes written.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.check_writable()?;
        self.send_frame(WsMessage::Binary(data.to_vec())).await?;
        Ok(data.len())
    }

    /// As `write`, but the caller chooses the frame type.
    pub async fn write_message(&self, kind: FrameKind, data: Vec<u8>) -> Result<()> {
        self.check_writable()?;
        let msg = match kind {
            FrameKind::Text => WsMessage::Text(
                String::from_utf8(data)
                    .map_err(|_| Error::Codec("text frame is not valid UTF-8".into()))?,
            ),
            FrameKind::Binary => WsMessage::Binary(data),
            FrameKind::Ping => WsMessage::Ping(data),
            FrameKind::Pong => WsMessage::Pong(data),
        };
        self.send_frame(msg).await
    }

    async fn send_frame(&self, msg: WsMessage) -> Result<()> {
        let send = async {
            let mut sink = self.inner.sink.lock().await;
            sink.send(msg).await.map_err(Error::from)
        };
        match self.inner.opts.write_deadline {
            Some(deadline) => timeout(deadline, send).await.map_err(|_| Error::Timeout)?,
            None => send.await,
        }
    }

    /// Drives the read loop until the connection closes or the handler
    /// rejects a frame. At most one call may be active; a Normal
    /// Closure (1000) from the peer is not reported as an error.
    pub async fn listen(&self) -> Result<()> {
        {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if state.contains(ConnState::CLOSED) {
                return Err(Error::ConnectionClosed);
            }
            if state.contains(ConnState::LISTENING) {
                return Err(Error::AlreadyListening);
            }
            state.insert(ConnState::LISTENING);
        }
        let mut stream = match self
            .inner
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(stream) => stream,
            None => return Err(Error::AlreadyListening),
        };
        let handler = self
            .inner
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let result = self.read_loop(&mut stream, &handler).await;
        let result = match result {
            Err(Error::Close {
                code: CLOSE_NORMAL, ..
            }) => Ok(()),
            other => other,
        };
        self.update_state(|state| {
            state.remove(ConnState::OPEN);
            state.remove(ConnState::LISTENING);
            state.insert(ConnState::CLOSED);
            if result.is_err() {
                state.insert(ConnState::ERROR);
            }
        });
        self.inner.done.notify_waiters();
        result
    }

    async fn read_loop(
        &self,
        stream: &mut SplitStream<WebSocketStream<S>>,
        handler: &Option<ReadHandler<S>>,
    ) -> Result<()> {
        loop {
            let next = match self.inner.opts.read_deadline {
                Some(deadline) => match timeout(deadline, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.close_on_abort().await;
                        let _ = self.dispatch(handler, Err(Error::Timeout)).await;
                        return Err(Error::Timeout);
                    }
                },
                None => stream.next().await,
            };
            match next {
                None => {
                    debug!("transport ended without a close frame");
                    self.close_on_abort().await;
                    return Ok(());
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (CLOSE_NORMAL, String::new()),
                    };
                    debug!("received close frame: code {code}: {reason}");
                    self.update_state(|state| state.insert(ConnState::CLOSE_RECEIVED));
                    if !self.conn_state().contains(ConnState::CLOSE_SENT) {
                        self.update_state(|state| state.insert(ConnState::CLOSE_SENT));
                        let reply = WsMessage::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        }));
                        let mut sink = self.inner.sink.lock().await;
                        if let Err(e) = sink.send(reply).await {
                            warn!("failed to send reciprocal close frame: {e}");
                        }
                    }
                    let dispatched = self
                        .dispatch(
                            handler,
                            Err(Error::Close {
                                code,
                                reason: reason.clone(),
                            }),
                        )
                        .await;
                    return dispatched.and(Err(Error::Close { code, reason }));
                }
                Some(Ok(msg)) => {
                    if let Some(frame) = Frame::from_message(msg) {
                        self.dispatch(handler, Ok(frame)).await?;
                    }
                }
                Some(Err(e)) => {
                    debug!("transport read failed: {e}");
                    self.close_on_abort().await;
                    return self.dispatch(handler, Err(Error::Ws(e))).await;
                }
            }
        }
    }

    /// Marks our side of the handshake as sent when the read loop
    /// aborts without a peer close frame. The close frame itself is
    /// best effort: the peer may already be gone.
    async fn close_on_abort(&self) {
        if self.conn_state().contains(ConnState::CLOSE_SENT) {
            return;
        }
        self.update_state(|state| state.insert(ConnState::CLOSE_SENT));
        let frame = WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        let mut sink = self.inner.sink.lock().await;
        if let Err(e) = sink.send(frame).await {
            debug!("close frame after transport loss failed: {e}");
        }
    }

    async fn dispatch(&self, handler: &Option<ReadHandler<S>>, event: Result<Frame>) -> Result<()> {
        match handler {
            Some(handler) => {
                let call = std::panic::AssertUnwindSafe(handler(self.clone(), event));
                match call.catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        error!("read handler panicked; stopping read loop");
                        Err(Error::Codec("read handler panicked".into()))
                    }
                }
            }
            // Without a handler, data frames are dropped and errors
            // terminate the loop.
            None => event.map(|_| ()),
        }
    }

    /// Graceful shutdown with a Normal Closure code.
    pub async fn close(&self) -> Result<()> {
        self.close_with_msg(CLOSE_NORMAL, "closing connection").await
    }

    /// As `close`, with an application-chosen close code and reason.
    /// A second close on the same connection is an error.
    pub async fn close_with_msg(&self, code: u16, reason: &str) -> Result<()> {
        {
            let mut state = self
                .inner
                .state
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if state.contains(ConnState::CLOSE_SENT) {
                return Err(Error::MultipleCloseCalls);
            }
            state.insert(ConnState::CLOSE_SENT);
        }
        let frame = WsMessage::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        }));
        {
            let mut sink = self.inner.sink.lock().await;
            if let Err(e) = sink.send(frame).await {
                warn!("failed to send close frame: {e}");
            }
        }

        // Wait for the read loop to observe the peer's close. Arm the
        // notification before re-checking state so the wakeup cannot
        // be missed. The gate is whether the read side can still run,
        // not whether it already does: a `listen` spawned but not yet
        // polled must get its chance to drain the peer's close.
        let notified = self.inner.done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        let stream_pending = self
            .inner
            .stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some();
        let state = self.conn_state();
        let read_side_live = state.contains(ConnState::LISTENING) || stream_pending;
        if read_side_live && !state.contains(ConnState::CLOSED) {
            match self.inner.opts.close_deadline {
                Some(deadline) => {
                    if timeout(deadline, notified).await.is_err() {
                        warn!("close deadline elapsed before the peer's close frame");
                    }
                }
                None => notified.await,
            }
        }
        self.update_state(|state| {
            state.remove(ConnState::OPEN);
            state.insert(ConnState::CLOSED);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::ConnState;

    #[test]
    fn state_bits_compose() {
        let mut state = ConnState::OPEN;
        assert!(state.contains(ConnState::OPEN));
        assert!(!state.contains(ConnState::CLOSED));

        state.insert(ConnState::LISTENING);
        state.insert(ConnState::CLOSE_SENT);
        assert!(state.contains(ConnState::OPEN | ConnState::LISTENING));
        assert!(state.contains(ConnState::CLOSE_SENT));

        state.remove(ConnState::OPEN);
        state.insert(ConnState::CLOSED);
        assert!(!state.contains(ConnState::OPEN));
        assert!(state.contains(ConnState::CLOSE_SENT | ConnState::CLOSED));
    }
}
