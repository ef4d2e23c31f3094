//! WebSocket client: session lifecycle over a `Connection`.
//!
//! The client owns at most one active session. Each connect spawns the
//! read loop on its own task; if that loop ever returns an error it is
//! latched into a single last-async-error slot and every send fails
//! with a copy of it until the session is reopened.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use log::{debug, error};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use url::Url;

use crate::protocol::Sendable;
use crate::ws::auth::IamTokenSource;
use crate::ws::connection::{Connection, ConnectionOptions, ReadHandler};
use crate::{Error, Result};

/// The stream type produced by the upgrade.
pub type WsStream = MaybeTlsStream<TcpStream>;

#[derive(Clone)]
pub struct ClientOptions {
    pub url: Url,
    /// Adds an `Authorization` header to the upgrade request when it
    /// yields a non-empty token.
    pub auth: Option<Arc<IamTokenSource>>,
    pub connection: ConnectionOptions,
    /// Installed on every session's connection before the read loop
    /// starts.
    pub read_handler: Option<ReadHandler<WsStream>>,
}

impl ClientOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            auth: None,
            connection: ConnectionOptions::default(),
            read_handler: None,
        }
    }
}

struct Session {
    conn: Connection<WsStream>,
    read_task: JoinHandle<()>,
}

pub struct Client {
    opts: ClientOptions,
    session: Mutex<Option<Session>>,
    last_err: Arc<StdMutex<Option<Error>>>,
}

impl Client {
    pub fn new(opts: ClientOptions) -> Self {
        Self {
            opts,
            session: Mutex::new(None),
            last_err: Arc::new(StdMutex::new(None)),
        }
    }

    fn latched(&self) -> Option<Error> {
        self.last_err
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|e| match e {
                Error::Latched(msg) => Error::Latched(msg.clone()),
                other => Error::Latched(other.to_string()),
            })
    }

    fn clear_latched(&self) {
        *self.last_err.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Dials the endpoint and starts the session's read loop. Fails if
    /// a session already exists.
    pub async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(Error::SessionAlreadyActive);
        }
        *session = Some(self.open_session().await?);
        self.clear_latched();
        Ok(())
    }

    async fn open_session(&self) -> Result<Session> {
        let mut request = self.opts.url.as_str().into_client_request()?;
        if let Some(auth) = &self.opts.auth {
            let token = auth.token();
            if !token.is_empty() {
                let value = HeaderValue::from_str(&token)
                    .map_err(|_| Error::Codec("authorization token is not a header value".into()))?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }
        }
        debug!("connecting to {}", self.opts.url);
        let (ws, _response) = connect_async(request).await?;
        let conn = Connection::new(ws, self.opts.connection.clone());
        if let Some(handler) = &self.opts.read_handler {
            conn.set_read_handler(handler.clone());
        }

        let read_task = {
            let conn = conn.clone();
            let latch = Arc::clone(&self.last_err);
            tokio::spawn(async move {
                if let Err(e) = conn.listen().await {
                    error!("websocket read loop failed: {e}");
                    *latch.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                }
            })
        };
        Ok(Session { conn, read_task })
    }

    /// Closes the session if one exists; not an error otherwise.
    pub async fn disconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(session) = session.take() {
            let _ = session.conn.close().await;
            session.read_task.abort();
        }
        Ok(())
    }

    /// Closes the existing session and opens a new one in the same
    /// critical section. A failure to reopen is also latched.
    pub async fn reconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            let _ = old.conn.close().await;
            old.read_task.abort();
        }
        match self.open_session().await {
            Ok(new) => {
                *session = Some(new);
                self.clear_latched();
                Ok(())
            }
            Err(e) => {
                *self.last_err.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Error::Latched(e.to_string()));
                Err(e)
            }
        }
    }

    /// Serialises `msg` and writes it as a single binary frame. While
    /// a read-loop error is latched, every send fails with a copy of
    /// it; `connect` or `reconnect` clears the latch.
    pub async fn send_message(&self, msg: &mut (dyn Sendable + '_)) -> Result<()> {
        let bytes = msg.to_bytes()?;
        self.send_raw(&bytes).await
    }

    /// As `send_message`, with pre-marshalled bytes.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        if let Some(e) = self.latched() {
            return Err(e);
        }
        let session = self.session.lock().await;
        let session = session.as_ref().ok_or(Error::NoSession)?;
        session.conn.write(bytes).await?;
        Ok(())
    }
}
