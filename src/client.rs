//! Forward client over a stream transport.
//!
//! Owns at most one connected session. When acknowledgements are
//! required the client assigns the message a chunk id before
//! serialising, writes the message, and matches the collector's `ack`
//! against that id. There is no buffering or retry; callers reconnect
//! after a failure.

use std::time::Duration;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::protocol::{scan, Ack, Sendable};
use crate::transport::{ConnFactory, Stream};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request and wait for a per-chunk acknowledgement on every send.
    pub require_ack: bool,
    pub ack_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            require_ack: false,
            ack_timeout: Duration::from_secs(3),
        }
    }
}

pub struct Client {
    factory: ConnFactory,
    config: ClientConfig,
    session: Mutex<Option<Box<dyn Stream>>>,
}

impl Client {
    pub fn new(factory: ConnFactory, config: ClientConfig) -> Self {
        Self {
            factory,
            config,
            session: Mutex::new(None),
        }
    }

    pub async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(Error::SessionAlreadyActive);
        }
        *session = Some(self.factory.connect().await?);
        Ok(())
    }

    /// Closes the session if one exists; not an error otherwise.
    pub async fn disconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(mut stream) = session.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    /// Closes the existing session and dials a new one in the same
    /// critical section.
    pub async fn reconnect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if let Some(mut stream) = session.take() {
            let _ = stream.shutdown().await;
        }
        *session = Some(self.factory.connect().await?);
        Ok(())
    }

    /// Serialises `msg` and writes it as one unit. With `require_ack`
    /// set, assigns the chunk id first and waits for the matching ACK.
    pub async fn send(&self, msg: &mut (dyn Sendable + '_)) -> Result<()> {
        let chunk = if self.config.require_ack {
            Some(msg.chunk()?)
        } else {
            None
        };
        let bytes = msg.to_bytes()?;
        self.write_and_ack(&bytes, chunk.as_deref()).await
    }

    /// Writes pre-marshalled bytes verbatim. With `require_ack` set,
    /// the chunk id is recovered from the bytes by the scanner.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        let chunk = if self.config.require_ack {
            Some(scan::chunk_from_bytes(bytes)?)
        } else {
            None
        };
        self.write_and_ack(bytes, chunk.as_deref()).await
    }

    async fn write_and_ack(&self, bytes: &[u8], chunk: Option<&str>) -> Result<()> {
        let mut session = self.session.lock().await;
        let stream = session.as_mut().ok_or(Error::NoSession)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        if let Some(chunk) = chunk {
            tokio::time::timeout(self.config.ack_timeout, read_ack(stream, chunk))
                .await
                .map_err(|_| Error::Timeout)??;
            debug!("ack received for chunk {chunk}");
        }
        Ok(())
    }
}

async fn read_ack(stream: &mut Box<dyn Stream>, chunk: &str) -> Result<()> {
    let mut buf = Vec::with_capacity(256);
    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        match scan::value_len(&buf)? {
            Some(len) => {
                let (ack, _) = Ack::unmarshal(&buf[..len])?;
                if ack.ack == chunk {
                    return Ok(());
                }
                return Err(Error::AckMismatch {
                    expected: chunk.to_owned(),
                    got: ack.ack,
                });
            }
            None => continue,
        }
    }
}
