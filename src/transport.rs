//! Stream-transport dialling.
//!
//! One factory abstraction covers TCP, Unix-domain sockets, and TLS
//! over TCP; its only contract is to return a connected bidirectional
//! byte stream.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::{Error, Result};

#[cfg(feature = "tls")]
use std::sync::Arc;
#[cfg(feature = "tls")]
use tokio_rustls::rustls;
#[cfg(feature = "tls")]
use tokio_rustls::TlsConnector;

/// A connected bidirectional byte stream.
pub trait Stream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}

impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin> Stream for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Unix,
}

/// Dials connections for the forward client.
#[derive(Clone)]
pub struct ConnFactory {
    pub network: Network,
    pub address: String,
    #[cfg(feature = "tls")]
    pub tls: Option<Arc<rustls::ClientConfig>>,
    pub timeout: Option<Duration>,
}

impl ConnFactory {
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            network: Network::Tcp,
            address: address.into(),
            #[cfg(feature = "tls")]
            tls: None,
            timeout: None,
        }
    }

    pub fn unix(path: impl Into<String>) -> Self {
        Self {
            network: Network::Unix,
            address: path.into(),
            #[cfg(feature = "tls")]
            tls: None,
            timeout: None,
        }
    }

    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn connect(&self) -> Result<Box<dyn Stream>> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.dial())
                .await
                .map_err(|_| Error::Timeout)?,
            None => self.dial().await,
        }
    }

    async fn dial(&self) -> Result<Box<dyn Stream>> {
        match self.network {
            Network::Tcp => {
                let stream = TcpStream::connect(&self.address).await?;
                #[cfg(feature = "tls")]
                if let Some(config) = &self.tls {
                    let host = self.address.split(':').next().unwrap_or(&self.address);
                    let name = rustls::ServerName::try_from(host).map_err(|_| {
                        Error::Codec(format!("invalid TLS server name {host:?}"))
                    })?;
                    let connector = TlsConnector::from(config.clone());
                    let stream = connector.connect(name, stream).await?;
                    return Ok(Box::new(stream));
                }
                Ok(Box::new(stream))
            }
            Network::Unix => {
                #[cfg(unix)]
                {
                    let stream = tokio::net::UnixStream::connect(&self.address).await?;
                    Ok(Box::new(stream))
                }
                #[cfg(not(unix))]
                {
                    Err(Error::Codec(
                        "unix sockets are not supported on this platform".into(),
                    ))
                }
            }
        }
    }
}
