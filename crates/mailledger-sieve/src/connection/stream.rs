//! Stream types for ManageSieve connections.

#![allow(clippy::missing_errors_doc)]

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info};

use super::config::{Config, Security};
use super::tls::{Fingerprints, TlsContext};
use crate::{Error, Result};

/// What the transport can tell about channel security.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityInfo {
    /// The channel is encrypted.
    pub secure: bool,
    /// Negotiated TLS version.
    pub protocol: Option<String>,
    /// Fingerprints of the server certificate.
    pub fingerprints: Option<Fingerprints>,
    /// DER encoding of the server certificate.
    pub der: Option<Vec<u8>>,
}

/// Byte transport under a ManageSieve connection.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + Sized + 'static {
    /// Returns true if the channel is encrypted.
    fn is_secure(&self) -> bool;

    /// Switches the channel to TLS after STARTTLS.
    fn upgrade(self, tls: &TlsContext) -> impl Future<Output = Result<Self>> + Send;

    /// Describes the channel security for diagnostics.
    fn security_info(&self) -> SecurityInfo;
}

/// A stream that can be either plaintext or TLS.
pub enum SieveStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for SieveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SieveStream::Plain"),
            Self::Tls(_) => f.write_str("SieveStream::Tls"),
        }
    }
}

impl SieveStream {
    /// Opens the connection described by `config`.
    ///
    /// With [`Security::Implicit`] the TLS handshake runs before returning.
    pub async fn connect(config: &Config, tls: Option<&TlsContext>) -> Result<Self> {
        let addr = (config.host.as_str(), config.port);
        debug!(host = %config.host, port = config.port, "Connecting");

        let tcp = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(config.connect_timeout))??;

        let stream = match (config.security, tls) {
            (Security::Implicit, Some(tls)) => {
                let tls = timeout(config.connect_timeout, tls.handshake(tcp))
                    .await
                    .map_err(|_| Error::Timeout(config.connect_timeout))??;
                Self::Tls(Box::new(tls))
            }
            (Security::Implicit, None) => {
                return Err(Error::InvalidState(
                    "implicit TLS requested without TLS settings".to_string(),
                ));
            }
            _ => Self::Plain(tcp),
        };

        info!(host = %config.host, port = config.port, secure = stream.is_secure(), "Connected");
        Ok(stream)
    }
}

impl Transport for SieveStream {
    fn is_secure(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    async fn upgrade(self, tls: &TlsContext) -> Result<Self> {
        match self {
            Self::Plain(tcp) => Ok(Self::Tls(Box::new(tls.handshake(tcp).await?))),
            Self::Tls(_) => Err(Error::InvalidState("Stream is already TLS".to_string())),
        }
    }

    fn security_info(&self) -> SecurityInfo {
        match self {
            Self::Plain(_) => SecurityInfo::default(),
            Self::Tls(stream) => {
                let (_, session) = stream.get_ref();
                let der = session
                    .peer_certificates()
                    .and_then(|certs| certs.first())
                    .map(|cert| cert.as_ref().to_vec());
                SecurityInfo {
                    secure: true,
                    protocol: session.protocol_version().map(|v| format!("{v:?}")),
                    fingerprints: der.as_deref().map(Fingerprints::of),
                    der,
                }
            }
        }
    }
}

/// In-memory transport, used to drive a session against a scripted peer.
impl Transport for DuplexStream {
    fn is_secure(&self) -> bool {
        false
    }

    async fn upgrade(self, _tls: &TlsContext) -> Result<Self> {
        Err(Error::InvalidState(
            "in-memory transport cannot be upgraded".to_string(),
        ))
    }

    fn security_info(&self) -> SecurityInfo {
        SecurityInfo::default()
    }
}

impl AsyncRead for SieveStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SieveStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_plain_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::None)
            .build();

        let (stream, accepted) = tokio::join!(SieveStream::connect(&config, None), listener.accept());
        let stream = stream.unwrap();
        accepted.unwrap();

        assert!(!stream.is_secure());
        assert_eq!(stream.security_info(), SecurityInfo::default());
    }

    #[tokio::test]
    async fn test_duplex_cannot_upgrade() {
        let (client, _server) = tokio::io::duplex(64);
        assert!(!client.is_secure());

        let tls = TlsContext::new(&Config::new("sieve.example.com")).unwrap();
        let err = client.upgrade(&tls).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_implicit_tls_requires_context() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::Implicit)
            .build();

        let (stream, _accepted) = tokio::join!(SieveStream::connect(&config, None), listener.accept());
        assert!(matches!(stream.unwrap_err(), Error::InvalidState(_)));
    }
}
