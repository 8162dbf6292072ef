//! TLS stage backed by BoringSSL.
//!
//! The stage starts in passthrough so that a proxy `CONNECT` travels in
//! clear text; the stage above calls [`SecureFilter::start_tls`] once the
//! byte stream reaches the origin.

use super::{Destination, Filter, SecureFilter};
use crate::base::neterror::NetError;
use boring::ssl::{SslConnector, SslMethod, SslVerifyMode, SslVersion};
use futures::future::BoxFuture;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_boring::SslStream;

/// Client TLS settings.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub min_version: Option<SslVersion>,
    pub max_version: Option<SslVersion>,
    pub alpn_protos: Vec<String>,
    pub verify: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TlsConfig {
    pub fn new(verify: bool) -> Self {
        Self {
            min_version: Some(SslVersion::TLS1_2),
            max_version: Some(SslVersion::TLS1_3),
            alpn_protos: vec!["http/1.1".to_string()],
            verify,
        }
    }

    /// ALPN protocol list in wire format.
    fn alpn_wire(&self) -> Result<Vec<u8>, NetError> {
        let mut wire = Vec::new();
        for proto in &self.alpn_protos {
            if proto.is_empty() || proto.len() > 255 {
                return Err(NetError::SslProtocolError);
            }
            wire.push(proto.len() as u8);
            wire.extend_from_slice(proto.as_bytes());
        }
        Ok(wire)
    }

    pub fn connector(&self) -> Result<SslConnector, NetError> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;
        builder
            .set_min_proto_version(self.min_version)
            .map_err(|_| NetError::SslProtocolError)?;
        builder
            .set_max_proto_version(self.max_version)
            .map_err(|_| NetError::SslProtocolError)?;
        if !self.alpn_protos.is_empty() {
            builder
                .set_alpn_protos(&self.alpn_wire()?)
                .map_err(|_| NetError::SslProtocolError)?;
        }
        builder.set_verify(if self.verify {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });
        Ok(builder.build())
    }

    /// SNI must not be sent for IP literals (RFC 6066).
    pub fn should_set_sni(host: &str) -> bool {
        host.parse::<std::net::IpAddr>().is_err()
    }
}

enum Layer<S> {
    Plain(S),
    Tls(SslStream<S>),
    /// Only observable if a handshake future is dropped midway.
    Detached,
}

pub struct SecurityFilter<S> {
    layer: Layer<S>,
    connector: SslConnector,
    verify: bool,
}

impl<S: Filter> SecurityFilter<S> {
    pub fn new(lower: S, connector: SslConnector, verify: bool) -> Self {
        Self {
            layer: Layer::Plain(lower),
            connector,
            verify,
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.layer, Layer::Tls(_))
    }

    fn detached() -> io::Error {
        io::Error::from(io::ErrorKind::NotConnected)
    }
}

impl<S: Filter> Filter for SecurityFilter<S> {
    fn connect<'a>(&'a mut self, dest: &'a Destination) -> BoxFuture<'a, Result<(), NetError>> {
        Box::pin(async move {
            match &mut self.layer {
                Layer::Plain(lower) => lower.connect(dest).await,
                _ => Err(NetError::InvalidState),
            }
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match &self.layer {
            Layer::Plain(s) => s.local_addr(),
            Layer::Tls(s) => s.get_ref().local_addr(),
            Layer::Detached => None,
        }
    }
}

impl<S: Filter> SecureFilter for SecurityFilter<S> {
    fn start_tls<'a>(&'a mut self, host: &'a str) -> BoxFuture<'a, Result<(), NetError>> {
        Box::pin(async move {
            let plain = match std::mem::replace(&mut self.layer, Layer::Detached) {
                Layer::Plain(s) => s,
                other => {
                    self.layer = other;
                    return Err(NetError::InvalidState);
                }
            };

            let mut config = self
                .connector
                .configure()
                .map_err(|_| NetError::SslProtocolError)?;
            if !TlsConfig::should_set_sni(host) {
                config.set_use_server_name_indication(false);
            }
            if !self.verify {
                config.set_verify_hostname(false);
            }

            let stream = tokio_boring::connect(config, host, plain).await.map_err(|_| {
                tracing::debug!(host = %host, "tls handshake failed");
                NetError::SslProtocolError
            })?;
            tracing::debug!(host = %host, "tls established");
            self.layer = Layer::Tls(stream);
            Ok(())
        })
    }
}

impl<S: Filter> AsyncRead for SecurityFilter<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.layer {
            Layer::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Layer::Tls(s) => Pin::new(s).poll_read(cx, buf),
            Layer::Detached => Poll::Ready(Err(Self::detached())),
        }
    }
}

impl<S: Filter> AsyncWrite for SecurityFilter<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.layer {
            Layer::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Layer::Tls(s) => Pin::new(s).poll_write(cx, buf),
            Layer::Detached => Poll::Ready(Err(Self::detached())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.layer {
            Layer::Plain(s) => Pin::new(s).poll_flush(cx),
            Layer::Tls(s) => Pin::new(s).poll_flush(cx),
            Layer::Detached => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.layer {
            Layer::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Layer::Tls(s) => Pin::new(s).poll_shutdown(cx),
            Layer::Detached => Poll::Ready(Ok(())),
        }
    }
}
