//! Raw TCP stage: name resolution and socket connect.

use super::{Destination, Filter};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use futures::future::BoxFuture;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// The bottom of the chain. Connecting again replaces the socket.
#[derive(Debug, Default)]
pub struct TransportFilter {
    stream: Option<TcpStream>,
}

impl TransportFilter {
    pub fn new() -> Self {
        Self { stream: None }
    }

    async fn open(dest: &Destination) -> Result<TcpStream, NetError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((dest.bare_host(), dest.port))
            .await
            .dns_context(&dest.host)?
            .collect();
        if addrs.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        let mut last_err = NetError::ConnectionFailed;
        for addr in addrs {
            match TcpStream::connect(addr).await.connection_context(&dest.host, dest.port) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    tracing::debug!(%addr, host = %dest.host, "tcp connected");
                    return Ok(stream);
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Filter for TransportFilter {
    fn connect<'a>(&'a mut self, dest: &'a Destination) -> BoxFuture<'a, Result<(), NetError>> {
        Box::pin(async move {
            self.stream = None;
            self.stream = Some(Self::open(dest).await?);
            Ok(())
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }
}

impl AsyncRead for TransportFilter {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.stream() {
            Ok(s) => Pin::new(s).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for TransportFilter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.stream() {
            Ok(s) => Pin::new(s).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.stream() {
            Ok(s) => Pin::new(s).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.stream.as_mut() {
            Some(s) => Pin::new(s).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}
