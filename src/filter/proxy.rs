//! Proxy stage: `CONNECT` tunneling with Basic and Digest authentication.
//!
//! Every proxied destination is tunneled, plain http included, so the stages
//! above always talk origin-form HTTP to the origin. Once the tunnel is up
//! this stage is a transparent byte pipe.

use super::{Destination, Filter, Scheme, SecureFilter};
use crate::base::neterror::NetError;
use crate::http::orderedheaders::OrderedHeaderMap;
use crate::socket::authcache::{AuthCache, AuthChallenge, ProxyAuthState};
use crate::socket::proxy::ProxySettings;
use bytes::{Buf, BytesMut};
use futures::future::BoxFuture;
use http::header::{HeaderName, HeaderValue};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

const MAX_CONNECT_REPLY: usize = 16 * 1024;
const MAX_REPLY_HEADERS: usize = 64;

/// Status and headers of the proxy's answer to `CONNECT`.
#[derive(Debug)]
struct ConnectReply {
    status: u16,
    headers: OrderedHeaderMap,
    content_length: Option<u64>,
    /// The proxy will keep the socket open after this reply.
    keep_alive: bool,
}

pub struct ProxyFilter<L> {
    lower: L,
    proxy: Option<ProxySettings>,
    auth_cache: AuthCache,
    /// Bytes read past the end of a `CONNECT` reply.
    pending: BytesMut,
}

impl<L: SecureFilter> ProxyFilter<L> {
    pub fn new(lower: L, proxy: Option<ProxySettings>, auth_cache: AuthCache) -> Self {
        Self {
            lower,
            proxy,
            auth_cache,
            pending: BytesMut::new(),
        }
    }

    /// The proxy to use for `dest`, if any.
    fn proxy_for(&self, dest: &Destination) -> Option<ProxySettings> {
        self.proxy
            .as_ref()
            .filter(|p| !p.should_bypass(dest.bare_host(), dest.port))
            .cloned()
    }

    async fn establish(&mut self, dest: &Destination) -> Result<(), NetError> {
        match self.proxy_for(dest) {
            Some(proxy) => {
                let proxy_dest = Destination::new(Scheme::Http, proxy.host(), proxy.port());
                self.lower.connect(&proxy_dest).await.map_err(|e| {
                    tracing::warn!(proxy = %proxy_dest, error = %e, "proxy unreachable");
                    e
                })?;
                self.tunnel(&proxy, &proxy_dest, dest).await?;
            }
            None => self.lower.connect(dest).await?,
        }
        if dest.is_secure() {
            self.lower.start_tls(dest.bare_host()).await?;
        }
        Ok(())
    }

    async fn tunnel(
        &mut self,
        proxy: &ProxySettings,
        proxy_dest: &Destination,
        dest: &Destination,
    ) -> Result<(), NetError> {
        let authority = dest.authority();
        let creds = proxy.credentials();

        let mut authorization = match creds {
            Some(c) => self
                .auth_cache
                .authorization(proxy.host(), proxy.port(), c, &authority)?,
            None => None,
        };
        let mut learned: Option<ProxyAuthState> = None;

        loop {
            self.write_connect(&authority, authorization.as_deref()).await?;
            let reply = self.read_reply().await?;
            tracing::debug!(proxy = %proxy_dest, target = %authority, status = reply.status, "CONNECT reply");

            match reply.status {
                200..=299 => {
                    if let Some(state) = learned {
                        self.auth_cache.store(proxy.host(), proxy.port(), state);
                    }
                    return Ok(());
                }
                407 => {
                    if learned.is_some() {
                        self.auth_cache.remove(proxy.host(), proxy.port());
                        tracing::warn!(proxy = %proxy_dest, "proxy rejected credentials");
                        return Err(NetError::ProxyAuthenticationFailed);
                    }
                    let creds = creds.ok_or_else(|| {
                        tracing::warn!(proxy = %proxy_dest, "proxy requires credentials");
                        NetError::ProxyAuthenticationFailed
                    })?;
                    let challenge = AuthChallenge::select(
                        reply
                            .headers
                            .get_all("proxy-authenticate")
                            .filter_map(|v| v.to_str().ok()),
                    )?;
                    let mut state = ProxyAuthState::from_challenge(challenge);
                    authorization = state.authorization(creds, &authority)?;
                    learned = Some(state);

                    if let (true, Some(len)) = (reply.keep_alive, reply.content_length) {
                        self.skip_body(len).await?;
                    } else {
                        tracing::debug!(proxy = %proxy_dest, "proxy closed after 407, reconnecting");
                        self.pending.clear();
                        self.lower.connect(proxy_dest).await?;
                    }
                }
                _ => return Err(NetError::TunnelConnectionFailed),
            }
        }
    }

    async fn write_connect(
        &mut self,
        authority: &str,
        authorization: Option<&str>,
    ) -> Result<(), NetError> {
        let mut req = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
        if let Some(auth) = authorization {
            req.push_str("Proxy-Authorization: ");
            req.push_str(auth);
            req.push_str("\r\n");
        }
        req.push_str("\r\n");
        self.lower.write_all(req.as_bytes()).await?;
        self.lower.flush().await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<ConnectReply, NetError> {
        loop {
            if let Some(reply) = parse_reply(&mut self.pending)? {
                return Ok(reply);
            }
            if self.pending.len() > MAX_CONNECT_REPLY {
                return Err(NetError::ResponseHeadersTooBig);
            }
            if self.lower.read_buf(&mut self.pending).await? == 0 {
                return Err(if self.pending.is_empty() {
                    NetError::ConnectionClosed
                } else {
                    NetError::InvalidResponse
                });
            }
        }
    }

    async fn skip_body(&mut self, mut remaining: u64) -> Result<(), NetError> {
        loop {
            let n = remaining.min(self.pending.len() as u64) as usize;
            self.pending.advance(n);
            remaining -= n as u64;
            if remaining == 0 {
                return Ok(());
            }
            if self.lower.read_buf(&mut self.pending).await? == 0 {
                return Err(NetError::ConnectionClosed);
            }
        }
    }
}

/// Parse a complete reply head off the front of `buf`, if there is one.
fn parse_reply(buf: &mut BytesMut) -> Result<Option<ConnectReply>, NetError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_REPLY_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    let consumed = match resp.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(_) => return Err(NetError::InvalidResponse),
    };
    let status = resp.code.ok_or(NetError::InvalidResponse)?;

    let mut map = OrderedHeaderMap::new();
    for h in resp.headers.iter() {
        let name = HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| NetError::InvalidResponse)?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| NetError::InvalidResponse)?;
        map.append_typed(name, value);
    }
    let content_length = match map.get_str("content-length") {
        Some(v) => Some(v.trim().parse::<u64>().map_err(|_| NetError::InvalidResponse)?),
        None => None,
    };
    let close = map.has_token("connection", "close") || map.has_token("proxy-connection", "close");
    let keep_alive = resp.version == Some(1) && !close && content_length.is_some();
    buf.advance(consumed);

    Ok(Some(ConnectReply {
        status,
        headers: map,
        content_length,
        keep_alive,
    }))
}

impl<L: SecureFilter> Filter for ProxyFilter<L> {
    fn connect<'a>(&'a mut self, dest: &'a Destination) -> BoxFuture<'a, Result<(), NetError>> {
        Box::pin(async move {
            self.pending.clear();
            self.establish(dest).await
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.lower.local_addr()
    }
}

impl<L: SecureFilter> AsyncRead for ProxyFilter<L> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.remaining());
            buf.put_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.lower).poll_read(cx, buf)
    }
}

impl<L: SecureFilter> AsyncWrite for ProxyFilter<L> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.lower).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.lower).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.lower).poll_shutdown(cx)
    }
}
