//! The per-connection filter pipeline.
//!
//! Stages are composed by construction into one statically typed chain:
//!
//! ```text
//! HttpFilter<ProxyFilter<SecurityFilter<TransportFilter>>>
//! ```
//!
//! - [`transport`]: resolves the address and owns the TCP socket
//! - [`tls`]: passthrough until `start_tls`, then a BoringSSL stream
//! - [`proxy`]: `CONNECT` tunnel and proxy authentication, then transparent
//! - [`http`]: HTTP/1.1 request writing and response reading
//!
//! Each byte-level stage is itself `AsyncRead + AsyncWrite`, so the stage
//! above sees a plain byte stream once `connect` has returned.

pub mod http;
pub mod proxy;
pub mod redirect;
pub mod tls;
pub mod transport;

use crate::base::neterror::NetError;
use crate::config::ConnectorConfiguration;
use crate::socket::authcache::AuthCache;
use crate::socket::proxy::ProxySettings;
use boring::ssl::SslConnector;
use futures::future::BoxFuture;
use std::fmt;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

pub use self::http::HttpFilter;
pub use self::proxy::ProxyFilter;
pub use self::redirect::{Exchange, RedirectFilter};
pub use self::tls::SecurityFilter;
pub use self::transport::TransportFilter;

/// The chain every pooled connection drives.
pub type FilterChain = HttpFilter<ProxyFilter<SecurityFilter<TransportFilter>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Where a connection goes: the pool key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(scheme: Scheme, host: &str, port: u16) -> Self {
        Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    pub fn from_url(url: &Url) -> Result<Self, NetError> {
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(NetError::UnknownUrlScheme),
        };
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;
        Ok(Self::new(scheme, host, port))
    }

    /// `host:port`, the `CONNECT` request target.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Host without IPv6 brackets, as used for SNI and name resolution.
    pub fn bare_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

/// A byte-level stage of the pipeline.
pub trait Filter: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Establish this stage (and everything below it) toward `dest`.
    fn connect<'a>(&'a mut self, dest: &'a Destination) -> BoxFuture<'a, Result<(), NetError>>;

    /// Local address of the underlying socket, once connected.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// A stage that can switch its byte stream to TLS on request.
pub trait SecureFilter: Filter {
    fn start_tls<'a>(&'a mut self, host: &'a str) -> BoxFuture<'a, Result<(), NetError>>;
}

/// Builds a fresh chain for every new connection.
#[derive(Clone)]
pub struct ChainFactory {
    tls: SslConnector,
    verify: bool,
    proxy: Option<ProxySettings>,
    auth_cache: AuthCache,
}

impl ChainFactory {
    pub fn new(config: &ConnectorConfiguration, auth_cache: AuthCache) -> Result<Self, NetError> {
        let tls = tls::TlsConfig::new(config.verify_certificates()).connector()?;
        Ok(Self {
            tls,
            verify: config.verify_certificates(),
            proxy: config.proxy().cloned(),
            auth_cache,
        })
    }

    pub fn build(&self) -> FilterChain {
        let transport = TransportFilter::new();
        let security = SecurityFilter::new(transport, self.tls.clone(), self.verify);
        let proxy = ProxyFilter::new(security, self.proxy.clone(), self.auth_cache.clone());
        HttpFilter::new(proxy)
    }
}

impl fmt::Debug for ChainFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainFactory")
            .field("verify", &self.verify)
            .field("proxy", &self.proxy)
            .finish()
    }
}
