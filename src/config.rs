//! Connector configuration.
//!
//! Immutable once built. Construct with [`ConnectorConfiguration::builder`],
//! take the defaults, or load from JSON with millisecond timeouts:
//!
//! ```json
//! {
//!   "connect_timeout_ms": 2000,
//!   "max_connections_per_destination": 2,
//!   "proxy": { "url": "http://proxy.local:3128", "username": "u", "password": "p" }
//! }
//! ```

use crate::base::neterror::NetError;
use crate::socket::proxy::ProxySettings;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_CONNECTIONS_PER_DESTINATION: usize = 5;
const DEFAULT_MAX_REDIRECTS: u32 = 5;

/// Tunables shared by every connection a client creates.
#[derive(Debug, Clone)]
pub struct ConnectorConfiguration {
    connect_timeout: Duration,
    response_timeout: Duration,
    idle_timeout: Duration,
    max_connections_per_destination: usize,
    max_redirects: u32,
    follow_redirects: bool,
    proxy: Option<ProxySettings>,
    verify_certificates: bool,
}

impl Default for ConnectorConfiguration {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_connections_per_destination: DEFAULT_MAX_CONNECTIONS_PER_DESTINATION,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            follow_redirects: true,
            proxy: None,
            verify_certificates: true,
        }
    }
}

impl ConnectorConfiguration {
    pub fn builder() -> ConnectorConfigurationBuilder {
        ConnectorConfigurationBuilder {
            config: Self::default(),
        }
    }

    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        let raw: RawConfiguration = serde_json::from_str(json).map_err(|e| {
            tracing::warn!(error = %e, "rejecting connector configuration");
            NetError::InvalidConfiguration
        })?;
        raw.into_configuration()
    }

    /// Time allowed from connection creation to an established tunnel or socket.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Time allowed from the request being written to the end of the response body.
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// How long a pooled connection may sit idle before it is closed.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn max_connections_per_destination(&self) -> usize {
        self.max_connections_per_destination
    }

    pub fn max_redirects(&self) -> u32 {
        self.max_redirects
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    pub fn verify_certificates(&self) -> bool {
        self.verify_certificates
    }

    fn validate(self) -> Result<Self, NetError> {
        let zero = Duration::ZERO;
        if self.connect_timeout == zero
            || self.response_timeout == zero
            || self.idle_timeout == zero
        {
            tracing::warn!("timeouts must be non-zero");
            return Err(NetError::InvalidConfiguration);
        }
        if self.max_connections_per_destination == 0 {
            tracing::warn!("max_connections_per_destination must be at least 1");
            return Err(NetError::InvalidConfiguration);
        }
        Ok(self)
    }
}

/// Builder for [`ConnectorConfiguration`].
#[derive(Debug, Clone)]
pub struct ConnectorConfigurationBuilder {
    config: ConnectorConfiguration,
}

impl ConnectorConfigurationBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn max_connections_per_destination(mut self, max: usize) -> Self {
        self.config.max_connections_per_destination = max;
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.config.max_redirects = max;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    pub fn no_proxy(mut self) -> Self {
        self.config.proxy = None;
        self
    }

    /// Disable certificate verification. Test servers only.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.config.verify_certificates = !accept;
        self
    }

    pub fn build(self) -> Result<ConnectorConfiguration, NetError> {
        self.config.validate()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfiguration {
    connect_timeout_ms: Option<u64>,
    response_timeout_ms: Option<u64>,
    idle_timeout_ms: Option<u64>,
    max_connections_per_destination: Option<usize>,
    max_redirects: Option<u32>,
    follow_redirects: Option<bool>,
    verify_certificates: Option<bool>,
    proxy: Option<RawProxy>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProxy {
    url: String,
    username: Option<String>,
    password: Option<String>,
    #[serde(default)]
    no_proxy: String,
}

impl RawConfiguration {
    fn into_configuration(self) -> Result<ConnectorConfiguration, NetError> {
        let mut config = ConnectorConfiguration::default();
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.response_timeout_ms {
            config.response_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.idle_timeout_ms {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_connections_per_destination {
            config.max_connections_per_destination = max;
        }
        if let Some(max) = self.max_redirects {
            config.max_redirects = max;
        }
        if let Some(follow) = self.follow_redirects {
            config.follow_redirects = follow;
        }
        if let Some(verify) = self.verify_certificates {
            config.verify_certificates = verify;
        }
        if let Some(raw) = self.proxy {
            let mut proxy = ProxySettings::new(&raw.url)
                .map_err(|_| NetError::InvalidConfiguration)?
                .with_bypass(&raw.no_proxy);
            if let Some(user) = raw.username {
                proxy = proxy.with_auth(&user, raw.password.as_deref().unwrap_or_default());
            }
            config.proxy = Some(proxy);
        }
        config.validate()
    }
}
