//! Proxy authentication state and the per-proxy credential cache.
//!
//! A tunnel that authenticated successfully leaves its scheme (and, for
//! Digest, the challenge) in the cache, so the next tunnel through the same
//! proxy sends credentials with its first `CONNECT`.

use crate::base::neterror::NetError;
use crate::http::digestauth::{self, DigestChallenge, DigestParams};
use crate::socket::proxy::ProxyCredentials;
use dashmap::DashMap;
use std::sync::Arc;

/// Authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    #[default]
    None,
    Basic,
    Digest,
}

/// One supported challenge taken from `Proxy-Authenticate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Basic { realm: String },
    Digest(DigestChallenge),
}

impl AuthChallenge {
    /// Parse a single `Proxy-Authenticate` value. `None` for schemes this
    /// engine cannot answer.
    pub fn parse(value: &str) -> Result<Option<Self>, NetError> {
        let value = value.trim();
        let (scheme, params) = value.split_once(' ').unwrap_or((value, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            let realm = digestauth::split_params(params)
                .into_iter()
                .filter_map(|p| digestauth::parse_param(p).ok())
                .find(|(k, _)| k.eq_ignore_ascii_case("realm"))
                .map(|(_, v)| v.to_string())
                .unwrap_or_default();
            return Ok(Some(AuthChallenge::Basic { realm }));
        }
        if scheme.eq_ignore_ascii_case("digest") {
            return match DigestChallenge::parse(params) {
                Ok(c) => Ok(Some(AuthChallenge::Digest(c))),
                Err(NetError::ProxyAuthUnsupported) => Ok(None),
                Err(e) => Err(e),
            };
        }
        Ok(None)
    }

    /// First supported challenge among all header values, in order.
    pub fn select<'a>(values: impl IntoIterator<Item = &'a str>) -> Result<Self, NetError> {
        for value in values {
            if let Some(challenge) = Self::parse(value)? {
                return Ok(challenge);
            }
        }
        Err(NetError::ProxyAuthenticationFailed)
    }
}

/// What is known about authenticating against one proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyAuthState {
    pub scheme: AuthScheme,
    pub challenge: Option<DigestChallenge>,
    pub nonce_count: u32,
}

impl ProxyAuthState {
    pub fn from_challenge(challenge: AuthChallenge) -> Self {
        match challenge {
            AuthChallenge::Basic { .. } => Self {
                scheme: AuthScheme::Basic,
                challenge: None,
                nonce_count: 0,
            },
            AuthChallenge::Digest(c) => Self {
                scheme: AuthScheme::Digest,
                challenge: Some(c),
                nonce_count: 0,
            },
        }
    }

    /// Next `Proxy-Authorization` value for a `CONNECT` to `authority`.
    /// Digest bumps the nonce count on every call.
    pub fn authorization(
        &mut self,
        creds: &ProxyCredentials,
        authority: &str,
    ) -> Result<Option<String>, NetError> {
        match (self.scheme, &self.challenge) {
            (AuthScheme::None, _) => Ok(None),
            (AuthScheme::Basic, _) => Ok(Some(creds.basic_header())),
            (AuthScheme::Digest, Some(challenge)) => {
                self.nonce_count += 1;
                let cnonce = digestauth::generate_cnonce();
                let header = challenge.authorization(&DigestParams {
                    method: "CONNECT",
                    uri: authority,
                    username: &creds.username,
                    password: creds.password.as_str(),
                    nonce_count: self.nonce_count,
                    cnonce: &cnonce,
                })?;
                Ok(Some(header))
            }
            (AuthScheme::Digest, None) => Err(NetError::ProxyAuthenticationFailed),
        }
    }
}

/// Thread-safe cache keyed by proxy `host:port`.
#[derive(Clone, Default)]
pub struct AuthCache {
    entries: Arc<DashMap<(String, u16), ProxyAuthState>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(host: &str, port: u16) -> (String, u16) {
        (host.to_ascii_lowercase(), port)
    }

    /// Preemptive `Proxy-Authorization` for a proxy that authenticated before.
    pub fn authorization(
        &self,
        host: &str,
        port: u16,
        creds: &ProxyCredentials,
        authority: &str,
    ) -> Result<Option<String>, NetError> {
        match self.entries.get_mut(&Self::key(host, port)) {
            Some(mut state) => state.authorization(creds, authority),
            None => Ok(None),
        }
    }

    pub fn lookup(&self, host: &str, port: u16) -> Option<ProxyAuthState> {
        self.entries.get(&Self::key(host, port)).map(|e| e.clone())
    }

    pub fn store(&self, host: &str, port: u16, state: ProxyAuthState) {
        self.entries.insert(Self::key(host, port), state);
    }

    /// Forget a proxy, e.g. after its cached credentials were rejected.
    pub fn remove(&self, host: &str, port: u16) {
        self.entries.remove(&Self::key(host, port));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for AuthCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCache").field("entries", &self.entries.len()).finish()
    }
}
