//! HTTP Digest Authentication (RFC 7616) for proxy challenges.
//!
//! ## Supported Features
//! - MD5, MD5-sess, SHA-256 and SHA-256-sess
//! - qop=auth, or the legacy no-qop form
//! - Nonce count carried by the caller so cached challenges can be reused

use crate::base::neterror::NetError;
use boring::hash::{hash, MessageDigest};
use std::fmt::Write;

/// Digest authentication algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// Not named in the challenge; behaves as MD5.
    #[default]
    Unspecified,
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Some(Self::Md5),
            "md5-sess" => Some(Self::Md5Sess),
            "sha-256" => Some(Self::Sha256),
            "sha-256-sess" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn digest(&self) -> MessageDigest {
        match self {
            Self::Sha256 | Self::Sha256Sess => MessageDigest::sha256(),
            _ => MessageDigest::md5(),
        }
    }
}

/// A parsed `Digest` challenge from `Proxy-Authenticate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    /// `Some("auth")` when the server offered qop=auth, else `None`.
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    pub stale: bool,
}

/// Inputs that vary per authorization attempt.
#[derive(Debug, Clone, Copy)]
pub struct DigestParams<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub nonce_count: u32,
    pub cnonce: &'a str,
}

impl DigestChallenge {
    /// Parse the parameter list that follows `Digest `.
    ///
    /// ```ignore
    /// let c = DigestChallenge::parse(r#"realm="proxy", nonce="abc123", qop="auth""#)?;
    /// ```
    pub fn parse(params: &str) -> Result<Self, NetError> {
        let mut challenge = Self {
            realm: String::new(),
            nonce: String::new(),
            qop: None,
            opaque: None,
            algorithm: DigestAlgorithm::default(),
            stale: false,
        };

        for part in split_params(params) {
            let (key, value) = parse_param(part)?;
            match key.to_ascii_lowercase().as_str() {
                "realm" => challenge.realm = value.to_string(),
                "nonce" => challenge.nonce = value.to_string(),
                "opaque" => challenge.opaque = Some(value.to_string()),
                "algorithm" => {
                    challenge.algorithm =
                        DigestAlgorithm::parse(value).ok_or(NetError::ProxyAuthUnsupported)?;
                }
                "qop" => {
                    if value.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")) {
                        challenge.qop = Some("auth".to_string());
                    }
                }
                "stale" => challenge.stale = value.eq_ignore_ascii_case("true"),
                _ => {}
            }
        }

        if challenge.nonce.is_empty() {
            return Err(NetError::InvalidResponse);
        }
        Ok(challenge)
    }

    /// The `response` digest value.
    ///
    /// With qop: `H(HA1:nonce:nc:cnonce:qop:HA2)`, otherwise `H(HA1:nonce:HA2)`,
    /// where `HA1 = H(user:realm:pass)` and `HA2 = H(method:uri)`.
    pub fn response(&self, p: &DigestParams<'_>) -> Result<String, NetError> {
        let mut ha1 = self.hex_hash(&format!("{}:{}:{}", p.username, self.realm, p.password))?;
        if self.algorithm.is_session() {
            ha1 = self.hex_hash(&format!("{}:{}:{}", ha1, self.nonce, p.cnonce))?;
        }
        let ha2 = self.hex_hash(&format!("{}:{}", p.method, p.uri))?;

        let input = match &self.qop {
            Some(qop) => format!(
                "{}:{}:{:08x}:{}:{}:{}",
                ha1, self.nonce, p.nonce_count, p.cnonce, qop, ha2
            ),
            None => format!("{}:{}:{}", ha1, self.nonce, ha2),
        };
        self.hex_hash(&input)
    }

    /// Full `Proxy-Authorization` value, `Digest` prefix included.
    pub fn authorization(&self, p: &DigestParams<'_>) -> Result<String, NetError> {
        let response = self.response(p)?;

        let mut auth = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            p.username, self.realm, self.nonce, p.uri
        );
        if self.algorithm != DigestAlgorithm::Unspecified {
            let _ = write!(auth, ", algorithm={}", self.algorithm.as_str());
        }
        let _ = write!(auth, ", response=\"{}\"", response);
        if let Some(opaque) = &self.opaque {
            let _ = write!(auth, ", opaque=\"{}\"", opaque);
        }
        if let Some(qop) = &self.qop {
            let _ = write!(
                auth,
                ", qop={}, nc={:08x}, cnonce=\"{}\"",
                qop, p.nonce_count, p.cnonce
            );
        }
        Ok(auth)
    }

    fn hex_hash(&self, input: &str) -> Result<String, NetError> {
        let digest = hash(self.algorithm.digest(), input.as_bytes())
            .map_err(|_| NetError::ProxyAuthenticationFailed)?;
        Ok(to_hex(&digest))
    }
}

/// Random client nonce, 16 hex chars.
pub fn generate_cnonce() -> String {
    let mut buf = [0u8; 8];
    if boring::rand::rand_bytes(&mut buf).is_err() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        buf = nanos.to_be_bytes();
    }
    to_hex(&buf)
}

fn to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// Split on commas that are not inside quotes.
pub(crate) fn split_params(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, c) in header.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                let part = header[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    let part = header[start..].trim();
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

/// `key=value` or `key="value"`.
pub(crate) fn parse_param(param: &str) -> Result<(&str, &str), NetError> {
    let (key, value) = param.split_once('=').ok_or(NetError::InvalidResponse)?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Ok((key.trim(), value))
}
