//! The request handed to the engine.

use crate::base::neterror::NetError;
use crate::http::orderedheaders::OrderedHeaderMap;
use crate::http::requestbody::RequestBody;
use http::Method;
use url::Url;

/// An HTTP request as consumed by the connection pool.
///
/// The engine never looks at the entity beyond its framing: a request is
/// either bodyless, carries buffered bytes, or carries a chunk producer.
#[derive(Debug)]
pub struct HttpRequest {
    method: Method,
    url: Url,
    headers: OrderedHeaderMap,
    body: RequestBody,
    follow_redirects: Option<bool>,
}

impl HttpRequest {
    /// Create a bodyless request.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: OrderedHeaderMap::new(),
            body: RequestBody::Empty,
            follow_redirects: None,
        }
    }

    /// Parse `url` and create a bodyless request.
    pub fn parse(method: Method, url: &str) -> Result<Self, NetError> {
        let url = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        Ok(Self::new(method, url))
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, NetError> {
        self.headers.append(name, value)?;
        Ok(self)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &OrderedHeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut OrderedHeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Take the body out, leaving the request bodyless.
    pub fn take_body(&mut self) -> RequestBody {
        std::mem::take(&mut self.body)
    }

    /// True when the request carries no entity at all.
    pub fn is_bodyless(&self) -> bool {
        self.body.is_empty()
    }

    /// Override the client-wide redirect setting for this request.
    pub fn set_follow_redirects(&mut self, follow: bool) {
        self.follow_redirects = Some(follow);
    }

    pub fn follow_redirects(&self) -> Option<bool> {
        self.follow_redirects
    }

    /// The origin-form request target: path plus query.
    pub fn request_target(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }

    /// Value for the `Host` header; the port is included only when it is not
    /// the scheme default.
    pub fn host_header(&self) -> Result<String, NetError> {
        let host = self.url.host_str().ok_or(NetError::InvalidUrl)?;
        Ok(match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    /// Whether the caller asked for the connection to be closed afterwards.
    pub fn wants_close(&self) -> bool {
        self.headers.has_token("connection", "close")
    }
}
