//! HTTP client with builder pattern.
//!
//! The client is the top of the stack: it owns a [`ConnectionPool`] behind a
//! [`RedirectFilter`], so every call is one logical invocation that may span
//! several exchanges.
//!
//! # Example
//!
//! ```rust,ignore
//! use h1net::Client;
//!
//! let client = Client::builder().build()?;
//! let resp = client.get("http://example.com/").send().await?;
//! println!("{} {}", resp.status(), resp.text().await?);
//! ```

use crate::base::neterror::NetError;
use crate::config::ConnectorConfiguration;
use crate::connection::listener::StateListener;
use crate::connection::pool::ConnectionPool;
use crate::filter::redirect::RedirectFilter;
use crate::http::request::HttpRequest;
use crate::http::requestbody::RequestBody;
use crate::http::response::HttpResponse;
use http::Method;
use std::sync::Arc;
use tokio::task::JoinHandle;

struct ClientInner {
    redirect: RedirectFilter<ConnectionPool>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.redirect.inner().shutdown();
    }
}

/// HTTP/1.1 client.
///
/// Cheap to clone; clones share the pool. The pool shuts down when the last
/// clone is dropped or on [`close`](Client::close).
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Client with the default configuration.
    pub fn new() -> Result<Self, NetError> {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn get<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn put<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn delete<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    pub fn head<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::HEAD, url)
    }

    pub fn patch<U: AsRef<str>>(&self, url: U) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// Start building a request with a custom method.
    pub fn request<U: AsRef<str>>(&self, method: Method, url: U) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            request: HttpRequest::parse(method, url.as_ref()),
        }
    }

    /// Run one logical invocation, following redirects per configuration.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, NetError> {
        self.inner.redirect.execute(request).await
    }

    /// Run `request` in the background and hand the outcome to `callback`.
    pub fn execute_with<F>(&self, request: HttpRequest, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<HttpResponse, NetError>) + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            let result = client.execute(request).await;
            callback(result);
        })
    }

    /// The connection pool, for introspection.
    pub fn pool(&self) -> &ConnectionPool {
        self.inner.redirect.inner()
    }

    pub fn config(&self) -> &ConnectorConfiguration {
        self.pool().config()
    }

    /// Abort in-flight exchanges, fail waiting callers and stop all timers.
    pub fn close(&self) {
        self.pool().shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.pool().is_shutdown()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("pool", self.pool()).finish()
    }
}

/// Builder for creating a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    config: Option<ConnectorConfiguration>,
    listeners: Vec<Arc<dyn StateListener>>,
}

impl ClientBuilder {
    pub fn config(mut self, config: ConnectorConfiguration) -> Self {
        self.config = Some(config);
        self
    }

    /// Observe every state transition of every connection the client opens.
    pub fn state_listener<L: StateListener>(mut self, listener: L) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn build(self) -> Result<Client, NetError> {
        let config = self.config.unwrap_or_default();
        let max_redirects = config.max_redirects();
        let follow = config.follow_redirects();
        let pool = ConnectionPool::new(config, self.listeners)?;
        Ok(Client {
            inner: Arc::new(ClientInner {
                redirect: RedirectFilter::new(pool, max_redirects, follow),
            }),
        })
    }
}

/// Builder for a single request. Errors are reported by [`send`](Self::send).
pub struct RequestBuilder {
    client: Client,
    request: Result<HttpRequest, NetError>,
}

impl RequestBuilder {
    /// Append a header; repeated names keep every value in order.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.request = self.request.and_then(|r| r.with_header(name, value));
        self
    }

    pub fn body<B: Into<RequestBody>>(mut self, body: B) -> Self {
        self.request = self.request.map(|r| r.with_body(body));
        self
    }

    /// Serialize `json` as the body and set `Content-Type`.
    pub fn json<T: serde::Serialize>(mut self, json: &T) -> Self {
        self.request = self.request.and_then(|r| {
            let bytes = serde_json::to_vec(json).map_err(|_| NetError::HttpBodyError)?;
            let mut r = r.with_body(bytes);
            r.headers_mut().insert("content-type", "application/json")?;
            Ok(r)
        });
        self
    }

    /// Override the client-wide redirect setting for this request.
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        if let Ok(r) = &mut self.request {
            r.set_follow_redirects(follow);
        }
        self
    }

    pub fn build(self) -> Result<HttpRequest, NetError> {
        self.request
    }

    pub async fn send(self) -> Result<HttpResponse, NetError> {
        let request = self.request?;
        self.client.execute(request).await
    }
}
