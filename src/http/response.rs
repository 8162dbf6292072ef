//! HTTP Response with body access.

use crate::base::neterror::NetError;
use crate::http::codec::ResponseHead;
use crate::http::orderedheaders::OrderedHeaderMap;
use crate::http::responsebody::ResponseBody;
use http::{StatusCode, Version};
use url::Url;

/// HTTP Response with accessible body.
/// This is the user-facing response type that owns the body.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    reason: String,
    version: Version,
    headers: OrderedHeaderMap,
    body: Option<ResponseBody>,
    url: Url,
    connection_id: u64,
}

impl HttpResponse {
    pub(crate) fn new(head: ResponseHead, body: ResponseBody, url: Url, connection_id: u64) -> Self {
        Self {
            status: head.status,
            reason: head.reason,
            version: head.version,
            headers: head.headers,
            body: Some(body),
            url,
            connection_id,
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase as sent by the server.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Headers in wire order.
    pub fn headers(&self) -> &OrderedHeaderMap {
        &self.headers
    }

    /// The URL that produced this response, after any redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Id of the connection the response was read from.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// `Location` header, if any.
    pub fn location(&self) -> Option<&str> {
        self.headers.get_str("location")
    }

    /// Take the response body for consumption.
    /// Can only be called once - subsequent calls return None.
    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take()
    }

    /// Convenience method to consume body as bytes.
    pub async fn bytes(mut self) -> Result<bytes::Bytes, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)?.bytes().await
    }

    /// Convenience method to consume body as text.
    pub async fn text(mut self) -> Result<String, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)?.text().await
    }

    /// Convenience method to consume body as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(mut self) -> Result<T, NetError> {
        self.body.take().ok_or(NetError::HttpBodyError)?.json().await
    }

    /// Drain the body without keeping it.
    pub async fn discard(mut self) -> Result<(), NetError> {
        match self.body.take() {
            Some(body) => body.discard().await,
            None => Ok(()),
        }
    }
}
