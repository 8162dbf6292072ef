//! HTTP/1.1 stage: writes requests and reads decoded response items.

use super::{Destination, Filter};
use crate::base::neterror::NetError;
use crate::http::codec::{BodyFraming, Http1Codec, RequestHead, RequestItem, ResponseItem};
use crate::http::orderedheaders::OrderedHeaderMap;
use crate::http::request::HttpRequest;
use crate::http::requestbody::RequestBody;
use futures::{SinkExt, StreamExt};
use http::header::{HeaderName, HeaderValue, HOST};
use http::Method;
use std::net::SocketAddr;
use tokio_util::codec::Framed;

pub struct HttpFilter<F> {
    framed: Framed<F, Http1Codec>,
}

impl<F: Filter> HttpFilter<F> {
    pub fn new(lower: F) -> Self {
        Self {
            framed: Framed::new(lower, Http1Codec::new()),
        }
    }

    pub async fn connect(&mut self, dest: &Destination) -> Result<(), NetError> {
        self.framed.get_mut().connect(dest).await
    }

    /// Write the whole request. Resolves once the last byte is flushed.
    pub async fn write(&mut self, mut request: HttpRequest) -> Result<(), NetError> {
        let body = request.take_body();
        let framing = match &body {
            RequestBody::Empty if expects_body(request.method()) => BodyFraming::Length(0),
            RequestBody::Empty => BodyFraming::None,
            RequestBody::Bytes(b) => BodyFraming::Length(b.len() as u64),
            RequestBody::Stream(_) => BodyFraming::Chunked,
        };
        let head = RequestHead {
            method: request.method().clone(),
            target: request.request_target(),
            headers: with_host(&request)?,
            framing,
        };
        self.framed.feed(RequestItem::Head(head)).await?;

        match body {
            RequestBody::Empty => {}
            RequestBody::Bytes(bytes) => self.framed.feed(RequestItem::Chunk(bytes)).await?,
            RequestBody::Stream(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| {
                        tracing::debug!(error = %e, "request body producer failed");
                        NetError::HttpBodyError
                    })?;
                    self.framed.send(RequestItem::Chunk(chunk)).await?;
                }
            }
        }
        self.framed.send(RequestItem::Eof).await
    }

    /// Next decoded response item. `None` once the peer has closed and every
    /// buffered byte has been decoded.
    pub async fn read(&mut self) -> Option<Result<ResponseItem, NetError>> {
        self.framed.next().await
    }

    /// Reset the decoder for the response to a `method` request.
    pub fn expect_response(&mut self, method: &Method) {
        self.framed.codec_mut().expect_response(method);
    }

    pub fn is_keep_alive(&self) -> bool {
        self.framed.codec().is_keep_alive()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.framed.get_ref().local_addr()
    }
}

fn expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Request headers with `Host` first, added from the URL when the caller
/// did not set one.
fn with_host(request: &HttpRequest) -> Result<OrderedHeaderMap, NetError> {
    if request.headers().contains("host") {
        return Ok(request.headers().clone());
    }
    let mut headers = OrderedHeaderMap::new();
    let host = HeaderValue::from_str(&request.host_header()?).map_err(|_| NetError::InvalidUrl)?;
    headers.append_typed(HOST, host);
    for (name, value) in request.headers().iter() {
        headers.append_typed(HeaderName::clone(name), value.clone());
    }
    Ok(headers)
}
