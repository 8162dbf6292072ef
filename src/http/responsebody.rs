//! Response body streaming.
//! The connection driver pushes decoded chunks into a bounded channel; the
//! caller pulls them through this type.

use crate::base::neterror::NetError;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Chunks in flight between the connection driver and the caller.
pub(crate) const BODY_CHANNEL_CAPACITY: usize = 16;

pub(crate) type BodySender = mpsc::Sender<Result<Bytes, NetError>>;

/// Response body wrapper for streaming.
///
/// The stream ends once the body has been fully framed off the wire. By then
/// the owning connection has already been handed back to the pool.
#[derive(Debug)]
pub struct ResponseBody {
    rx: Option<mpsc::Receiver<Result<Bytes, NetError>>>,
}

impl ResponseBody {
    /// A body with no content (HEAD, 204, 304).
    pub fn empty() -> Self {
        Self { rx: None }
    }

    pub(crate) fn channel() -> (BodySender, Self) {
        let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        (tx, Self { rx: Some(rx) })
    }

    /// Next chunk, or `None` at end of body.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, NetError>> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Read entire body as bytes.
    pub async fn bytes(mut self) -> Result<Bytes, NetError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Read body as UTF-8 string.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    /// Read body as JSON, deserializing to type T.
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|_| NetError::JsonParseError)
    }

    /// Read and drop the rest of the body so the connection can be reused.
    pub async fn discard(mut self) -> Result<(), NetError> {
        while let Some(chunk) = self.chunk().await {
            chunk?;
        }
        Ok(())
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, NetError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}
