//! HTTP/1.1 wire codec.
//!
//! The encoder turns a request head plus body chunks into bytes using either
//! `Content-Length` or chunked framing. The decoder turns bytes into a
//! response head followed by body chunks and a final `Eof`, choosing between
//! length, chunked and read-to-close framing from the head.

use crate::base::neterror::NetError;
use crate::http::orderedheaders::OrderedHeaderMap;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Method, StatusCode, Version};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Maximum number of header lines in a response head.
const MAX_HEADERS: usize = 100;

/// Maximum size of a response head.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Longest accepted chunk-size line, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

/// How the request entity is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Length(u64),
    Chunked,
}

/// Request line plus headers, ready for the wire.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    pub headers: OrderedHeaderMap,
    pub framing: BodyFraming,
}

#[derive(Debug)]
pub enum RequestItem {
    Head(RequestHead),
    Chunk(Bytes),
    Eof,
}

/// A parsed status line and header block.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub reason: String,
    pub version: Version,
    pub headers: OrderedHeaderMap,
}

impl ResponseHead {
    /// 1xx responses precede the final one.
    pub fn is_interim(&self) -> bool {
        self.status.is_informational()
    }
}

#[derive(Debug)]
pub enum ResponseItem {
    Head(ResponseHead),
    Body(Bytes),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Length(u64),
    Chunked(ChunkState),
    UntilClose,
    Done,
}

/// Client side HTTP/1.1 codec.
#[derive(Debug)]
pub struct Http1Codec {
    decode: DecodeState,
    chunked_upload: bool,
    head_request: bool,
    keep_alive: bool,
}

impl Default for Http1Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Http1Codec {
    pub fn new() -> Self {
        Self {
            decode: DecodeState::Head,
            chunked_upload: false,
            head_request: false,
            keep_alive: true,
        }
    }

    /// Prepare to decode the response to a request sent with `method`.
    pub fn expect_response(&mut self, method: &Method) {
        self.decode = DecodeState::Head;
        self.head_request = method == Method::HEAD;
        self.keep_alive = true;
    }

    /// Whether the last decoded response allows the connection to be reused.
    /// Only meaningful once its `Eof` has been produced.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    fn decode_head(&mut self, src: &mut BytesMut) -> Result<Option<ResponseItem>, NetError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut headers);

        let consumed = match resp.parse(src) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                if src.len() > MAX_HEAD_BYTES {
                    return Err(NetError::ResponseHeadersTooBig);
                }
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) => return Err(NetError::ResponseHeadersTooBig),
            Err(e) => {
                trace!(error = %e, "malformed response head");
                return Err(NetError::InvalidResponse);
            }
        };
        if consumed > MAX_HEAD_BYTES {
            return Err(NetError::ResponseHeadersTooBig);
        }

        let version = match resp.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            _ => return Err(NetError::InvalidResponse),
        };
        let status = resp
            .code
            .and_then(|c| StatusCode::from_u16(c).ok())
            .ok_or(NetError::InvalidResponse)?;
        let reason = resp.reason.unwrap_or_default().to_string();

        let mut map = OrderedHeaderMap::new();
        for h in resp.headers.iter() {
            let name =
                HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| NetError::InvalidResponse)?;
            let value = HeaderValue::from_bytes(h.value).map_err(|_| NetError::InvalidResponse)?;
            map.append_typed(name, value);
        }
        src.advance(consumed);

        let head = ResponseHead {
            status,
            reason,
            version,
            headers: map,
        };
        trace!(status = head.status.as_u16(), len = consumed, "decoded response head");

        if head.is_interim() {
            // Stay in Head state; the final response follows.
            return Ok(Some(ResponseItem::Head(head)));
        }

        self.keep_alive = match version {
            Version::HTTP_11 => !head.headers.has_token("connection", "close"),
            _ => head.headers.has_token("connection", "keep-alive"),
        };
        self.decode = self.body_state(&head)?;
        if self.decode == DecodeState::UntilClose {
            self.keep_alive = false;
        }
        Ok(Some(ResponseItem::Head(head)))
    }

    fn body_state(&self, head: &ResponseHead) -> Result<DecodeState, NetError> {
        if self.head_request
            || head.status == StatusCode::NO_CONTENT
            || head.status == StatusCode::NOT_MODIFIED
        {
            return Ok(DecodeState::Done);
        }

        if let Some(te) = head.headers.get_all_split("transfer-encoding").last() {
            if te.eq_ignore_ascii_case("chunked") {
                return Ok(DecodeState::Chunked(ChunkState::Size));
            }
            return Ok(DecodeState::UntilClose);
        }

        let mut length: Option<u64> = None;
        for value in head.headers.get_all_split("content-length") {
            let n: u64 = value.parse().map_err(|_| NetError::InvalidResponse)?;
            match length {
                Some(prev) if prev != n => {
                    return Err(NetError::ResponseHeadersMultipleContentLength)
                }
                _ => length = Some(n),
            }
        }

        Ok(match length {
            Some(0) => DecodeState::Done,
            Some(n) => DecodeState::Length(n),
            None => DecodeState::UntilClose,
        })
    }

    fn decode_chunked(
        &mut self,
        mut state: ChunkState,
        src: &mut BytesMut,
    ) -> Result<Option<ResponseItem>, NetError> {
        loop {
            match state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(src) else {
                        if src.len() > MAX_CHUNK_LINE {
                            return Err(NetError::InvalidChunkedEncoding);
                        }
                        self.decode = DecodeState::Chunked(state);
                        return Ok(None);
                    };
                    let line = src.split_to(line_end + 2);
                    let size = parse_chunk_size(&line[..line_end])?;
                    state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if src.is_empty() {
                        self.decode = DecodeState::Chunked(state);
                        return Ok(None);
                    }
                    let n = remaining.min(src.len() as u64) as usize;
                    let data = src.split_to(n).freeze();
                    let left = remaining - n as u64;
                    self.decode = DecodeState::Chunked(if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    });
                    return Ok(Some(ResponseItem::Body(data)));
                }
                ChunkState::DataEnd => {
                    if src.len() < 2 {
                        self.decode = DecodeState::Chunked(state);
                        return Ok(None);
                    }
                    if &src[..2] != b"\r\n" {
                        return Err(NetError::InvalidChunkedEncoding);
                    }
                    src.advance(2);
                    state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    let Some(line_end) = find_crlf(src) else {
                        if src.len() > MAX_HEAD_BYTES {
                            return Err(NetError::ResponseHeadersTooBig);
                        }
                        self.decode = DecodeState::Chunked(state);
                        return Ok(None);
                    };
                    src.advance(line_end + 2);
                    if line_end == 0 {
                        self.decode = DecodeState::Head;
                        return Ok(Some(ResponseItem::Eof));
                    }
                }
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, NetError> {
    let line = std::str::from_utf8(line).map_err(|_| NetError::InvalidChunkedEncoding)?;
    let size = line.split(';').next().unwrap_or_default().trim();
    if size.is_empty() {
        return Err(NetError::InvalidChunkedEncoding);
    }
    u64::from_str_radix(size, 16).map_err(|_| NetError::InvalidChunkedEncoding)
}

impl Decoder for Http1Codec {
    type Item = ResponseItem;
    type Error = NetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode {
            DecodeState::Head => {
                if src.is_empty() {
                    return Ok(None);
                }
                self.decode_head(src)
            }
            DecodeState::Length(remaining) => {
                if src.is_empty() {
                    return Ok(None);
                }
                let n = remaining.min(src.len() as u64) as usize;
                let data = src.split_to(n).freeze();
                let left = remaining - n as u64;
                self.decode = if left == 0 {
                    DecodeState::Done
                } else {
                    DecodeState::Length(left)
                };
                Ok(Some(ResponseItem::Body(data)))
            }
            DecodeState::Chunked(state) => self.decode_chunked(state, src),
            DecodeState::UntilClose => {
                if src.is_empty() {
                    return Ok(None);
                }
                Ok(Some(ResponseItem::Body(src.split().freeze())))
            }
            DecodeState::Done => {
                self.decode = DecodeState::Head;
                Ok(Some(ResponseItem::Eof))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        match self.decode {
            DecodeState::Head if src.is_empty() => Ok(None),
            DecodeState::Head => Err(NetError::InvalidResponse),
            DecodeState::Length(_) => Err(NetError::ContentLengthMismatch),
            DecodeState::Chunked(_) => Err(NetError::IncompleteChunkedEncoding),
            DecodeState::UntilClose => {
                self.decode = DecodeState::Head;
                Ok(Some(ResponseItem::Eof))
            }
            DecodeState::Done => Ok(None),
        }
    }
}

impl Encoder<RequestItem> for Http1Codec {
    type Error = NetError;

    fn encode(&mut self, item: RequestItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RequestItem::Head(head) => {
                self.chunked_upload = head.framing == BodyFraming::Chunked;
                dst.reserve(64 + head.headers.len() * 32);
                dst.put_slice(head.method.as_str().as_bytes());
                dst.put_u8(b' ');
                dst.put_slice(head.target.as_bytes());
                dst.put_slice(b" HTTP/1.1\r\n");
                for (name, value) in head.headers.iter() {
                    // Framing always follows the body actually sent.
                    if *name == CONTENT_LENGTH || *name == TRANSFER_ENCODING {
                        trace!(header = %name, "dropping caller framing header");
                        continue;
                    }
                    dst.put_slice(name.as_str().as_bytes());
                    dst.put_slice(b": ");
                    dst.put_slice(value.as_bytes());
                    dst.put_slice(b"\r\n");
                }
                match head.framing {
                    BodyFraming::Length(n) => {
                        dst.put_slice(format!("content-length: {}\r\n", n).as_bytes());
                    }
                    BodyFraming::Chunked => dst.put_slice(b"transfer-encoding: chunked\r\n"),
                    BodyFraming::None => {}
                }
                dst.put_slice(b"\r\n");
            }
            RequestItem::Chunk(data) => {
                if self.chunked_upload {
                    if data.is_empty() {
                        return Ok(());
                    }
                    dst.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
                    dst.put_slice(&data);
                    dst.put_slice(b"\r\n");
                } else {
                    dst.put_slice(&data);
                }
            }
            RequestItem::Eof => {
                if self.chunked_upload {
                    dst.put_slice(b"0\r\n\r\n");
                    self.chunked_upload = false;
                }
            }
        }
        Ok(())
    }
}
