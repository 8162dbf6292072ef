//! In-process HTTP server and CONNECT proxy for integration tests.

#![allow(dead_code)]

use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Read one request (head plus body) off `stream`. `None` on clean EOF.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut BytesMut) -> Option<Request> {
    let (mut req, consumed, chunked, length) = loop {
        {
            let mut headers = [httparse::EMPTY_HEADER; 64];
            let mut parsed = httparse::Request::new(&mut headers);
            if let Ok(httparse::Status::Complete(n)) = parsed.parse(buf) {
                let headers: Vec<(String, String)> = parsed
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect();
                let req = Request {
                    method: parsed.method.unwrap_or_default().to_string(),
                    target: parsed.path.unwrap_or_default().to_string(),
                    headers,
                    body: Vec::new(),
                };
                let chunked = req
                    .header("transfer-encoding")
                    .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
                let length = req
                    .header("content-length")
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                break (req, n, chunked, length);
            }
        }
        if stream.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    };
    buf.advance(consumed);

    if chunked {
        loop {
            let line = read_line(stream, buf).await?;
            let size = usize::from_str_radix(line.trim(), 16).ok()?;
            if size == 0 {
                read_line(stream, buf).await?;
                break;
            }
            fill(stream, buf, size + 2).await?;
            req.body.extend_from_slice(&buf[..size]);
            buf.advance(size + 2);
        }
    } else {
        fill(stream, buf, length).await?;
        req.body.extend_from_slice(&buf[..length]);
        buf.advance(length);
    }
    Some(req)
}

async fn fill<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut BytesMut, n: usize) -> Option<()> {
    while buf.len() < n {
        if stream.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    }
    Some(())
}

async fn read_line<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut BytesMut) -> Option<String> {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = String::from_utf8_lossy(&buf[..pos]).into_owned();
            buf.advance(pos + 2);
            return Some(line);
        }
        if stream.read_buf(buf).await.ok()? == 0 {
            return None;
        }
    }
}

/// What the handler wants sent back.
pub enum Reply {
    /// Write these bytes. The connection closes afterwards if they carry
    /// `Connection: close`.
    Raw(String),
    /// Write these bytes and then close the socket without saying so.
    Close(String),
    /// Write these bytes and then never answer again.
    Stall(String),
}

pub fn ok(body: &str) -> Reply {
    Reply::Raw(format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    ))
}

pub fn redirect(status: u16, location: &str) -> Reply {
    Reply::Raw(format!(
        "HTTP/1.1 {status} Redirect\r\nLocation: {location}\r\nContent-Length: 0\r\n\r\n"
    ))
}

type Handler = dyn Fn(&Request) -> Reply + Send + Sync;

pub struct TestServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl TestServer {
    pub async fn start<H>(handler: H) -> Self
    where
        H: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let count = accepted.clone();
        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, handler.clone(), log.clone()));
            }
        });
        Self {
            addr,
            accepted,
            requests,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// TCP connections accepted so far.
    pub fn connections(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(mut socket: TcpStream, handler: Arc<Handler>, log: Arc<Mutex<Vec<Request>>>) {
    let mut buf = BytesMut::new();
    while let Some(req) = read_request(&mut socket, &mut buf).await {
        log.lock().unwrap().push(req.clone());
        match handler(&req) {
            Reply::Raw(resp) => {
                if socket.write_all(resp.as_bytes()).await.is_err() {
                    return;
                }
                if resp.to_ascii_lowercase().contains("connection: close") {
                    return;
                }
            }
            Reply::Close(resp) => {
                let _ = socket.write_all(resp.as_bytes()).await;
                return;
            }
            Reply::Stall(resp) => {
                let _ = socket.write_all(resp.as_bytes()).await;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }
        }
    }
}

/// How the test proxy authenticates `CONNECT`.
#[derive(Clone)]
pub enum ProxyAuth {
    Open,
    Basic { user: &'static str, pass: &'static str },
    Digest { user: &'static str, pass: &'static str },
    /// Accept the TCP connection but never answer.
    Silent,
    /// Like `Open`, after holding each `CONNECT` for a while.
    Delayed(Duration),
}

pub const DIGEST_REALM: &str = "testrealm@proxy";
pub const DIGEST_NONCE: &str = "dcd98b7102dd2f0e8b11d0f600bfb0c093";

pub struct TestProxy {
    pub addr: SocketAddr,
    connects: Arc<AtomicUsize>,
    tunnels: Arc<AtomicUsize>,
}

impl TestProxy {
    /// Start a proxy. With `close_on_407` every challenge closes the socket.
    pub async fn start(auth: ProxyAuth, close_on_407: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connects = Arc::new(AtomicUsize::new(0));
        let tunnels = Arc::new(AtomicUsize::new(0));

        let (c, t) = (connects.clone(), tunnels.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(proxy_conn(socket, auth.clone(), close_on_407, c.clone(), t.clone()));
            }
        });
        Self {
            addr,
            connects,
            tunnels,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// `CONNECT` requests received, answered or not.
    pub fn connect_requests(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Tunnels established with a 200.
    pub fn tunnels(&self) -> usize {
        self.tunnels.load(Ordering::SeqCst)
    }
}

async fn proxy_conn(
    mut socket: TcpStream,
    auth: ProxyAuth,
    close_on_407: bool,
    connects: Arc<AtomicUsize>,
    tunnels: Arc<AtomicUsize>,
) {
    let mut buf = BytesMut::new();
    while let Some(req) = read_request(&mut socket, &mut buf).await {
        connects.fetch_add(1, Ordering::SeqCst);
        if req.method != "CONNECT" {
            let _ = socket
                .write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n")
                .await;
            return;
        }
        let challenge = match &auth {
            ProxyAuth::Open => None,
            ProxyAuth::Delayed(delay) => {
                tokio::time::sleep(*delay).await;
                None
            }
            ProxyAuth::Silent => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }
            ProxyAuth::Basic { user, pass } => {
                let expected = format!("Basic {}", base64_encode(&format!("{user}:{pass}")));
                (req.header("proxy-authorization") != Some(expected.as_str()))
                    .then(|| "Basic realm=\"proxy\"".to_string())
            }
            ProxyAuth::Digest { user, pass } => {
                let valid = req
                    .header("proxy-authorization")
                    .is_some_and(|h| digest_valid(h, user, pass));
                (!valid).then(|| {
                    format!(
                        "Digest realm=\"{DIGEST_REALM}\", nonce=\"{DIGEST_NONCE}\", qop=\"auth\", algorithm=MD5, opaque=\"5ccc069c403ebaf9f0171e9517f40e41\""
                    )
                })
            }
        };

        if let Some(challenge) = challenge {
            let close = if close_on_407 { "Connection: close\r\n" } else { "" };
            let resp = format!(
                "HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authenticate: {challenge}\r\n{close}Content-Length: 6\r\n\r\ndenied"
            );
            if socket.write_all(resp.as_bytes()).await.is_err() || close_on_407 {
                return;
            }
            continue;
        }

        let Ok(mut upstream) = TcpStream::connect(&req.target).await else {
            let _ = socket.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
            return;
        };
        if socket
            .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
            .await
            .is_err()
        {
            return;
        }
        tunnels.fetch_add(1, Ordering::SeqCst);
        if !buf.is_empty() {
            let _ = upstream.write_all(&buf).await;
        }
        let _ = tokio::io::copy_bidirectional(&mut socket, &mut upstream).await;
        return;
    }
}

fn base64_encode(s: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(s)
}

fn md5_hex(s: &str) -> String {
    let digest = boring::hash::hash(boring::hash::MessageDigest::md5(), s.as_bytes()).unwrap();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn digest_param<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    header
        .trim_start_matches("Digest ")
        .split(',')
        .filter_map(|p| p.trim().split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().trim_matches('"'))
}

/// Check a Digest `Proxy-Authorization` with qop=auth the way a proxy would.
fn digest_valid(header: &str, user: &str, pass: &str) -> bool {
    let param = |k| digest_param(header, k).unwrap_or_default();
    if param("username") != user || param("nonce") != DIGEST_NONCE || param("realm") != DIGEST_REALM {
        return false;
    }
    let ha1 = md5_hex(&format!("{user}:{DIGEST_REALM}:{pass}"));
    let ha2 = md5_hex(&format!("CONNECT:{}", param("uri")));
    let expected = md5_hex(&format!(
        "{ha1}:{DIGEST_NONCE}:{}:{}:{}:{ha2}",
        param("nc"),
        param("cnonce"),
        param("qop")
    ));
    param("response") == expected
}
