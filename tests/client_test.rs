//! Tests for the Client API against an in-process server.

mod common;

use bytes::Bytes;
use common::{ok, Reply, TestServer};
use h1net::{Client, ConnectorConfiguration, HttpRequest, NetError, RequestBody};
use http::{Method, StatusCode, Version};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;

#[test]
fn test_client_creation() {
    let _client = Client::new().unwrap();
}

#[test]
fn test_client_request_methods() {
    let client = Client::new().unwrap();
    for (builder, method) in [
        (client.get("http://example.com"), Method::GET),
        (client.post("http://example.com"), Method::POST),
        (client.put("http://example.com"), Method::PUT),
        (client.delete("http://example.com"), Method::DELETE),
        (client.head("http://example.com"), Method::HEAD),
        (client.patch("http://example.com"), Method::PATCH),
    ] {
        assert_eq!(builder.build().unwrap().method(), &method);
    }
}

#[test]
fn test_invalid_configuration_rejected() {
    let err = ConnectorConfiguration::builder()
        .connect_timeout(Duration::ZERO)
        .build()
        .unwrap_err();
    assert_eq!(err, NetError::InvalidConfiguration);
}

#[test]
fn test_configuration_from_json() {
    let config = ConnectorConfiguration::from_json(
        r#"{"idle_timeout_ms": 1500, "max_connections_per_destination": 2, "follow_redirects": false}"#,
    )
    .unwrap();
    assert_eq!(config.idle_timeout(), Duration::from_millis(1500));
    assert_eq!(config.max_connections_per_destination(), 2);
    let client = Client::builder().config(config).build().unwrap();
    assert!(!client.config().follow_redirects());
}

#[tokio::test]
async fn test_simple_get() {
    let server = TestServer::start(|req| ok(&format!("{} {}", req.method, req.target))).await;
    let client = Client::new().unwrap();
    let resp = client.get(server.url("/hello?name=x")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.reason(), "OK");
    assert_eq!(resp.version(), Version::HTTP_11);
    assert_eq!(resp.url().path(), "/hello");
    assert_eq!(resp.text().await.unwrap(), "GET /hello?name=x");
}

#[tokio::test]
async fn test_post_bytes_sets_content_length() {
    let server = TestServer::start(|req| ok(&String::from_utf8_lossy(&req.body))).await;
    let client = Client::new().unwrap();
    let resp = client
        .post(server.url("/echo"))
        .body("hello world")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "hello world");
    assert_eq!(server.requests()[0].header("content-length"), Some("11"));
}

#[tokio::test]
async fn test_caller_framing_headers_follow_body() {
    let server = TestServer::start(|req| ok(&String::from_utf8_lossy(&req.body))).await;
    let config = ConnectorConfiguration::builder()
        .response_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let client = Client::builder().config(config).build().unwrap();

    let resp = client
        .post(server.url("/sized"))
        .header("Content-Length", "10")
        .body("abc")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "abc");

    let chunks = futures::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"xyz"))]);
    let resp = client
        .put(server.url("/streamed"))
        .header("Content-Length", "99")
        .body(RequestBody::stream(chunks))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "xyz");

    let requests = server.requests();
    assert_eq!(requests[0].header_all("content-length"), ["3"]);
    assert!(requests[0].header("transfer-encoding").is_none());
    assert_eq!(requests[1].header_all("transfer-encoding"), ["chunked"]);
    assert!(requests[1].header("content-length").is_none());
}

#[tokio::test]
async fn test_empty_post_sends_zero_length() {
    let server = TestServer::start(|_| ok("")).await;
    let client = Client::new().unwrap();
    client.post(server.url("/")).send().await.unwrap().discard().await.unwrap();
    assert_eq!(server.requests()[0].header("content-length"), Some("0"));
}

#[tokio::test]
async fn test_streamed_upload_is_chunked() {
    let server = TestServer::start(|req| ok(&String::from_utf8_lossy(&req.body))).await;
    let client = Client::new().unwrap();
    let chunks = futures::stream::iter(vec![
        Ok::<_, std::io::Error>(Bytes::from_static(b"part one, ")),
        Ok(Bytes::from_static(b"part two")),
    ]);
    let resp = client
        .put(server.url("/upload"))
        .body(RequestBody::stream(chunks))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "part one, part two");

    let req = &server.requests()[0];
    assert_eq!(req.header("transfer-encoding"), Some("chunked"));
    assert!(req.header("content-length").is_none());
}

#[tokio::test]
async fn test_chunked_response() {
    let server = TestServer::start(|_| {
        Reply::Raw(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".into(),
        )
    })
    .await;
    let client = Client::new().unwrap();
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "hello world");

    // Chunked framing is reusable.
    client.get(server.url("/")).send().await.unwrap().discard().await.unwrap();
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_streaming_body_by_chunk() {
    let server = TestServer::start(|_| {
        Reply::Raw(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n".into(),
        )
    })
    .await;
    let client = Client::new().unwrap();
    let mut resp = client.get(server.url("/")).send().await.unwrap();
    let mut body = resp.take_body().unwrap();
    let mut collected = Vec::new();
    while let Some(chunk) = body.chunk().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, b"abcdef");
}

#[tokio::test]
async fn test_read_until_close_body() {
    let server = TestServer::start(|_| {
        Reply::Close("HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nuntil the end".into())
    })
    .await;
    let client = Client::new().unwrap();
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "until the end");
}

#[tokio::test]
async fn test_head_has_no_body() {
    let server = TestServer::start(|_| {
        Reply::Raw("HTTP/1.1 200 OK\r\nContent-Length: 1234\r\n\r\n".into())
    })
    .await;
    let client = Client::new().unwrap();
    let resp = client.head(server.url("/")).send().await.unwrap();
    assert_eq!(resp.headers().get_str("content-length"), Some("1234"));
    assert!(resp.bytes().await.unwrap().is_empty());

    // Connection stays usable for the next exchange.
    client.head(server.url("/")).send().await.unwrap().discard().await.unwrap();
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_interim_response_skipped() {
    let server = TestServer::start(|_| {
        Reply::Raw("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\nContent-Length: 2\r\n\r\nok".into())
    })
    .await;
    let client = Client::new().unwrap();
    let resp = client.post(server.url("/")).body("x").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Greeting {
    name: String,
    count: u32,
}

#[tokio::test]
async fn test_json_roundtrip() {
    let server = TestServer::start(|req| {
        let body = String::from_utf8_lossy(&req.body).into_owned();
        Reply::Raw(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        ))
    })
    .await;
    let client = Client::new().unwrap();
    let sent = Greeting {
        name: "h1net".into(),
        count: 3,
    };
    let resp = client.post(server.url("/")).json(&sent).send().await.unwrap();
    let received: Greeting = resp.json().await.unwrap();
    assert_eq!(received, sent);
    assert_eq!(server.requests()[0].header("content-type"), Some("application/json"));
}

#[tokio::test]
async fn test_execute_with_callback() {
    let server = TestServer::start(|_| ok("called back")).await;
    let client = Client::new().unwrap();
    let request = HttpRequest::parse(Method::GET, &server.url("/")).unwrap();

    let (tx, rx) = oneshot::channel();
    let handle = client.execute_with(request, move |result| {
        let _ = tx.send(result.map(|r| r.status()));
    });
    handle.await.unwrap();
    assert_eq!(rx.await.unwrap().unwrap(), StatusCode::OK);
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::new().unwrap();
    let err = client.get(format!("http://{addr}/")).send().await.unwrap_err();
    assert_eq!(err, NetError::ConnectionRefused);
}

#[tokio::test]
async fn test_empty_response() {
    let server = TestServer::start(|_| Reply::Close(String::new())).await;
    let client = Client::new().unwrap();
    let err = client.get(server.url("/")).send().await.unwrap_err();
    assert_eq!(err, NetError::EmptyResponse);
}

#[tokio::test]
async fn test_truncated_body_is_error() {
    let server = TestServer::start(|_| {
        Reply::Close("HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort".into())
    })
    .await;
    let client = Client::new().unwrap();
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert!(resp.bytes().await.is_err());
}

#[tokio::test]
async fn test_unsupported_scheme() {
    let client = Client::new().unwrap();
    let err = client.get("ftp://example.com/file").send().await.unwrap_err();
    assert_eq!(err, NetError::UnknownUrlScheme);
}
