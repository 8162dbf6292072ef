//! Timeout Tests
//!
//! Connect, response and idle timers against real sockets. A proxy that
//! accepts but never answers `CONNECT` stands in for an unreachable peer.

mod common;

use common::{ok, ProxyAuth, Reply, TestProxy, TestServer};
use h1net::{Client, ConnectorConfiguration, HttpConnection, NetError, ProxySettings, State};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Transitions = Arc<Mutex<Vec<(State, State)>>>;

fn recording_client(config: ConnectorConfiguration) -> (Client, Transitions) {
    let log: Transitions = Arc::default();
    let sink = log.clone();
    let client = Client::builder()
        .config(config)
        .state_listener(move |_: &HttpConnection, old: State, new: State| {
            sink.lock().unwrap().push((old, new));
        })
        .build()
        .unwrap();
    (client, log)
}

#[tokio::test]
async fn test_connect_timeout() {
    let proxy = TestProxy::start(ProxyAuth::Silent, false).await;
    let timeout = Duration::from_millis(100);
    let config = ConnectorConfiguration::builder()
        .connect_timeout(timeout)
        .proxy(ProxySettings::new(&proxy.url()).unwrap())
        .build()
        .unwrap();
    let (client, log) = recording_client(config);

    let started = Instant::now();
    let err = client.get("http://origin.invalid/").send().await.unwrap_err();
    assert_eq!(err, NetError::ConnectionTimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= timeout, "gave up early after {elapsed:?}");
    assert!(elapsed < timeout * 3 + Duration::from_millis(50), "took {elapsed:?}");

    let log = log.lock().unwrap().clone();
    assert_eq!(
        log,
        vec![
            (State::Connecting, State::ConnectTimeout),
            (State::ConnectTimeout, State::Closed),
        ]
    );
    assert_eq!(client.pool().total_connections(), 0);
}

#[tokio::test]
async fn test_response_timeout_before_headers() {
    let server = TestServer::start(|_| Reply::Stall(String::new())).await;
    let config = ConnectorConfiguration::builder()
        .response_timeout(Duration::from_millis(150))
        .build()
        .unwrap();
    let (client, log) = recording_client(config);

    let err = client.get(server.url("/")).send().await.unwrap_err();
    assert_eq!(err, NetError::ResponseTimedOut);

    let log = log.lock().unwrap().clone();
    assert!(log.contains(&(State::ReceivingHeader, State::ResponseTimeout)));
    assert_eq!(log.last(), Some(&(State::ResponseTimeout, State::Closed)));
}

#[tokio::test]
async fn test_response_timeout_covers_body() {
    let server = TestServer::start(|_| {
        Reply::Stall("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc".into())
    })
    .await;
    let config = ConnectorConfiguration::builder()
        .response_timeout(Duration::from_millis(150))
        .build()
        .unwrap();
    let (client, log) = recording_client(config);

    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.bytes().await.unwrap_err(), NetError::ResponseTimedOut);

    let log = log.lock().unwrap().clone();
    assert!(log.contains(&(State::ReceivingBody, State::ResponseTimeout)));
    assert_eq!(client.pool().total_connections(), 0);
}

#[tokio::test]
async fn test_response_within_timeout_is_reused() {
    let server = TestServer::start(|_| ok("fast")).await;
    let config = ConnectorConfiguration::builder()
        .response_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let client = Client::builder().config(config).build().unwrap();

    client.get(server.url("/")).send().await.unwrap().bytes().await.unwrap();
    // Timer from the first exchange must not fire on the idle connection.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "fast");
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_idle_timer_rearmed_after_reuse() {
    let server = TestServer::start(|_| ok("x")).await;
    let config = ConnectorConfiguration::builder()
        .idle_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let (client, log) = recording_client(config);

    for _ in 0..3 {
        client.get(server.url("/")).send().await.unwrap().bytes().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(server.connections(), 1);
    assert!(!log.lock().unwrap().contains(&(State::Idle, State::IdleTimeout)));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(log.lock().unwrap().contains(&(State::Idle, State::IdleTimeout)));
    assert_eq!(client.pool().idle_count(), 0);
}
