//! Redirect Handling Tests
//!
//! Covers:
//! - Cycle detection and its interaction with the redirect budget
//! - Redirect budget enforcement
//! - The 301/302/303/307/308 policy table
//! - Per-request and client-wide opt-out
//! - Credential stripping on cross-origin hops

mod common;

use common::{ok, redirect, Reply, TestServer};
use h1net::{Client, ConnectorConfiguration, NetError};
use http::StatusCode;

fn client_with_max(max_redirects: u32) -> Client {
    let config = ConnectorConfiguration::builder()
        .max_redirects(max_redirects)
        .build()
        .unwrap();
    Client::builder().config(config).build().unwrap()
}

/// `/a -> /b -> /c -> ... -> /end`, `hops` redirects long.
async fn chain_server(hops: usize) -> TestServer {
    TestServer::start(move |req| {
        let n: usize = req.target.trim_start_matches("/hop").parse().unwrap_or(usize::MAX);
        if n < hops {
            redirect(302, &format!("/hop{}", n + 1))
        } else {
            ok("done")
        }
    })
    .await
}

#[tokio::test]
async fn test_cycle_detected_regardless_of_budget() {
    let server = TestServer::start(|req| match req.target.as_str() {
        "/a" => redirect(302, "/b"),
        "/b" => redirect(302, "/c"),
        "/c" => redirect(302, "/a"),
        _ => ok("unreachable"),
    })
    .await;

    for max in [0, 1, 2, 3, 10, 100] {
        let client = client_with_max(max);
        let err = client.get(server.url("/a")).send().await.unwrap_err();
        assert!(err.is_redirect_error(), "max_redirects = {max}: {err:?}");
        // The revisit is the third hop; a smaller budget runs out first.
        let expected = if max >= 2 {
            NetError::RedirectCycleDetected
        } else {
            NetError::TooManyRedirects
        };
        assert_eq!(err, expected, "max_redirects = {max}");
    }
}

#[tokio::test]
async fn test_budget_exhausted() {
    let server = chain_server(2).await;
    let client = client_with_max(1);
    let err = client.get(server.url("/hop0")).send().await.unwrap_err();
    assert_eq!(err, NetError::TooManyRedirects);
}

#[tokio::test]
async fn test_budget_sufficient() {
    let server = chain_server(2).await;
    let client = client_with_max(2);
    let resp = client.get(server.url("/hop0")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.url().path(), "/hop2");
    assert_eq!(resp.text().await.unwrap(), "done");
}

#[tokio::test]
async fn test_see_other_turns_post_into_get() {
    let server = TestServer::start(|req| match req.target.as_str() {
        "/form" => redirect(303, "/result"),
        _ => ok(&format!("{} {}", req.method, req.body.len())),
    })
    .await;
    let client = Client::new().unwrap();
    let resp = client
        .post(server.url("/form"))
        .header("Content-Type", "text/plain")
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "GET 0");

    let followed = &server.requests()[1];
    assert_eq!(followed.method, "GET");
    assert!(followed.header("content-type").is_none());
    assert!(followed.header("content-length").is_none());
}

#[tokio::test]
async fn test_temporary_redirect_with_body_returned() {
    let server = TestServer::start(|req| match req.target.as_str() {
        "/upload" => redirect(307, "/elsewhere"),
        _ => ok("moved"),
    })
    .await;
    let client = Client::new().unwrap();
    let resp = client
        .put(server.url("/upload"))
        .body("data")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn test_permanent_redirect_preserves_method() {
    let server = TestServer::start(|req| match req.target.as_str() {
        "/old" => redirect(308, "/new"),
        _ => ok(&req.method),
    })
    .await;
    let client = Client::new().unwrap();
    let resp = client.delete(server.url("/old")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "DELETE");
}

#[tokio::test]
async fn test_other_3xx_returned_as_is() {
    let server = TestServer::start(|_| redirect(300, "/choice")).await;
    let client = Client::new().unwrap();
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::MULTIPLE_CHOICES);
}

#[tokio::test]
async fn test_missing_location_returned_as_is() {
    let server = TestServer::start(|_| {
        Reply::Raw("HTTP/1.1 302 Found\r\nContent-Length: 0\r\n\r\n".into())
    })
    .await;
    let client = Client::new().unwrap();
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_follow_disabled_per_request() {
    let server = chain_server(1).await;
    let client = Client::new().unwrap();
    let resp = client
        .get(server.url("/hop0"))
        .follow_redirects(false)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.location(), Some("/hop1"));
}

#[tokio::test]
async fn test_follow_disabled_client_wide() {
    let server = chain_server(1).await;
    let config = ConnectorConfiguration::builder()
        .follow_redirects(false)
        .build()
        .unwrap();
    let client = Client::builder().config(config).build().unwrap();
    let resp = client.get(server.url("/hop0")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FOUND);

    let resp = client
        .get(server.url("/hop0"))
        .follow_redirects(true)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cross_origin_strips_credentials() {
    let target = TestServer::start(|_| ok("landed")).await;
    let landing = target.url("/landing");
    let origin = TestServer::start(move |_| redirect(302, &landing)).await;

    let client = Client::new().unwrap();
    let resp = client
        .get(origin.url("/start"))
        .header("Authorization", "Bearer secret")
        .header("Cookie", "session=1")
        .header("X-Trace", "abc")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "landed");

    let first = &origin.requests()[0];
    assert_eq!(first.header("authorization"), Some("Bearer secret"));
    let hop = &target.requests()[0];
    assert!(hop.header("authorization").is_none());
    assert!(hop.header("cookie").is_none());
    assert_eq!(hop.header("x-trace"), Some("abc"));
    assert_eq!(hop.header("host"), Some(target.addr.to_string().as_str()));
}

#[tokio::test]
async fn test_same_origin_keeps_credentials() {
    let server = TestServer::start(|req| match req.target.as_str() {
        "/start" => redirect(301, "/next"),
        _ => ok("ok"),
    })
    .await;
    let client = Client::new().unwrap();
    client
        .get(server.url("/start"))
        .header("Authorization", "Bearer secret")
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(server.requests()[1].header("authorization"), Some("Bearer secret"));
}

#[tokio::test]
async fn test_non_http_location_rejected() {
    let server = TestServer::start(|_| redirect(302, "ftp://example.com/file")).await;
    let client = Client::new().unwrap();
    let err = client.get(server.url("/")).send().await.unwrap_err();
    assert_eq!(err, NetError::InvalidRedirect);
}
