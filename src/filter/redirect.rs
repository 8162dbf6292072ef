//! Redirect stage: sits above the pool and follows 3xx responses for one
//! logical invocation.

use crate::base::neterror::NetError;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use futures::future::BoxFuture;
use http::{Method, StatusCode};
use std::collections::HashSet;
use url::Url;

/// Headers that never follow a redirect to another origin.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "cookie", "host"];

/// Headers describing an entity that a 303 drops.
const ENTITY_HEADERS: &[&str] = &["content-length", "content-type", "transfer-encoding"];

/// One request/response exchange, as offered by the connection pool.
pub trait Exchange: Send + Sync {
    fn exchange(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, NetError>>;
}

/// What to do with a 3xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectAction {
    /// Issue the next request with `method`, without a body if `drop_body`.
    Follow { method: Method, drop_body: bool },
    /// Hand the response to the caller unchanged.
    Return,
}

/// The redirect policy table.
///
/// | Status          | no request body          | request body              |
/// |-----------------|--------------------------|---------------------------|
/// | 301/302/307/308 | follow, method preserved | return as-is              |
/// | 303             | follow as GET            | follow as GET, drop body  |
/// | anything else   | return as-is             | return as-is              |
///
/// HEAD stays HEAD on 303.
pub fn redirect_action(status: StatusCode, method: &Method, has_body: bool) -> RedirectAction {
    match status.as_u16() {
        301 | 302 | 307 | 308 if !has_body => RedirectAction::Follow {
            method: method.clone(),
            drop_body: false,
        },
        303 => RedirectAction::Follow {
            method: if *method == Method::HEAD {
                Method::HEAD
            } else {
                Method::GET
            },
            drop_body: true,
        },
        _ => RedirectAction::Return,
    }
}

/// Visited URLs and remaining budget for one invocation.
#[derive(Debug, Clone)]
pub struct RedirectState {
    visited: HashSet<Url>,
    remaining: u32,
}

impl RedirectState {
    pub fn new(initial: &Url, max_redirects: u32) -> Self {
        let mut visited = HashSet::new();
        visited.insert(without_fragment(initial));
        Self {
            visited,
            remaining: max_redirects,
        }
    }

    /// Admit a hop to `next`. A revisit fails before the budget is consulted.
    pub fn admit(&mut self, next: &Url) -> Result<(), NetError> {
        let next = without_fragment(next);
        if self.visited.contains(&next) {
            return Err(NetError::RedirectCycleDetected);
        }
        if self.remaining == 0 {
            return Err(NetError::TooManyRedirects);
        }
        self.remaining -= 1;
        self.visited.insert(next);
        Ok(())
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

fn without_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

pub struct RedirectFilter<E> {
    inner: E,
    max_redirects: u32,
    follow_by_default: bool,
}

impl<E: Exchange> RedirectFilter<E> {
    pub fn new(inner: E, max_redirects: u32, follow_by_default: bool) -> Self {
        Self {
            inner,
            max_redirects,
            follow_by_default,
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, NetError> {
        if !request.follow_redirects().unwrap_or(self.follow_by_default) {
            return self.inner.exchange(request).await;
        }

        let mut state = RedirectState::new(request.url(), self.max_redirects);
        let mut request = request;
        loop {
            let method = request.method().clone();
            let has_body = !request.is_bodyless();
            let url = request.url().clone();
            let headers = request.headers().clone();
            let follow = request.follow_redirects();

            let response = self.inner.exchange(request).await?;
            if !response.status().is_redirection() {
                return Ok(response);
            }
            let Some(location) = response.location() else {
                return Ok(response);
            };
            let RedirectAction::Follow {
                method: next_method,
                drop_body,
            } = redirect_action(response.status(), &method, has_body)
            else {
                return Ok(response);
            };

            let next = url.join(location).map_err(|_| NetError::InvalidRedirect)?;
            if !matches!(next.scheme(), "http" | "https") {
                return Err(NetError::InvalidRedirect);
            }
            if let Err(e) = state.admit(&next) {
                tracing::warn!(from = %url, to = %next, error = %e, "redirect refused");
                return Err(e);
            }
            tracing::debug!(
                status = response.status().as_u16(),
                from = %url,
                to = %next,
                remaining = state.remaining(),
                "following redirect"
            );
            response.discard().await?;

            let mut next_request = HttpRequest::new(next_method, next.clone());
            *next_request.headers_mut() = headers;
            if url.origin() != next.origin() {
                for name in CREDENTIAL_HEADERS {
                    next_request.headers_mut().remove(name);
                }
            }
            if drop_body {
                for name in ENTITY_HEADERS {
                    next_request.headers_mut().remove(name);
                }
            }
            if let Some(f) = follow {
                next_request.set_follow_redirects(f);
            }
            request = next_request;
        }
    }
}
