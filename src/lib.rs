//! # h1net
//!
//! An HTTP/1.1 client transport engine.
//!
//! `h1net` establishes, reuses and tears down connections to origin servers
//! or proxies, drives each connection through an explicit protocol state
//! machine, and layers redirect following, proxy tunneling and timeouts as
//! composable stages.
//!
//! ## Features
//!
//! - **Connection Pooling**: bounded per destination, FIFO waiters, idle reaping
//! - **State Machine**: every transition observable through [`StateListener`]
//! - **Proxy Support**: `CONNECT` tunnels with Basic and Digest authentication
//! - **Redirects**: policy table, cycle detection and a redirect budget
//! - **Timeouts**: connect, response and idle timers on one shared scheduler
//! - **TLS**: BoringSSL, negotiated end to end through proxy tunnels
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use h1net::{Client, ConnectorConfiguration};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), h1net::NetError> {
//!     let config = ConnectorConfiguration::builder()
//!         .connect_timeout(Duration::from_secs(5))
//!         .max_redirects(3)
//!         .build()?;
//!     let client = Client::builder().config(config).build()?;
//!     let response = client.get("http://example.com/").send().await?;
//!     println!("Status: {}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error codes and I/O error mapping
//! - [`config`] - Connector configuration
//! - [`connection`] - Connection state machine and pool
//! - [`filter`] - Transport, TLS, proxy, HTTP and redirect stages
//! - [`http`] - Requests, responses, headers and the HTTP/1.1 codec
//! - [`scheduler`] - Shared timeout scheduler
//! - [`socket`] - Proxy settings, bypass rules and proxy credentials

pub mod base;
pub mod client;
pub mod config;
pub mod connection;
pub mod filter;
pub mod http;
pub mod scheduler;
pub mod socket;

pub use base::neterror::{ErrorCategory, NetError};
pub use client::{Client, ClientBuilder, RequestBuilder};
pub use config::{ConnectorConfiguration, ConnectorConfigurationBuilder};
pub use connection::{ConnectionPool, HttpConnection, State, StateListener};
pub use crate::http::{HttpRequest, HttpResponse, OrderedHeaderMap, RequestBody, ResponseBody};
pub use socket::{ProxyBuilder, ProxyCredentials, ProxySettings};
