//! Connection lifecycle: the per-connection state machine and the pool that
//! reuses connections per destination.
//!
//! - [`state`]: the protocol states and their legal transitions
//! - [`listener`]: synchronous transition observers
//! - [`connection`]: one connection driving one filter chain
//! - [`pool`]: bounded per-destination reuse with FIFO waiters

#[allow(clippy::module_inception)]
pub mod connection;
pub mod listener;
pub mod pool;
pub mod state;

pub use connection::HttpConnection;
pub use listener::StateListener;
pub use pool::ConnectionPool;
pub use state::State;
