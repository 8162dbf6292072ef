use super::connection::HttpConnection;
use super::listener::StateListener;
use super::state::State;
use crate::base::neterror::NetError;
use crate::config::ConnectorConfiguration;
use crate::filter::redirect::Exchange;
use crate::filter::{ChainFactory, Destination};
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::scheduler::Scheduler;
use crate::socket::authcache::AuthCache;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

/// What a waiting caller is handed when capacity frees up.
enum Grant {
    /// A connection that just went idle. Still has to be reserved.
    Reuse(Lease),
    /// Room to open a new connection.
    Slot(Slot),
}

type Waiter = oneshot::Sender<Result<Grant, NetError>>;

/// Per-destination state.
#[derive(Default)]
struct Group {
    idle: VecDeque<HttpConnection>,
    /// Connections counted against the limit that are not in `idle`:
    /// connecting, busy, or handed out and not yet reserved.
    active: usize,
    waiters: VecDeque<Waiter>,
}

impl Group {
    fn total(&self) -> usize {
        self.active + self.idle.len()
    }

    fn is_unused(&self) -> bool {
        self.total() == 0 && self.waiters.is_empty()
    }

    /// Oldest waiter still listening, with a unit of capacity moved to it.
    fn pop_waiter(&mut self) -> Option<Waiter> {
        while let Some(waiter) = self.waiters.pop_front() {
            if !waiter.is_closed() {
                self.active += 1;
                return Some(waiter);
            }
        }
        None
    }
}

/// A counted unit of capacity not yet backed by a connection. Dropping it
/// unused gives the capacity back.
struct Slot {
    pool: Weak<PoolInner>,
    dest: Destination,
    armed: bool,
}

impl Slot {
    fn consume(mut self) {
        self.armed = false;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.free_slot(&self.dest, None);
        }
    }
}

/// A connection counted against the limit that no caller has reserved yet.
/// Dropping it unreserved hands the connection back to the pool, or closes
/// it if it is still connecting.
struct Lease {
    pool: Weak<PoolInner>,
    conn: Option<HttpConnection>,
}

impl Lease {
    fn new(pool: &Arc<PoolInner>, conn: HttpConnection) -> Self {
        Self {
            pool: Arc::downgrade(pool),
            conn: Some(conn),
        }
    }

    /// Claim the connection for one exchange. `None` if it left `Idle` first.
    fn reserve(mut self) -> Option<HttpConnection> {
        let conn = self.conn.take()?;
        if conn.try_reserve() {
            return Some(conn);
        }
        // Lost to the idle reaper; its close releases the count.
        tracing::trace!(id = conn.id(), state = %conn.state(), "skipping expiring connection");
        None
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match conn.state() {
            State::Idle => {
                if let Some(pool) = self.pool.upgrade() {
                    tracing::debug!(id = conn.id(), "unclaimed connection returned to pool");
                    pool.checkin(conn);
                }
            }
            State::Connecting => {
                tracing::debug!(id = conn.id(), "caller gone while connecting");
                conn.close();
            }
            // Already on its way to Closed.
            _ => {}
        }
    }
}

enum Checkout {
    Idle(HttpConnection),
    Slot(Slot),
    Wait(oneshot::Receiver<Result<Grant, NetError>>),
}

struct PoolInner {
    groups: DashMap<Destination, Group>,
    live: DashMap<u64, HttpConnection>,
    factory: ChainFactory,
    scheduler: Arc<Scheduler>,
    config: ConnectorConfiguration,
    listeners: Vec<Arc<dyn StateListener>>,
    auth_cache: AuthCache,
    closed: AtomicBool,
}

impl PoolInner {
    async fn acquire(self: &Arc<Self>, dest: &Destination) -> Result<HttpConnection, NetError> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(NetError::ConnectionAborted);
            }
            let lease = match self.checkout(dest) {
                Checkout::Idle(conn) => Lease::new(self, conn),
                Checkout::Slot(slot) => self.open(dest, slot).await?,
                Checkout::Wait(rx) => {
                    tracing::debug!(dest = %dest, "connection limit reached, waiting");
                    match rx.await.map_err(|_| NetError::ConnectionAborted)?? {
                        Grant::Reuse(lease) => lease,
                        Grant::Slot(slot) => self.open(dest, slot).await?,
                    }
                }
            };

            if let Some(conn) = lease.reserve() {
                tracing::debug!(id = conn.id(), dest = %dest, "connection handed out");
                return Ok(conn);
            }
        }
    }

    fn checkout(self: &Arc<Self>, dest: &Destination) -> Checkout {
        let mut group = self.groups.entry(dest.clone()).or_default();
        if let Some(conn) = group.idle.pop_back() {
            group.active += 1;
            return Checkout::Idle(conn);
        }
        if group.total() < self.config.max_connections_per_destination() {
            group.active += 1;
            return Checkout::Slot(Slot {
                pool: Arc::downgrade(self),
                dest: dest.clone(),
                armed: true,
            });
        }
        let (tx, rx) = oneshot::channel();
        group.waiters.push_back(tx);
        Checkout::Wait(rx)
    }

    async fn open(self: &Arc<Self>, dest: &Destination, slot: Slot) -> Result<Lease, NetError> {
        // User listeners run before the pool reacts to a transition.
        let mut listeners = self.listeners.clone();
        listeners.push(Arc::new(PoolListener(Arc::downgrade(self))));

        let conn = HttpConnection::new(
            self.factory.build(),
            dest.clone(),
            &self.config,
            self.scheduler.clone(),
            listeners,
        );
        self.live.insert(conn.id(), conn.clone());
        slot.consume();
        if self.closed.load(Ordering::Acquire) {
            conn.abort();
            return Err(NetError::ConnectionAborted);
        }

        tracing::debug!(id = conn.id(), dest = %dest, "opening connection");
        let lease = Lease::new(self, conn.clone());
        conn.connect().await?;
        Ok(lease)
    }

    /// A connection finished an exchange, or went unclaimed, and is idle.
    fn checkin(self: &Arc<Self>, conn: HttpConnection) {
        let waiter = {
            let mut group = self.groups.entry(conn.destination().clone()).or_default();
            // Closed meanwhile: `forget` releases the count instead.
            if conn.state() != State::Idle {
                return;
            }
            group.active = group.active.saturating_sub(1);
            let waiter = group.pop_waiter();
            if waiter.is_none() {
                group.idle.push_back(conn.clone());
            }
            waiter
        };
        if let Some(waiter) = waiter {
            tracing::debug!(id = conn.id(), "handing idle connection to waiter");
            // A refused or unread lease checks the connection back in on drop.
            let _ = waiter.send(Ok(Grant::Reuse(Lease::new(self, conn))));
        }
    }

    /// Give back the capacity held by a closed connection (`leaving`) or an
    /// unused slot, and pass it to the oldest waiter.
    fn free_slot(self: &Arc<Self>, dest: &Destination, leaving: Option<u64>) {
        let waiter = {
            let Some(mut group) = self.groups.get_mut(dest) else {
                return;
            };
            let idle_pos = leaving.and_then(|id| group.idle.iter().position(|c| c.id() == id));
            match idle_pos {
                Some(pos) => {
                    group.idle.remove(pos);
                }
                None => group.active = group.active.saturating_sub(1),
            }
            if self.closed.load(Ordering::Acquire) {
                None
            } else {
                group.pop_waiter()
            }
        };
        match waiter {
            // A refused slot is dropped here and frees itself again.
            Some(waiter) => {
                let _ = waiter.send(Ok(Grant::Slot(Slot {
                    pool: Arc::downgrade(self),
                    dest: dest.clone(),
                    armed: true,
                })));
            }
            None => {
                self.groups.remove_if(dest, |_, g| g.is_unused());
            }
        }
    }

    fn forget(self: &Arc<Self>, conn: &HttpConnection) {
        self.live.remove(&conn.id());
        self.free_slot(conn.destination(), Some(conn.id()));
    }
}

/// Moves connections in and out of the pool as their state changes.
struct PoolListener(Weak<PoolInner>);

impl StateListener for PoolListener {
    fn on_state_changed(&self, conn: &HttpConnection, old: State, new: State) {
        let Some(pool) = self.0.upgrade() else {
            return;
        };
        match (old, new) {
            (State::Received, State::Idle) => pool.checkin(conn.clone()),
            (_, State::Closed) => pool.forget(conn),
            _ => {}
        }
    }
}

/// Connections keyed by destination, at most
/// `max_connections_per_destination` each. Callers beyond the limit wait in
/// FIFO order.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(
        config: ConnectorConfiguration,
        listeners: Vec<Arc<dyn StateListener>>,
    ) -> Result<Self, NetError> {
        let auth_cache = AuthCache::new();
        let factory = ChainFactory::new(&config, auth_cache.clone())?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                groups: DashMap::new(),
                live: DashMap::new(),
                factory,
                scheduler: Arc::new(Scheduler::new()),
                config,
                listeners,
                auth_cache,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &ConnectorConfiguration {
        &self.inner.config
    }

    /// Proxy credentials learned by this pool's tunnels.
    pub fn auth_cache(&self) -> &AuthCache {
        &self.inner.auth_cache
    }

    /// Send one request on a pooled connection. Redirects are not followed.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, NetError> {
        let dest = Destination::from_url(request.url())?;
        let conn = self.inner.acquire(&dest).await?;
        conn.dispatch(request).await
    }

    /// Idle connections across all destinations.
    pub fn idle_count(&self) -> usize {
        self.inner.groups.iter().map(|g| g.idle.len()).sum()
    }

    /// Connections that are connecting or carrying an exchange.
    pub fn active_count(&self) -> usize {
        self.inner.groups.iter().map(|g| g.active).sum()
    }

    /// Callers waiting for capacity.
    pub fn pending_count(&self) -> usize {
        self.inner
            .groups
            .iter()
            .map(|g| g.waiters.iter().filter(|w| !w.is_closed()).count())
            .sum()
    }

    /// Connections not yet closed.
    pub fn total_connections(&self) -> usize {
        self.inner.live.len()
    }

    /// Close every idle connection.
    pub fn close_idle(&self) {
        let mut drained = Vec::new();
        for mut group in self.inner.groups.iter_mut() {
            let n = group.idle.len();
            drained.extend(group.idle.drain(..));
            group.active += n;
        }
        tracing::debug!(count = drained.len(), "closing idle connections");
        for conn in drained {
            conn.close();
        }
    }

    /// Fail all waiters, abort every connection and stop all timers.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut waiters = Vec::new();
        for mut group in self.inner.groups.iter_mut() {
            waiters.extend(group.waiters.drain(..));
        }
        let conns: Vec<HttpConnection> = self.inner.live.iter().map(|e| e.value().clone()).collect();
        tracing::debug!(connections = conns.len(), waiters = waiters.len(), "pool shutdown");

        for waiter in waiters {
            let _ = waiter.send(Err(NetError::ConnectionAborted));
        }
        for conn in conns {
            conn.abort();
        }
        self.inner.scheduler.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Exchange for ConnectionPool {
    fn exchange(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, NetError>> {
        Box::pin(self.execute(request))
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_per_destination", &self.inner.config.max_connections_per_destination())
            .field("total_connections", &self.total_connections())
            .field("idle", &self.idle_count())
            .field("closed", &self.is_shutdown())
            .finish()
    }
}
