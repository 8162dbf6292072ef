//! One HTTP/1.1 connection and the task that drives its filter chain.
//!
//! The handle ([`HttpConnection`]) is cheap to clone. All I/O happens on a
//! driver task spawned at construction; the handle talks to it through a
//! command channel. State changes are compare-and-swap on an atomic, and the
//! winner of each swap notifies every listener before doing anything that
//! depends on the new state.

use super::listener::StateListener;
use super::state::{AtomicState, State};
use crate::base::neterror::NetError;
use crate::config::ConnectorConfiguration;
use crate::filter::{Destination, Filter, HttpFilter};
use crate::http::codec::ResponseItem;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::http::responsebody::{BodySender, ResponseBody};
use crate::scheduler::{Scheduler, TimerHandle};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

const RESPONSE_STATES: &[State] = &[State::ReceivingHeader, State::ReceivingBody];

enum Command {
    Connect(oneshot::Sender<Result<(), NetError>>),
    Send(HttpRequest, oneshot::Sender<Result<HttpResponse, NetError>>),
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    connect: Duration,
    response: Duration,
    idle: Duration,
}

struct Inner {
    id: u64,
    destination: Destination,
    state: AtomicState,
    listeners: Vec<Arc<dyn StateListener>>,
    /// First failure recorded, as a `NetError` code; 0 while there is none.
    cause: AtomicI32,
    errored: AtomicBool,
    connect_called: AtomicBool,
    /// Bumped on every reservation so a late timer from an earlier
    /// exchange cannot act on a later one.
    epoch: AtomicU64,
    created_at: Instant,
    last_used: Mutex<Instant>,
    local_addr: OnceLock<SocketAddr>,
    timeouts: Timeouts,
    scheduler: Arc<Scheduler>,
    timer: Mutex<Option<TimerHandle>>,
    token: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(timer) = self.timer.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            timer.cancel();
        }
    }
}

/// A single HTTP/1.1 connection to one destination.
#[derive(Clone)]
pub struct HttpConnection {
    inner: Arc<Inner>,
}

impl HttpConnection {
    /// Create a connection in `Connecting` that will drive `chain`.
    ///
    /// Must be called within a tokio runtime. Nothing touches the network
    /// until [`connect`](Self::connect).
    pub fn new<F: Filter>(
        chain: HttpFilter<F>,
        destination: Destination,
        config: &ConnectorConfiguration,
        scheduler: Arc<Scheduler>,
        listeners: Vec<Arc<dyn StateListener>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let inner = Arc::new(Inner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            destination,
            state: AtomicState::new(State::Connecting),
            listeners,
            cause: AtomicI32::new(0),
            errored: AtomicBool::new(false),
            connect_called: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            created_at: now,
            last_used: Mutex::new(now),
            local_addr: OnceLock::new(),
            timeouts: Timeouts {
                connect: config.connect_timeout(),
                response: config.response_timeout(),
                idle: config.idle_timeout(),
            },
            scheduler,
            timer: Mutex::new(None),
            token: CancellationToken::new(),
            commands: tx,
        });

        let driver = Driver {
            conn: Arc::downgrade(&inner),
            chain,
            commands: rx,
            token: inner.token.clone(),
            destination: inner.destination.clone(),
        };
        tokio::spawn(driver.run());
        Self { inner }
    }

    /// Monotonic id, unique within the process.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> State {
        self.inner.state.load()
    }

    pub fn destination(&self) -> &Destination {
        &self.inner.destination
    }

    /// Local address of the socket, once connected.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// When the last exchange on this connection completed.
    pub fn last_used(&self) -> Instant {
        *self.inner.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The failure that moved this connection to `Error`, if it went there.
    pub fn error(&self) -> Option<NetError> {
        if self.inner.errored.load(Ordering::Acquire) {
            self.cause()
        } else {
            None
        }
    }

    /// Establish the filter chain. May be called once.
    pub async fn connect(&self) -> Result<(), NetError> {
        if self.inner.connect_called.swap(true, Ordering::AcqRel) {
            return Err(NetError::InvalidState);
        }
        let (tx, rx) = oneshot::channel();
        if self.inner.commands.send(Command::Connect(tx)).is_err() {
            return Err(self.cause_or(NetError::ConnectionAborted));
        }
        rx.await
            .unwrap_or_else(|_| Err(self.cause_or(NetError::ConnectionAborted)))
    }

    /// Send `request` and resolve with the response head. Valid only from
    /// `Idle`; the body streams afterwards through the response.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetError> {
        if !self.try_reserve() {
            return Err(NetError::InvalidState);
        }
        self.dispatch(request).await
    }

    /// Close the connection from whatever state it is in.
    pub fn close(&self) {
        if self.transition_any(State::Closed, |_| {}) {
            tracing::debug!(id = self.id(), dest = %self.inner.destination, "connection closed");
        }
    }

    /// Report a failure detected outside of a pending write. The connection
    /// goes to `Error` and then `Closed`; later reports are ignored.
    pub fn on_error(&self, error: NetError) {
        self.fail(error);
    }

    /// Claim an idle connection for one exchange.
    pub(crate) fn try_reserve(&self) -> bool {
        self.transition_with(State::Idle, State::SendingRequest, |c| {
            c.inner.epoch.fetch_add(1, Ordering::AcqRel);
            c.clear_timer();
        })
    }

    /// Hand a request to the driver. The connection must already be
    /// reserved.
    pub(crate) async fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, NetError> {
        let (tx, rx) = oneshot::channel();
        if self.inner.commands.send(Command::Send(request, tx)).is_err() {
            return Err(self.cause_or(NetError::ConnectionAborted));
        }
        rx.await
            .unwrap_or_else(|_| Err(self.cause_or(NetError::ConnectionAborted)))
    }

    /// Fail the connection with `ConnectionAborted`.
    pub(crate) fn abort(&self) {
        self.fail(NetError::ConnectionAborted);
    }

    fn cause(&self) -> Option<NetError> {
        match self.inner.cause.load(Ordering::Acquire) {
            0 => None,
            code => Some(NetError::from(code)),
        }
    }

    fn cause_or(&self, fallback: NetError) -> NetError {
        self.cause().unwrap_or(fallback)
    }

    fn record_cause(&self, error: NetError) {
        let _ = self.inner.cause.compare_exchange(
            0,
            error.as_i32(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn fail(&self, error: NetError) {
        let failed = self.transition_any(State::Error, |c| {
            c.record_cause(error);
            c.inner.errored.store(true, Ordering::Release);
        });
        if failed {
            tracing::warn!(id = self.id(), dest = %self.inner.destination, error = %error, "connection failed");
            self.transition(State::Error, State::Closed);
        }
    }

    /// Timer expiry: move from one of `from` to the timeout state, then close.
    fn expire(&self, from: &[State], to: State, cause: Option<NetError>) {
        for state in from {
            let won = self.transition_with(*state, to, |c| {
                if let Some(e) = cause {
                    c.record_cause(e);
                }
            });
            if won {
                tracing::debug!(id = self.id(), dest = %self.inner.destination, state = %to, "connection timed out");
                self.transition(to, State::Closed);
                return;
            }
        }
    }

    fn transition(&self, from: State, to: State) -> bool {
        self.transition_with(from, to, |_| {})
    }

    /// Swap `from` for `to`, run `hook`, then notify listeners. Returns
    /// false, doing nothing, if the state was not `from`.
    fn transition_with(&self, from: State, to: State, hook: impl FnOnce(&Self)) -> bool {
        if !from.can_transition_to(to) || !self.inner.state.compare_exchange(from, to) {
            return false;
        }
        self.committed(from, to, hook);
        true
    }

    /// Like `transition_with`, from whatever the current state is.
    fn transition_any(&self, to: State, hook: impl FnOnce(&Self)) -> bool {
        loop {
            let from = self.inner.state.load();
            if !from.can_transition_to(to) {
                return false;
            }
            if self.inner.state.compare_exchange(from, to) {
                self.committed(from, to, hook);
                return true;
            }
        }
    }

    fn committed(&self, from: State, to: State, hook: impl FnOnce(&Self)) {
        hook(self);
        if to == State::Closed {
            self.clear_timer();
            self.inner.token.cancel();
        }
        tracing::trace!(id = self.id(), from = %from, to = %to, "state transition");
        for listener in &self.inner.listeners {
            listener.on_state_changed(self, from, to);
        }
    }

    fn arm_timer(&self, delay: Duration, from: &'static [State], to: State, cause: Option<NetError>) {
        let epoch = self.inner.epoch.load(Ordering::Acquire);
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.scheduler.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                if inner.epoch.load(Ordering::Acquire) == epoch {
                    HttpConnection { inner }.expire(from, to, cause);
                }
            }
        });
        self.set_timer(Some(handle));
    }

    fn arm_idle_timer(&self) {
        self.arm_timer(self.inner.timeouts.idle, &[State::Idle], State::IdleTimeout, None);
    }

    fn set_timer(&self, handle: Option<TimerHandle>) {
        let old = {
            let mut slot = self.inner.timer.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, handle)
        };
        if let Some(old) = old {
            old.cancel();
        }
    }

    fn clear_timer(&self) {
        self.set_timer(None);
    }

    fn touch(&self) {
        *self.inner.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}

impl fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnection")
            .field("id", &self.inner.id)
            .field("destination", &self.inner.destination)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// What woke the driver.
enum Event {
    Command(Command),
    /// The peer spoke, or hung up, while nothing was in flight.
    IdleRead(Option<Result<ResponseItem, NetError>>),
}

struct Driver<F> {
    conn: Weak<Inner>,
    chain: HttpFilter<F>,
    commands: mpsc::UnboundedReceiver<Command>,
    token: CancellationToken,
    destination: Destination,
}

impl<F: Filter> Driver<F> {
    async fn run(mut self) {
        loop {
            let watch_idle = self
                .conn
                .upgrade()
                .is_some_and(|inner| inner.state.load() == State::Idle);

            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => Event::Command(cmd),
                    None => break,
                },
                item = self.chain.read(), if watch_idle => Event::IdleRead(item),
            };

            let Some(inner) = self.conn.upgrade() else {
                break;
            };
            let conn = HttpConnection { inner };
            match event {
                Event::Command(Command::Connect(reply)) => {
                    let result = self.connect(&conn).await;
                    let _ = reply.send(result);
                }
                Event::Command(Command::Send(request, reply)) => {
                    self.exchange(&conn, request, reply).await;
                }
                Event::IdleRead(item) => {
                    let error = match item {
                        None => NetError::SocketRemoteClosed,
                        Some(Ok(_)) => NetError::DataReceivedUnexpectedly,
                        Some(Err(e)) => e,
                    };
                    tracing::debug!(id = conn.id(), error = %error, "idle connection disturbed");
                    conn.fail(error);
                }
            }
        }
        tracing::trace!(dest = %self.destination, "connection driver stopped");
    }

    async fn connect(&mut self, conn: &HttpConnection) -> Result<(), NetError> {
        if conn.state() != State::Connecting {
            return Err(conn.cause_or(NetError::InvalidState));
        }
        conn.arm_timer(
            conn.inner.timeouts.connect,
            &[State::Connecting],
            State::ConnectTimeout,
            Some(NetError::ConnectionTimedOut),
        );

        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(conn.cause_or(NetError::ConnectionAborted)),
            r = self.chain.connect(&self.destination) => r,
        };

        match result {
            Ok(()) => {
                if let Some(addr) = self.chain.local_addr() {
                    let _ = conn.inner.local_addr.set(addr);
                }
                let ready = conn.transition_with(State::Connecting, State::Idle, |c| {
                    c.arm_idle_timer();
                });
                if ready {
                    tracing::debug!(id = conn.id(), dest = %self.destination, local = ?conn.local_addr(), "connected");
                    Ok(())
                } else {
                    Err(conn.cause_or(NetError::ConnectionAborted))
                }
            }
            Err(e) => {
                conn.fail(e);
                Err(conn.cause_or(e))
            }
        }
    }

    /// Next response item, or the connection's failure if it was torn down
    /// meanwhile. `Ok(None)` means the peer closed cleanly.
    async fn next_item(&mut self, conn: &HttpConnection) -> Result<Option<ResponseItem>, NetError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(conn.cause_or(NetError::ConnectionAborted)),
            item = self.chain.read() => item.transpose(),
        }
    }

    async fn exchange(
        &mut self,
        conn: &HttpConnection,
        request: HttpRequest,
        reply: oneshot::Sender<Result<HttpResponse, NetError>>,
    ) {
        if conn.state() != State::SendingRequest {
            let _ = reply.send(Err(conn.cause_or(NetError::InvalidState)));
            return;
        }
        let url = request.url().clone();
        let close_requested = request.wants_close();
        self.chain.expect_response(request.method());
        tracing::debug!(id = conn.id(), method = %request.method(), url = %url, "sending request");

        let written = tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(conn.cause_or(NetError::ConnectionAborted)),
            r = self.chain.write(request) => r,
        };
        if let Err(e) = written {
            conn.fail(e);
            let _ = reply.send(Err(conn.cause_or(e)));
            return;
        }

        let waiting = conn.transition_with(State::SendingRequest, State::ReceivingHeader, |c| {
            c.arm_timer(
                c.inner.timeouts.response,
                RESPONSE_STATES,
                State::ResponseTimeout,
                Some(NetError::ResponseTimedOut),
            );
        });
        if !waiting {
            let _ = reply.send(Err(conn.cause_or(NetError::ConnectionAborted)));
            return;
        }

        let head = loop {
            let failure = match self.next_item(conn).await {
                Ok(Some(ResponseItem::Head(head))) if head.is_interim() => {
                    tracing::trace!(id = conn.id(), status = head.status.as_u16(), "interim response");
                    continue;
                }
                Ok(Some(ResponseItem::Head(head))) => break head,
                Ok(Some(_)) => NetError::InvalidResponse,
                Ok(None) => NetError::EmptyResponse,
                Err(e) => e,
            };
            conn.fail(failure);
            let _ = reply.send(Err(conn.cause_or(failure)));
            return;
        };

        if !conn.transition(State::ReceivingHeader, State::ReceivingBody) {
            let _ = reply.send(Err(conn.cause_or(NetError::ConnectionAborted)));
            return;
        }
        tracing::debug!(id = conn.id(), status = head.status.as_u16(), "response head received");

        let (tx, body) = ResponseBody::channel();
        let response = HttpResponse::new(head, body, url, conn.id());
        // The caller may have given up; the body is still drained so the
        // connection stays reusable.
        let mut tx = reply.send(Ok(response)).ok().map(|_| tx);

        loop {
            match self.next_item(conn).await {
                Ok(Some(ResponseItem::Body(chunk))) => {
                    let Some(sender) = &tx else { continue };
                    let delivered = tokio::select! {
                        biased;
                        _ = self.token.cancelled() => None,
                        r = sender.send(Ok(chunk)) => Some(r.is_ok()),
                    };
                    match delivered {
                        Some(true) => {}
                        Some(false) => tx = None,
                        None => {
                            deliver_error(tx.take(), conn.cause_or(NetError::ConnectionAborted));
                            return;
                        }
                    }
                }
                Ok(Some(ResponseItem::Eof)) => break,
                Ok(other) => {
                    let failure = match other {
                        None => NetError::ConnectionClosed,
                        Some(_) => NetError::InvalidResponse,
                    };
                    conn.fail(failure);
                    deliver_error(tx.take(), conn.cause_or(failure));
                    return;
                }
                Err(e) => {
                    conn.fail(e);
                    deliver_error(tx.take(), conn.cause_or(e));
                    return;
                }
            }
        }

        let reusable = self.chain.is_keep_alive() && !close_requested;
        let received = conn.transition_with(State::ReceivingBody, State::Received, |c| {
            c.clear_timer();
            c.touch();
        });
        if !received {
            deliver_error(tx.take(), conn.cause_or(NetError::ConnectionAborted));
            return;
        }
        if !(reusable && conn.transition_with(State::Received, State::Idle, |c| c.arm_idle_timer())) {
            tracing::debug!(id = conn.id(), "connection not persistent");
            conn.transition(State::Received, State::Closed);
        }
        // The body ends only once the connection is back in the pool.
        drop(tx);
    }
}

fn deliver_error(tx: Option<BodySender>, error: NetError) {
    if let Some(tx) = tx {
        tokio::spawn(async move {
            let _ = tx.send(Err(error)).await;
        });
    }
}
