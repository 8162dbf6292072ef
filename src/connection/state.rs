use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Protocol state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    Connecting = 0,
    Idle = 1,
    SendingRequest = 2,
    ReceivingHeader = 3,
    ReceivingBody = 4,
    Received = 5,
    ConnectTimeout = 6,
    ResponseTimeout = 7,
    IdleTimeout = 8,
    Error = 9,
    Closed = 10,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Connecting,
            1 => State::Idle,
            2 => State::SendingRequest,
            3 => State::ReceivingHeader,
            4 => State::ReceivingBody,
            5 => State::Received,
            6 => State::ConnectTimeout,
            7 => State::ResponseTimeout,
            8 => State::IdleTimeout,
            9 => State::Error,
            _ => State::Closed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == State::Closed
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            State::ConnectTimeout | State::ResponseTimeout | State::IdleTimeout
        )
    }

    /// States in which an exchange is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            State::SendingRequest | State::ReceivingHeader | State::ReceivingBody | State::Received
        )
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: State) -> bool {
        use State::*;
        match (*self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (ConnectTimeout | ResponseTimeout | IdleTimeout | Error, _) => false,
            (_, Error) => true,
            (Connecting, Idle | ConnectTimeout) => true,
            (Idle, SendingRequest | IdleTimeout) => true,
            (SendingRequest, ReceivingHeader) => true,
            (ReceivingHeader, ReceivingBody | ResponseTimeout) => true,
            (ReceivingBody, Received | ResponseTimeout) => true,
            (Received, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Lock-free holder for a [`State`].
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> State {
        State::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Swap `from` for `to`; false if the current state is not `from`.
    pub(crate) fn compare_exchange(&self, from: State, to: State) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
