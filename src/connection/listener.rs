use super::connection::HttpConnection;
use super::state::State;

/// Observer of connection state transitions.
///
/// Called synchronously on the task that performed the transition, with no
/// connection lock held, before anything that depends on the new state.
/// Implementations must not block.
pub trait StateListener: Send + Sync + 'static {
    fn on_state_changed(&self, connection: &HttpConnection, old: State, new: State);
}

impl<F> StateListener for F
where
    F: Fn(&HttpConnection, State, State) + Send + Sync + 'static,
{
    fn on_state_changed(&self, connection: &HttpConnection, old: State, new: State) {
        self(connection, old, new)
    }
}
