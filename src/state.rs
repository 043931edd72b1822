use crate::error::Error;
use std::sync::Arc;
use tokio::sync::watch;

/// The single process-wide connection state
#[derive(Debug, Clone, Default)]
pub enum ConnectionState {
    /// Never connected, or reset
    #[default]
    Idle,
    /// Connect requested, handshake in progress
    Connecting,
    /// Socket is open
    Connected,
    /// Peer initiated close
    Closing,
    /// Socket closed cleanly
    Closed,
    /// Socket failed
    Error(Arc<Error>),
}

impl ConnectionState {
    /// True iff a new connect attempt is currently permitted
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Error(_)
        )
    }
}

/// Holds the current connection state and publishes changes to observers.
///
/// `update` is an unconditional overwrite; transition legality is enforced
/// by the callers (the multiplexer's driver task).
#[derive(Debug)]
pub(crate) struct StateTracker {
    tx: watch::Sender<ConnectionState>,
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Idle);
        Self { tx }
    }

    pub fn update(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    pub fn current(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    pub fn can_connect(&self) -> bool {
        self.tx.borrow().can_connect()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}
