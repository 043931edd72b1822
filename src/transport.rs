use crate::error::Error;
use parking_lot::Mutex;
use std::sync::Arc;

/// Lifecycle and frame events emitted by a transport, in the order the
/// underlying socket produced them.
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake completed, the socket is open
    Opened,
    /// Peer initiated close
    Closing { code: u16, reason: String },
    /// Socket fully closed
    Closed { code: u16, reason: String },
    /// Socket failed (handshake error, I/O error, protocol error)
    Failed(Error),
    /// A text frame arrived
    Message(String),
}

/// Where a transport delivers its events. Events are funneled into the
/// multiplexer's single ordered queue; emitting never blocks.
#[derive(Clone)]
pub struct EventSink {
    emit: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    pub(crate) fn new(emit: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Deliver a transport event
    pub fn emit(&self, event: TransportEvent) {
        (self.emit)(event);
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventSink")
    }
}

/// Handle to a live (or connecting) socket.
///
/// `send` is best-effort: it returns `true` if the frame was accepted for
/// transmission and `false` if the socket is already gone. It never blocks.
pub trait TransportHandle: Send + Sync + 'static {
    /// Queue a text frame for sending
    fn send(&self, text: String) -> bool;
    /// Initiate a close handshake
    fn close(&self, code: u16, reason: &str);
}

/// Opens physical WebSocket connections.
///
/// `connect` must not block: implementations start the handshake in the
/// background and report the outcome (`Opened` or `Failed`) through the sink.
/// The multiplexer never holds more than one handle at a time.
pub trait Transport: Send + Sync + 'static {
    /// The handle type produced by this transport
    type Handle: TransportHandle;

    /// Begin connecting and return a handle for outbound frames
    fn connect(&self, events: EventSink) -> Self::Handle;
}

/// Swappable cell for the single transport handle.
///
/// Only the multiplexer's driver task writes it; registry and router code
/// read it and must tolerate "no handle currently" as a valid state
/// (sends silently no-op and return false).
#[derive(Default)]
pub(crate) struct TransportCell {
    handle: Mutex<Option<Arc<dyn TransportHandle>>>,
}

impl TransportCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, handle: Arc<dyn TransportHandle>) {
        *self.handle.lock() = Some(handle);
    }

    pub fn release(&self) {
        *self.handle.lock() = None;
    }

    /// Best-effort send against the current handle, if any
    pub fn send(&self, text: String) -> bool {
        let guard = self.handle.lock();
        match guard.as_ref() {
            Some(handle) => handle.send(text),
            None => false,
        }
    }

    /// Close the current handle, if any
    pub fn close(&self, code: u16, reason: &str) {
        let guard = self.handle.lock();
        if let Some(handle) = guard.as_ref() {
            handle.close(code, reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingHandle {
        sent: Mutex<Vec<String>>,
        accept: bool,
    }

    impl TransportHandle for RecordingHandle {
        fn send(&self, text: String) -> bool {
            self.sent.lock().push(text);
            self.accept
        }

        fn close(&self, _code: u16, _reason: &str) {}
    }

    #[test]
    fn test_cell_send_without_handle_is_noop() {
        let cell = TransportCell::new();
        assert!(!cell.send("frame".to_string()));
        cell.close(1000, "bye"); // must not panic
    }

    #[test]
    fn test_cell_send_with_handle() {
        let cell = TransportCell::new();
        let handle = Arc::new(RecordingHandle {
            sent: Mutex::new(Vec::new()),
            accept: true,
        });
        cell.set(handle.clone());

        assert!(cell.send("frame".to_string()));
        assert_eq!(handle.sent.lock().as_slice(), ["frame"]);

        cell.release();
        assert!(!cell.send("late".to_string()));
        assert_eq!(handle.sent.lock().len(), 1);
    }
}
