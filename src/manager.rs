use crate::config::MuxConfig;
use crate::message::RequestPair;
use crate::metrics::Metrics;
use crate::reconnect::ReconnectScheduler;
use crate::registry::SubscriptionRegistry;
use crate::router::MessageRouter;
use crate::state::{ConnectionState, StateTracker};
use crate::subscription::{ResponseDecoder, Subscription, SubscriptionNotNull};
use crate::transport::{EventSink, Transport, TransportCell, TransportEvent};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything the multiplexer reacts to, in one ordered queue.
///
/// Commands from callers and events from the socket land on the same channel
/// and are consumed by a single driver task, so state transitions, reconnect
/// scheduling and frame routing never race each other.
#[derive(Debug)]
enum MuxEvent {
    /// Caller asked to connect
    Connect,
    /// A scheduled reconnect timer fired
    Reconnect,
    /// Caller asked to disconnect
    Disconnect,
    /// The transport reported something
    Transport(TransportEvent),
}

/// Multiplexes topic subscriptions over one shared WebSocket connection.
///
/// One instance owns at most one live socket. Subscriptions are
/// reference-counted per distinct subscribe request: the first subscriber
/// sends the subscribe frame, later subscribers of the same request share
/// the stream, and the unsubscribe frame goes out when the last one leaves.
/// Subscriptions survive reconnects; the multiplexer re-sends their
/// subscribe frames on every new connection.
///
/// `connect` and `disconnect` are fire-and-forget commands; observe progress
/// through [`state_changes`](Self::state_changes).
pub struct SocketMultiplexer<T: Transport> {
    event_tx: mpsc::UnboundedSender<MuxEvent>,
    registry: Arc<SubscriptionRegistry>,
    state: Arc<StateTracker>,
    metrics: Arc<Metrics>,
    driver: JoinHandle<()>,
    _transport: PhantomData<fn() -> T>,
}

impl<T: Transport> SocketMultiplexer<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, MuxConfig::default())
    }

    pub fn with_config(transport: T, config: MuxConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(StateTracker::new());
        let metrics = Arc::new(Metrics::new());
        let cell = Arc::new(TransportCell::new());
        let registry = Arc::new(SubscriptionRegistry::new(
            cell.clone(),
            metrics.clone(),
            config.channel_capacity,
        ));
        let driver = Driver {
            transport,
            scheduler: ReconnectScheduler::new(config.reconnect),
            state: state.clone(),
            registry: registry.clone(),
            router: MessageRouter::new(registry.clone(), metrics.clone()),
            cell,
            metrics: metrics.clone(),
            event_tx: event_tx.clone(),
        };
        Self {
            event_tx,
            registry,
            state,
            metrics,
            driver: tokio::spawn(driver.run(event_rx)),
            _transport: PhantomData,
        }
    }

    /// Request a connection. Ignored unless the current state permits a new
    /// attempt (idle, closed, or errored).
    pub fn connect(&self) {
        let _ = self.event_tx.send(MuxEvent::Connect);
    }

    /// Request a manual disconnect. Cancels any pending reconnect and closes
    /// the socket with code 1000. Subscriptions are kept and will be
    /// re-sent on the next connection.
    pub fn disconnect(&self) {
        let _ = self.event_tx.send(MuxEvent::Disconnect);
    }

    /// Subscribe with an explicit payload decoder. Payloads are nullable:
    /// wire nulls arrive as `None`.
    ///
    /// Dropping the returned [`Subscription`] does not count as leaving;
    /// call [`unsubscribe`](Self::unsubscribe) with the same pair.
    pub async fn subscribe<P: Send + Sync + 'static>(
        &self,
        pair: &RequestPair,
        decoder: ResponseDecoder<P>,
    ) -> Subscription<P> {
        let rx = self
            .registry
            .add(pair.subscribe().clone(), decoder.erased())
            .await;
        Subscription::new(rx)
    }

    /// Subscribe with the default serde decode for `P`
    pub async fn subscribe_json<P: DeserializeOwned + Send + Sync + 'static>(
        &self,
        pair: &RequestPair,
    ) -> Subscription<P> {
        self.subscribe(pair, ResponseDecoder::json()).await
    }

    /// Subscribe, skipping null payloads instead of delivering them
    pub async fn subscribe_not_null<P: Send + Sync + 'static>(
        &self,
        pair: &RequestPair,
        decoder: ResponseDecoder<P>,
    ) -> SubscriptionNotNull<P> {
        SubscriptionNotNull::new(self.subscribe(pair, decoder).await)
    }

    /// [`subscribe_not_null`](Self::subscribe_not_null) with the default
    /// serde decode for `P`
    pub async fn subscribe_not_null_json<P: DeserializeOwned + Send + Sync + 'static>(
        &self,
        pair: &RequestPair,
    ) -> SubscriptionNotNull<P> {
        SubscriptionNotNull::new(self.subscribe_json(pair).await)
    }

    /// Drop one logical subscriber for `pair`. When the last one leaves, the
    /// unsubscribe frame is sent and the entry is removed.
    pub async fn unsubscribe(&self, pair: &RequestPair) {
        self.registry.remove(pair).await;
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Watch connection state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl<T: Transport> Drop for SocketMultiplexer<T> {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// The single consumer of the event queue. Owns the transport and the
/// reconnect scheduler outright, so neither needs locking.
struct Driver<T: Transport> {
    transport: T,
    scheduler: ReconnectScheduler,
    state: Arc<StateTracker>,
    registry: Arc<SubscriptionRegistry>,
    router: MessageRouter,
    cell: Arc<TransportCell>,
    metrics: Arc<Metrics>,
    event_tx: mpsc::UnboundedSender<MuxEvent>,
}

impl<T: Transport> Driver<T> {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<MuxEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: MuxEvent) {
        match event {
            MuxEvent::Connect => {
                if !self.state.can_connect() {
                    debug!(state = ?self.state.current(), "connect ignored");
                    return;
                }
                self.open_socket();
            }
            MuxEvent::Reconnect => {
                if !self.state.can_connect() {
                    debug!(state = ?self.state.current(), "reconnect ignored");
                    return;
                }
                self.metrics.record_reconnection();
                info!("reconnecting");
                self.open_socket();
            }
            MuxEvent::Disconnect => {
                info!("manual disconnect");
                self.scheduler.cancel();
                self.cell.close(1000, "manual disconnect");
            }
            MuxEvent::Transport(TransportEvent::Opened) => {
                info!("socket opened");
                self.state.update(ConnectionState::Connected);
                self.metrics.record_connection();
                self.scheduler.on_connected();
                self.registry.on_socket_connected().await;
            }
            MuxEvent::Transport(TransportEvent::Closing { code, reason }) => {
                debug!(code, %reason, "socket closing");
                self.state.update(ConnectionState::Closing);
            }
            MuxEvent::Transport(TransportEvent::Closed { code, reason }) => {
                info!(code, %reason, "socket closed");
                self.cell.release();
                self.registry.on_socket_disconnected().await;
                self.state.update(ConnectionState::Closed);
            }
            MuxEvent::Transport(TransportEvent::Failed(error)) => {
                warn!(%error, "socket failed");
                self.metrics.record_error();
                self.cell.release();
                self.registry.on_socket_disconnected().await;
                self.state.update(ConnectionState::Error(Arc::new(error)));
                let tx = self.event_tx.clone();
                self.scheduler.start(move || {
                    let _ = tx.send(MuxEvent::Reconnect);
                });
            }
            MuxEvent::Transport(TransportEvent::Message(text)) => {
                self.router.handle(&text).await;
            }
        }
    }

    fn open_socket(&mut self) {
        self.state.update(ConnectionState::Connecting);
        let tx = self.event_tx.clone();
        let sink = EventSink::new(move |event| {
            let _ = tx.send(MuxEvent::Transport(event));
        });
        let handle = self.transport.connect(sink);
        self.cell.set(Arc::new(handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::message::{ChangeType, SubscribeRequest};
    use crate::transport::TransportHandle;
    use parking_lot::Mutex as SyncMutex;
    use serde::Deserialize;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Deserialize, PartialEq)]
    struct ChatMessage {
        id: String,
    }

    /// Scripted transport: each connect attempt pops the next outcome
    /// (default: succeed). Keeps the latest sink so tests can inject frames.
    #[derive(Default)]
    struct MockShared {
        fail_script: SyncMutex<VecDeque<bool>>,
        sink: SyncMutex<Option<EventSink>>,
        sent: SyncMutex<Vec<String>>,
        closes: SyncMutex<Vec<(u16, String)>>,
        connects: AtomicUsize,
    }

    impl MockShared {
        fn emit(&self, event: TransportEvent) {
            let sink = self.sink.lock().clone();
            sink.expect("no connection yet").emit(event);
        }

        fn emit_text(&self, raw: &str) {
            self.emit(TransportEvent::Message(raw.to_string()));
        }

        fn sent_actions(&self) -> Vec<(String, String)> {
            self.sent
                .lock()
                .iter()
                .map(|frame| {
                    let value: serde_json::Value = serde_json::from_str(frame).unwrap();
                    (
                        value["topic"].as_str().unwrap().to_string(),
                        value["action"].as_str().unwrap().to_string(),
                    )
                })
                .collect()
        }
    }

    struct MockTransport {
        shared: Arc<MockShared>,
    }

    impl MockTransport {
        fn new() -> (Self, Arc<MockShared>) {
            let shared = Arc::new(MockShared::default());
            (
                Self {
                    shared: shared.clone(),
                },
                shared,
            )
        }

        fn failing_first(attempts: usize) -> (Self, Arc<MockShared>) {
            let (transport, shared) = Self::new();
            *shared.fail_script.lock() = std::iter::repeat(true).take(attempts).collect();
            (transport, shared)
        }
    }

    struct MockHandle {
        shared: Arc<MockShared>,
    }

    impl TransportHandle for MockHandle {
        fn send(&self, text: String) -> bool {
            self.shared.sent.lock().push(text);
            true
        }

        fn close(&self, code: u16, reason: &str) {
            self.shared.closes.lock().push((code, reason.to_string()));
            self.shared.emit(TransportEvent::Closing {
                code,
                reason: reason.to_string(),
            });
            self.shared.emit(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            });
        }
    }

    impl Transport for MockTransport {
        type Handle = MockHandle;

        fn connect(&self, events: EventSink) -> MockHandle {
            self.shared.connects.fetch_add(1, Ordering::SeqCst);
            *self.shared.sink.lock() = Some(events.clone());
            let fail = self.shared.fail_script.lock().pop_front().unwrap_or(false);
            if fail {
                events.emit(TransportEvent::Failed(Error::ConnectionFailed(
                    "refused".to_string(),
                )));
            } else {
                events.emit(TransportEvent::Opened);
            }
            MockHandle {
                shared: self.shared.clone(),
            }
        }
    }

    async fn wait_for(
        mux: &SocketMultiplexer<MockTransport>,
        predicate: impl Fn(&ConnectionState) -> bool,
    ) {
        let mut rx = mux.state_changes();
        timeout(Duration::from_secs(30), async {
            loop {
                let state = rx.borrow().clone();
                if predicate(&state) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("timed out waiting for state");
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(30), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for condition");
    }

    fn chat_pair(group: &str) -> RequestPair {
        RequestPair::symmetric(SubscribeRequest::new("chat").with_param("groupId", group))
    }

    #[tokio::test]
    async fn test_connect_subscribe_and_route() {
        let (transport, shared) = MockTransport::new();
        let mux = SocketMultiplexer::new(transport);

        mux.connect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;

        let pair = chat_pair("G1");
        let mut subscription: Subscription<ChatMessage> = mux.subscribe_json(&pair).await;
        assert_eq!(
            shared.sent_actions(),
            [("chat".to_string(), "subscribe".to_string())]
        );

        shared.emit_text(r#"{"topic":"chat","eventType":"create","data":{"id":"m1"}}"#);
        let event = timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.change, ChangeType::Added);
        assert_eq!(event.payload.unwrap().id, "m1");

        assert_eq!(mux.metrics().connections(), 1);
        assert_eq!(mux.metrics().messages_received(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reconnects_and_resubscribes() {
        let (transport, shared) = MockTransport::new();
        let mux = SocketMultiplexer::new(transport);

        mux.connect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;
        let pair = chat_pair("G1");
        let _subscription: Subscription<ChatMessage> = mux.subscribe_json(&pair).await;

        // Socket dies mid-session
        shared.emit(TransportEvent::Failed(Error::ConnectionFailed(
            "reset".to_string(),
        )));
        wait_for(&mux, |s| matches!(s, ConnectionState::Error(_))).await;

        // Backoff elapses, reconnect fires, and the subscription comes back
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;
        wait_until(|| shared.sent_actions().len() == 2).await;
        assert_eq!(
            shared.sent_actions(),
            [
                ("chat".to_string(), "subscribe".to_string()),
                ("chat".to_string(), "subscribe".to_string()),
            ]
        );
        assert_eq!(shared.connects.load(Ordering::SeqCst), 2);
        assert_eq!(mux.metrics().reconnections(), 1);
        assert_eq!(mux.metrics().errors(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_across_consecutive_failures() {
        let (transport, shared) = MockTransport::failing_first(3);
        let mux = SocketMultiplexer::new(transport);

        mux.connect();
        // Attempts: immediate, +2s, +4s, +6s (success)
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;
        assert_eq!(shared.connects.load(Ordering::SeqCst), 4);
        assert_eq!(mux.metrics().reconnections(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let (transport, shared) = MockTransport::failing_first(100);
        let mux = SocketMultiplexer::new(transport);

        mux.connect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Error(_))).await;

        mux.disconnect();
        tokio::time::sleep(Duration::from_secs(60)).await;
        // Only the original attempt; the scheduled retry never fired
        assert_eq!(shared.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_disconnect_closes_with_1000() {
        let (transport, shared) = MockTransport::new();
        let mux = SocketMultiplexer::new(transport);

        mux.connect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;

        mux.disconnect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Closed)).await;
        assert_eq!(
            shared.closes.lock().as_slice(),
            [(1000, "manual disconnect".to_string())]
        );

        // Closed permits a fresh connect
        mux.connect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;
        assert_eq!(shared.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_ignored() {
        let (transport, shared) = MockTransport::new();
        let mux = SocketMultiplexer::new(transport);

        mux.connect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;

        mux.connect();
        mux.connect();
        // Let the driver drain the queue
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(shared.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_sends_on_open() {
        let (transport, shared) = MockTransport::new();
        let mux = SocketMultiplexer::new(transport);

        let pair = chat_pair("G1");
        let _subscription: Subscription<ChatMessage> = mux.subscribe_json(&pair).await;
        assert!(shared.sent_actions().is_empty());

        mux.connect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;
        wait_until(|| !shared.sent_actions().is_empty()).await;
        assert_eq!(
            shared.sent_actions(),
            [("chat".to_string(), "subscribe".to_string())]
        );
    }

    #[tokio::test]
    async fn test_last_unsubscribe_sends_frame() {
        let (transport, shared) = MockTransport::new();
        let mux = SocketMultiplexer::new(transport);

        mux.connect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;

        let pair = chat_pair("G1");
        let _a: Subscription<ChatMessage> = mux.subscribe_json(&pair).await;
        let _b: Subscription<ChatMessage> = mux.subscribe_json(&pair).await;

        mux.unsubscribe(&pair).await;
        assert_eq!(shared.sent_actions().len(), 1); // still just the subscribe

        mux.unsubscribe(&pair).await;
        assert_eq!(
            shared.sent_actions(),
            [
                ("chat".to_string(), "subscribe".to_string()),
                ("chat".to_string(), "unsubscribe".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_not_null_subscription_skips_deletes_without_payload() {
        let (transport, shared) = MockTransport::new();
        let mux = SocketMultiplexer::new(transport);

        mux.connect();
        wait_for(&mux, |s| matches!(s, ConnectionState::Connected)).await;

        let pair = chat_pair("G1");
        let mut subscription: SubscriptionNotNull<ChatMessage> =
            mux.subscribe_not_null_json(&pair).await;

        shared.emit_text(r#"{"topic":"chat","eventType":"delete","data":null}"#);
        shared.emit_text(r#"{"topic":"chat","eventType":"create","data":{"id":"m2"}}"#);

        let event = timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.payload.id, "m2");
        assert_eq!(event.change, ChangeType::Added);
    }
}
