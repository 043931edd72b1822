use crate::message::{RequestPair, SubscribeRequest};
use crate::metrics::Metrics;
use crate::subscription::{PayloadDecoder, RoutedEvent};
use crate::transport::TransportCell;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

/// Lifecycle of a subscription entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionState {
    /// Never subscribed, or reset by a disconnect; needs a (re)subscribe
    Idle,
    /// Subscribe frame sent against a live socket
    Subscribed,
    /// Subscriber count hit zero; unsubscribe sent or pending, entry draining
    ToClose,
}

/// Internal record per unique subscribe request
struct SubscriptionEntry {
    decoder: PayloadDecoder,
    channel: broadcast::Sender<RoutedEvent>,
    subscribers: usize,
    state: SubscriptionState,
}

/// Routing view of one registered subscription
pub(crate) struct RouteTarget {
    pub decoder: PayloadDecoder,
    pub channel: broadcast::Sender<RoutedEvent>,
}

/// Maps each distinct subscribe request to a reference count, a payload
/// decoder, and a broadcast channel of decoded messages.
///
/// All mutations are serialized by one async mutex; that lock, not the
/// multiplexer's event queue, is the authoritative serialization point for
/// registry state, because subscribe/unsubscribe callers touch it directly.
pub(crate) struct SubscriptionRegistry {
    subscriptions: Mutex<HashMap<SubscribeRequest, SubscriptionEntry>>,
    transport: Arc<TransportCell>,
    metrics: Arc<Metrics>,
    channel_capacity: usize,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<TransportCell>, metrics: Arc<Metrics>, channel_capacity: usize) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            transport,
            metrics,
            channel_capacity,
        }
    }

    /// Register a logical subscriber for `request`, creating the entry on
    /// first use. Sends the subscribe frame if the entry needs one and a
    /// live socket exists. All subscribers of the same key share one channel.
    pub async fn add(
        &self,
        request: SubscribeRequest,
        decoder: PayloadDecoder,
    ) -> broadcast::Receiver<RoutedEvent> {
        let mut subscriptions = self.subscriptions.lock().await;
        let capacity = self.channel_capacity;
        let entry = subscriptions.entry(request.clone()).or_insert_with(|| {
            let (channel, _) = broadcast::channel(capacity);
            SubscriptionEntry {
                decoder,
                channel,
                subscribers: 0,
                state: SubscriptionState::Idle,
            }
        });
        entry.subscribers += 1;
        debug!(
            topic = request.topic(),
            subscribers = entry.subscribers,
            "subscriber added"
        );
        let rx = entry.channel.subscribe();
        if entry.state == SubscriptionState::Idle {
            Self::send_subscribe(&self.transport, &self.metrics, &request, entry);
        }
        rx
    }

    /// Drop a logical subscriber. When the count reaches zero the entry is
    /// marked draining and the unsubscribe frame is sent; the entry is
    /// deleted only once that send is confirmed. If no live socket exists
    /// the entry stays in `ToClose` (no publishes reach it) until a later
    /// unsubscribe succeeds.
    pub async fn remove(&self, pair: &RequestPair) {
        let mut subscriptions = self.subscriptions.lock().await;
        let Some(entry) = subscriptions.get_mut(pair.subscribe()) else {
            return;
        };
        if entry.state == SubscriptionState::ToClose {
            // Already draining; a stray extra unsubscribe is a no-op
            return;
        }
        entry.subscribers = entry.subscribers.saturating_sub(1);
        debug!(
            topic = pair.subscribe().topic(),
            subscribers = entry.subscribers,
            "subscriber removed"
        );
        if entry.subscribers > 0 {
            return;
        }
        entry.state = SubscriptionState::ToClose;
        match pair.unsubscribe().encode() {
            Ok(frame) => {
                if self.transport.send(frame) {
                    self.metrics.record_message_sent();
                    subscriptions.remove(pair.subscribe());
                } else {
                    debug!(
                        topic = pair.subscribe().topic(),
                        "no live socket for unsubscribe, entry left draining"
                    );
                }
            }
            Err(error) => {
                warn!(%error, "failed to encode unsubscribe frame");
            }
        }
    }

    /// Re-send the subscribe frame for every entry needing one. Called when
    /// the socket (re)connects; this is what makes subscriptions durable
    /// across reconnects.
    pub async fn on_socket_connected(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for (request, entry) in subscriptions.iter_mut() {
            if entry.state == SubscriptionState::Idle {
                Self::send_subscribe(&self.transport, &self.metrics, request, entry);
            }
        }
    }

    /// Reset every non-draining entry to `Idle` so the next connection
    /// re-subscribes it. Draining entries are left alone.
    pub async fn on_socket_disconnected(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for entry in subscriptions.values_mut() {
            if entry.state != SubscriptionState::ToClose {
                entry.state = SubscriptionState::Idle;
            }
        }
    }

    /// All registered subscriptions for `topic`, excluding draining entries.
    /// Multiple distinct subscriptions (different parameters) can share a
    /// topic name.
    pub async fn find_by_topic(&self, topic: &str) -> Vec<RouteTarget> {
        let subscriptions = self.subscriptions.lock().await;
        subscriptions
            .iter()
            .filter(|(request, entry)| {
                request.topic() == topic && entry.state != SubscriptionState::ToClose
            })
            .map(|(_, entry)| RouteTarget {
                decoder: entry.decoder.clone(),
                channel: entry.channel.clone(),
            })
            .collect()
    }

    fn send_subscribe(
        transport: &TransportCell,
        metrics: &Metrics,
        request: &SubscribeRequest,
        entry: &mut SubscriptionEntry,
    ) {
        let frame = match request.encode() {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "failed to encode subscribe frame");
                return;
            }
        };
        debug!(topic = request.topic(), "sending subscribe frame");
        if transport.send(frame) {
            metrics.record_message_sent();
            entry.state = SubscriptionState::Subscribed;
        } else {
            debug!(
                topic = request.topic(),
                "no live socket, subscribe deferred until connect"
            );
        }
    }

    #[cfg(test)]
    pub async fn subscriber_count(&self, request: &SubscribeRequest) -> Option<usize> {
        let subscriptions = self.subscriptions.lock().await;
        subscriptions.get(request).map(|entry| entry.subscribers)
    }

    #[cfg(test)]
    pub async fn state_of(&self, request: &SubscribeRequest) -> Option<SubscriptionState> {
        let subscriptions = self.subscriptions.lock().await;
        subscriptions.get(request).map(|entry| entry.state)
    }
}
