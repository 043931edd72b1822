use crate::message::{ChangeType, Envelope};
use crate::metrics::Metrics;
use crate::registry::SubscriptionRegistry;
use crate::subscription::RoutedEvent;
use std::sync::Arc;
use tracing::{trace, warn};

/// Decodes raw frames into topic-tagged envelopes and fans them out to every
/// registered subscription on that topic, decoding the payload once per
/// subscription. Malformed frames and per-subscription decode failures are
/// logged and dropped; they never reach consumers and never stop routing for
/// the other subscriptions on the same frame.
pub(crate) struct MessageRouter {
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<Metrics>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SubscriptionRegistry>, metrics: Arc<Metrics>) -> Self {
        Self { registry, metrics }
    }

    /// Handle one inbound text frame. Frames are processed one at a time in
    /// arrival order, preserving per-topic ordering.
    pub async fn handle(&self, raw: &str) {
        self.metrics.record_message_received();
        trace!(frame = raw, "inbound frame");

        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(error) => {
                self.metrics.record_decode_failure();
                warn!(%error, "dropping undecodable frame");
                return;
            }
        };

        let change = ChangeType::from_event_type(envelope.event_type.as_deref());
        let targets = self.registry.find_by_topic(&envelope.topic).await;
        if targets.is_empty() {
            trace!(topic = envelope.topic, "no subscriptions for topic");
            return;
        }

        for target in targets {
            let payload = if envelope.data.is_null() {
                None
            } else {
                match (target.decoder)(&envelope.data) {
                    Ok(payload) => Some(payload),
                    Err(error) => {
                        self.metrics.record_decode_failure();
                        warn!(
                            topic = envelope.topic,
                            %error,
                            "payload decode failed for one subscription, skipping it"
                        );
                        continue;
                    }
                }
            };
            // Publishing never blocks and never fails the router; a send
            // error just means no consumer is currently listening.
            let _ = target.channel.send(RoutedEvent { payload, change });
        }
    }
}
