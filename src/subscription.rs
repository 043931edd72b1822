use crate::message::{ChangeType, TopicEvent};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Decoded payload, type-erased so subscriptions with different response
/// types can share the routing machinery.
pub(crate) type ErasedPayload = Arc<dyn Any + Send + Sync>;

/// Per-subscription payload decoder installed at subscribe time
pub(crate) type PayloadDecoder =
    Arc<dyn Fn(&Value) -> serde_json::Result<ErasedPayload> + Send + Sync>;

/// What the router publishes onto a subscription's channel
#[derive(Clone)]
pub(crate) struct RoutedEvent {
    /// Decoded payload; `None` when the wire sent a null data field
    pub payload: Option<ErasedPayload>,
    pub change: ChangeType,
}

/// Tells the router how to decode payloads for a subscription: either the
/// default structural JSON decode for `T`, or an explicit custom decode
/// closure. No runtime reflection is involved.
pub struct ResponseDecoder<T> {
    decode: Arc<dyn Fn(&Value) -> serde_json::Result<T> + Send + Sync>,
}

impl<T> Clone for ResponseDecoder<T> {
    fn clone(&self) -> Self {
        Self {
            decode: self.decode.clone(),
        }
    }
}

impl<T: DeserializeOwned + Send + Sync + 'static> ResponseDecoder<T> {
    /// Default serde decode for `T`
    pub fn json() -> Self {
        Self::with(|value| serde_json::from_value(value.clone()))
    }
}

impl<T: Send + Sync + 'static> ResponseDecoder<T> {
    /// Custom decode closure
    pub fn with(decode: impl Fn(&Value) -> serde_json::Result<T> + Send + Sync + 'static) -> Self {
        Self {
            decode: Arc::new(decode),
        }
    }

    pub(crate) fn erased(&self) -> PayloadDecoder {
        let decode = self.decode.clone();
        Arc::new(move |value| decode(value).map(|payload| Arc::new(payload) as ErasedPayload))
    }
}

/// A consumer's view of one logical subscription.
///
/// Payloads are `Option<Arc<T>>`: `None` for wire nulls, and for payloads
/// decoded under a different type by an earlier subscriber of the same key.
/// `recv` returns `None` once the subscription has been removed and all
/// buffered events are drained.
pub struct Subscription<T> {
    rx: broadcast::Receiver<RoutedEvent>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Subscription<T> {
    pub(crate) fn new(rx: broadcast::Receiver<RoutedEvent>) -> Self {
        Self {
            rx,
            _marker: PhantomData,
        }
    }

    /// Receive the next event for this subscription
    pub async fn recv(&mut self) -> Option<TopicEvent<Option<Arc<T>>>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    let payload = event.payload.and_then(|payload| {
                        let downcast = payload.downcast::<T>().ok();
                        if downcast.is_none() {
                            trace!("payload type mismatch, delivering null");
                        }
                        downcast
                    });
                    return Some(TopicEvent {
                        payload,
                        change: event.change,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "slow subscription consumer, skipping events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// A [`Subscription`] that never yields null payloads: wire nulls and decode
/// mismatches simply produce no emission for that frame.
pub struct SubscriptionNotNull<T> {
    inner: Subscription<T>,
}

impl<T: Send + Sync + 'static> SubscriptionNotNull<T> {
    pub(crate) fn new(inner: Subscription<T>) -> Self {
        Self { inner }
    }

    /// Receive the next non-null event for this subscription
    pub async fn recv(&mut self) -> Option<TopicEvent<Arc<T>>> {
        loop {
            let event = self.inner.recv().await?;
            if let Some(payload) = event.payload {
                return Some(TopicEvent {
                    payload,
                    change: event.change,
                });
            }
        }
    }
}
