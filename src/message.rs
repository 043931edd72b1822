use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single request parameter value.
///
/// Parameters form part of a subscription's identity key, so they are
/// restricted to types with stable value equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// String parameter (e.g. a user or group id)
    Str(String),
    /// Integer parameter
    Int(i64),
    /// Boolean parameter
    Bool(bool),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Identifies a logical subscription: a topic name plus request parameters
/// (e.g. userId, groupId). Two requests with identical topic and parameters
/// are the same subscription for reference-counting purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscribeRequest {
    topic: String,
    params: BTreeMap<String, ParamValue>,
}

impl SubscribeRequest {
    /// Create a request for the given topic with no parameters
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a request parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// The topic this request subscribes to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Encode the outbound subscribe frame
    pub(crate) fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&WireFrame {
            params: &self.params,
            topic: &self.topic,
            action: "subscribe",
        })
    }
}

/// Paired with a [`SubscribeRequest`]; carries the fields the wire protocol
/// needs to signal "stop sending me this topic".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnsubscribeRequest {
    topic: String,
    params: BTreeMap<String, ParamValue>,
}

impl UnsubscribeRequest {
    /// Create a request for the given topic with no parameters
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a request parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Encode the outbound unsubscribe frame
    pub(crate) fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&WireFrame {
            params: &self.params,
            topic: &self.topic,
            action: "unsubscribe",
        })
    }
}

/// A subscribe request together with its matching unsubscribe request.
/// The registry is keyed by the subscribe half.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestPair {
    subscribe: SubscribeRequest,
    unsubscribe: UnsubscribeRequest,
}

impl RequestPair {
    /// Pair an explicit subscribe/unsubscribe request
    pub fn new(subscribe: SubscribeRequest, unsubscribe: UnsubscribeRequest) -> Self {
        Self {
            subscribe,
            unsubscribe,
        }
    }

    /// Build a pair whose unsubscribe request mirrors the subscribe request's
    /// topic and parameters. This is the common case.
    pub fn symmetric(subscribe: SubscribeRequest) -> Self {
        let unsubscribe = UnsubscribeRequest {
            topic: subscribe.topic.clone(),
            params: subscribe.params.clone(),
        };
        Self {
            subscribe,
            unsubscribe,
        }
    }

    /// The subscribe half (the subscription's identity key)
    pub fn subscribe(&self) -> &SubscribeRequest {
        &self.subscribe
    }

    /// The unsubscribe half
    pub fn unsubscribe(&self) -> &UnsubscribeRequest {
        &self.unsubscribe
    }
}

/// Outbound wire frame: request parameters flattened alongside topic/action
#[derive(Serialize)]
struct WireFrame<'a> {
    #[serde(flatten)]
    params: &'a BTreeMap<String, ParamValue>,
    topic: &'a str,
    action: &'a str,
}

/// Wire-level decode result for an inbound frame. Exists only transiently
/// during routing.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub topic: String,
    #[serde(rename = "eventType")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Tag carried on every inbound message, derived from the server-sent
/// event-type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// The payload was created
    Added,
    /// The payload was updated (also the default for unknown event types)
    Modified,
    /// The payload was deleted
    Removed,
}

impl ChangeType {
    /// Map a server event-type string to a change type.
    /// Unrecognized or absent strings default to `Modified`.
    pub fn from_event_type(event_type: Option<&str>) -> Self {
        match event_type {
            Some("create") => ChangeType::Added,
            Some("update") => ChangeType::Modified,
            Some("delete") => ChangeType::Removed,
            _ => ChangeType::Modified,
        }
    }
}

/// A decoded message delivered to a subscription's consumers
#[derive(Debug, Clone, PartialEq)]
pub struct TopicEvent<P> {
    /// The decoded payload
    pub payload: P,
    /// What the server says happened to it
    pub change: ChangeType,
}
