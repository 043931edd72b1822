//! Topic-based pub/sub multiplexing over a single shared WebSocket.
//!
//! Features:
//! - One shared socket for any number of topic subscriptions
//! - Per-request reference counting: one subscribe frame per distinct
//!   request, one unsubscribe frame when the last subscriber leaves
//! - Typed subscriptions with per-subscription payload decoders
//! - Automatic reconnection with linear backoff and re-subscription
//! - Observable connection state and counters
//!
//! # Example
//!
//! ```ignore
//! use ws_topic_mux::{
//!     RequestPair, SocketMultiplexer, SubscribeRequest, WsTransport, WsTransportConfig,
//! };
//!
//! #[derive(serde::Deserialize)]
//! struct ChatMessage {
//!     id: String,
//!     text: String,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = WsTransport::new(WsTransportConfig::new("wss://example.com/socket"));
//!     let mux = SocketMultiplexer::new(transport);
//!     mux.connect();
//!
//!     let pair = RequestPair::symmetric(
//!         SubscribeRequest::new("chat").with_param("groupId", "G1"),
//!     );
//!     let mut messages = mux.subscribe_json::<ChatMessage>(&pair).await;
//!     while let Some(event) = messages.recv().await {
//!         if let Some(message) = event.payload {
//!             println!("{:?}: {}", event.change, message.text);
//!         }
//!     }
//! }
//! ```

mod config;
mod error;
mod manager;
mod message;
mod metrics;
mod reconnect;
mod registry;
mod router;
mod state;
mod subscription;
mod transport;
mod ws;

pub use config::{ConfigError, MuxConfig, MuxConfigBuilder, ReconnectConfig};
pub use error::Error;
pub use manager::SocketMultiplexer;
pub use message::{
    ChangeType, ParamValue, RequestPair, SubscribeRequest, TopicEvent, UnsubscribeRequest,
};
pub use metrics::{Metrics, MetricsSnapshot};
pub use state::ConnectionState;
pub use subscription::{ResponseDecoder, Subscription, SubscriptionNotNull};
pub use transport::{EventSink, Transport, TransportEvent, TransportHandle};
pub use ws::{WsHandle, WsTransport, WsTransportConfig};

pub type Result<T> = std::result::Result<T, Error>;
