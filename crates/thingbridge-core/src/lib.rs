//! Core types for ThingBridge.
//!
//! This crate holds what every other crate shares: the unified error type,
//! gateway events and the topic-addressed event bus, configuration defaults and
//! the gateway file model, and logging setup.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod logging;

pub use config::{EndpointConfig, GatewayConfig, GatewaySettings, ResourceConfig};
pub use error::{Error, Result};
pub use event::{action_topic, lifecycle_topic, property_topic, EventMetadata, GatewayEvent};
pub use eventbus::{
    BusMessage, EventBus, EventBusReceiver, FilterBuilder, FilteredReceiver, SharedEventBus,
    DEFAULT_CHANNEL_CAPACITY,
};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
