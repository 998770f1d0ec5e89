//! Event bus for the ThingBridge gateway.
//!
//! Listeners publish property updates here and any number of subscribers
//! (rule engines, northbound connectors, loggers) receive them. Every message
//! is addressed by a topic string such as `things/t1/properties/temperature`.

use crate::event::{EventMetadata, GatewayEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// A single message on the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Topic the event was published on
    pub topic: String,
    /// The event itself
    pub event: GatewayEvent,
    /// Publication metadata
    pub metadata: EventMetadata,
}

/// Event bus for ThingBridge.
///
/// The event bus uses a broadcast channel to distribute messages to all
/// subscribers. Publishing never blocks, so it is safe to call from driver
/// callback threads as well as from async tasks.
#[derive(Clone)]
pub struct EventBus {
    /// Broadcast channel sender
    tx: broadcast::Sender<BusMessage>,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity determines how many messages are buffered for slow subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Publish an event on a topic with default metadata.
    ///
    /// Returns `true` if there was at least one subscriber. Without
    /// subscribers the message is discarded.
    pub fn publish(&self, topic: impl Into<String>, event: GatewayEvent) -> bool {
        self.publish_with_source(topic, event, "system")
    }

    /// Publish an event with a custom source.
    pub fn publish_with_source(
        &self,
        topic: impl Into<String>,
        event: GatewayEvent,
        source: impl Into<String>,
    ) -> bool {
        self.publish_with_metadata(topic, event, EventMetadata::new(source))
    }

    /// Publish an event with custom metadata.
    pub fn publish_with_metadata(
        &self,
        topic: impl Into<String>,
        event: GatewayEvent,
        metadata: EventMetadata,
    ) -> bool {
        self.tx
            .send(BusMessage {
                topic: topic.into(),
                event,
                metadata,
            })
            .is_ok()
    }

    /// Subscribe to all messages.
    ///
    /// If the subscriber falls behind, older messages may be dropped.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// Create a filtered subscription helper for common patterns.
    pub fn filter(&self) -> FilterBuilder {
        FilterBuilder {
            tx: self.tx.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all messages from the event bus.
pub struct EventBusReceiver {
    rx: broadcast::Receiver<BusMessage>,
}

impl EventBusReceiver {
    /// Receive the next message.
    ///
    /// Returns `None` once the event bus is closed. Lagged messages are skipped.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Receiver for filtered messages from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&BusMessage) -> bool + Send,
{
    rx: broadcast::Receiver<BusMessage>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&BusMessage) -> bool + Send,
{
    fn new(rx: broadcast::Receiver<BusMessage>, filter: F) -> Self {
        Self { rx, filter }
    }

    /// Receive the next message matching the filter.
    ///
    /// Returns `None` if the event bus is closed.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => {
                    if (self.filter)(&message) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive a matching message without blocking.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => {
                    if (self.filter)(&message) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Builder for creating filtered subscriptions.
pub struct FilterBuilder {
    tx: broadcast::Sender<BusMessage>,
}

pub type MessageFilter = fn(&BusMessage) -> bool;

fn is_property_message(message: &BusMessage) -> bool {
    message.event.is_property_event()
}

fn is_lifecycle_message(message: &BusMessage) -> bool {
    message.event.is_lifecycle_event()
}

fn is_action_message(message: &BusMessage) -> bool {
    message.event.is_action_event()
}

impl FilterBuilder {
    /// Subscribe to property value events only.
    pub fn property_events(&self) -> FilteredReceiver<MessageFilter> {
        FilteredReceiver::new(self.tx.subscribe(), is_property_message)
    }

    /// Subscribe to registration lifecycle events only.
    pub fn lifecycle_events(&self) -> FilteredReceiver<MessageFilter> {
        FilteredReceiver::new(self.tx.subscribe(), is_lifecycle_message)
    }

    /// Subscribe to action results only.
    pub fn action_events(&self) -> FilteredReceiver<MessageFilter> {
        FilteredReceiver::new(self.tx.subscribe(), is_action_message)
    }

    /// Subscribe to a single topic.
    pub fn topic(
        &self,
        topic: impl Into<String>,
    ) -> FilteredReceiver<impl Fn(&BusMessage) -> bool + Send + 'static> {
        let topic = topic.into();
        FilteredReceiver::new(self.tx.subscribe(), move |m: &BusMessage| m.topic == topic)
    }

    /// Subscribe to every topic starting with `prefix`.
    pub fn topic_prefix(
        &self,
        prefix: impl Into<String>,
    ) -> FilteredReceiver<impl Fn(&BusMessage) -> bool + Send + 'static> {
        let prefix = prefix.into();
        FilteredReceiver::new(self.tx.subscribe(), move |m: &BusMessage| {
            m.topic.starts_with(&prefix)
        })
    }

    /// Subscribe to events about one device.
    pub fn device(
        &self,
        device_name: impl Into<String>,
    ) -> FilteredReceiver<impl Fn(&BusMessage) -> bool + Send + 'static> {
        let device_name = device_name.into();
        FilteredReceiver::new(self.tx.subscribe(), move |m: &BusMessage| {
            m.event.device_name() == device_name
        })
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;
