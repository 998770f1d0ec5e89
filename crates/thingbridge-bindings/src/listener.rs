//! Channel listeners: the per-property value cache.
//!
//! A listener receives raw payloads from a binding (pushed by a driver or
//! returned by a poll), turns them into [`ValueRecord`]s, keeps the last good
//! value, forwards every record to its consumer and publishes accepted values
//! on the event bus.
//!
//! ```text
//! Uninitialized --success--> HasValue --success--> HasValue
//!       |                       |
//!       +-------- close --------+----> Closed
//! ```
//!
//! Failed updates never touch the cache. After `close` updates are still
//! computed and returned, but nothing is cached, delivered or published.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thingbridge_core::{property_topic, EventMetadata, GatewayEvent, SharedEventBus};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::validation::CompiledSchema;

/// Outcome status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    Success,
    Failure,
}

/// Value delivered to consumers and returned by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRecord {
    pub resource_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Milliseconds since the epoch
    pub timestamp: i64,
}

impl ValueRecord {
    pub fn success(resource_name: impl Into<String>, value: Value, timestamp: i64) -> Self {
        Self {
            resource_name: resource_name.into(),
            value: Some(value),
            status: RecordStatus::Success,
            message: None,
            timestamp,
        }
    }

    /// Failure stamped with the current time.
    pub fn failure(resource_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            value: None,
            status: RecordStatus::Failure,
            message: Some(message.into()),
            timestamp: thingbridge_core::now_millis(),
        }
    }

    /// Success without a value, used for acknowledged writes.
    pub fn acknowledged(resource_name: impl Into<String>) -> Self {
        Self {
            resource_name: resource_name.into(),
            value: None,
            status: RecordStatus::Success,
            message: None,
            timestamp: thingbridge_core::now_millis(),
        }
    }

    pub fn with_value(mut self, value: Option<Value>) -> Self {
        self.value = value;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == RecordStatus::Success
    }
}

/// Last accepted value of a property.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub timestamp: i64,
}

/// Listener lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Uninitialized,
    HasValue,
    Closed,
}

/// Receiver of value records.
///
/// Called synchronously from whatever thread produced the update; keep it
/// short and non-blocking.
pub trait RecordConsumer: Send + Sync {
    fn on_update(&self, record: &ValueRecord);
}

/// A consumer plus the identity used to unregister it.
#[derive(Clone)]
pub struct ConsumerHandle {
    id: Uuid,
    inner: Arc<dyn RecordConsumer>,
}

impl ConsumerHandle {
    pub fn new(consumer: impl RecordConsumer + 'static) -> Self {
        Self::from_arc(Arc::new(consumer))
    }

    pub fn from_arc(consumer: Arc<dyn RecordConsumer>) -> Self {
        Self {
            id: Uuid::new_v4(),
            inner: consumer,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn deliver(&self, record: &ValueRecord) {
        self.inner.on_update(record);
    }
}

impl PartialEq for ConsumerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConsumerHandle {}

impl fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerHandle").field("id", &self.id).finish()
    }
}

/// Consumer forwarding records into an unbounded tokio channel.
pub struct ChannelConsumer {
    tx: mpsc::UnboundedSender<ValueRecord>,
}

impl ChannelConsumer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ValueRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RecordConsumer for ChannelConsumer {
    fn on_update(&self, record: &ValueRecord) {
        // Receiver gone means nobody is interested any more.
        let _ = self.tx.send(record.clone());
    }
}

/// Consumer backed by a closure.
pub struct FnConsumer<F>(F);

impl<F> FnConsumer<F>
where
    F: Fn(&ValueRecord) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> RecordConsumer for FnConsumer<F>
where
    F: Fn(&ValueRecord) + Send + Sync,
{
    fn on_update(&self, record: &ValueRecord) {
        (self.0)(record)
    }
}

struct ListenerInner {
    state: ListenerState,
    cached: Option<CachedValue>,
    consumer: Option<ConsumerHandle>,
}

/// Value cache and delivery point for one property endpoint.
pub struct ChannelListener {
    device_name: String,
    property_name: String,
    endpoint: String,
    schema: Arc<CompiledSchema>,
    event_bus: SharedEventBus,
    inner: RwLock<ListenerInner>,
}

impl ChannelListener {
    pub fn new(
        device_name: impl Into<String>,
        endpoint: impl Into<String>,
        schema: Arc<CompiledSchema>,
        consumer: Option<ConsumerHandle>,
        event_bus: SharedEventBus,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            property_name: schema.resource().to_string(),
            endpoint: endpoint.into(),
            schema,
            event_bus,
            inner: RwLock::new(ListenerInner {
                state: ListenerState::Uninitialized,
                cached: None,
                consumer,
            }),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn property_name(&self) -> &str {
        &self.property_name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ListenerState {
        self.inner.read().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ListenerState::Closed
    }

    pub fn cached(&self) -> Option<CachedValue> {
        self.inner.read().cached.clone()
    }

    /// Id of the attached consumer; `None` once closed.
    pub fn consumer_id(&self) -> Option<Uuid> {
        self.inner.read().consumer.as_ref().map(ConsumerHandle::id)
    }

    /// Feed a raw payload into the listener.
    ///
    /// Never fails: a malformed payload yields a failure record, which is
    /// delivered to the consumer like any other.
    pub fn update(&self, payload: &Value) -> ValueRecord {
        let parsed = match payload {
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(v) => v,
                Err(e) => {
                    let record = ValueRecord::failure(
                        &self.property_name,
                        format!("{}: payload is not valid JSON: {}", self.property_name, e),
                    );
                    self.deliver(&record);
                    return record;
                }
            },
            other => other.clone(),
        };

        match self.schema.extract(&parsed) {
            Ok((value, timestamp)) => {
                let record = ValueRecord::success(&self.property_name, value.clone(), timestamp);

                let consumer = {
                    let mut inner = self.inner.write();
                    if inner.state == ListenerState::Closed {
                        return record;
                    }
                    inner.cached = Some(CachedValue { value, timestamp });
                    inner.state = ListenerState::HasValue;
                    inner.consumer.clone()
                };

                if let Some(consumer) = consumer {
                    consumer.deliver(&record);
                }
                self.publish(normalise(parsed, &self.property_name, &record));
                record
            }
            Err(e) => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    error = %e,
                    "Rejected property payload"
                );
                let record = ValueRecord::failure(&self.property_name, e.to_string());
                self.deliver(&record);
                record
            }
        }
    }

    /// Detach the consumer. Terminal.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        inner.state = ListenerState::Closed;
        inner.consumer = None;
    }

    fn deliver(&self, record: &ValueRecord) {
        let consumer = self.inner.read().consumer.clone();
        if let Some(consumer) = consumer {
            consumer.deliver(record);
        }
    }

    fn publish(&self, value: Value) {
        let topic = property_topic(&self.device_name, &self.property_name);
        let event = GatewayEvent::PropertyChanged {
            value,
            device_name: self.device_name.clone(),
            property_name: self.property_name.clone(),
        };
        self.event_bus.publish_with_metadata(
            topic,
            event,
            EventMetadata::new(self.endpoint.clone()),
        );
    }
}

impl fmt::Debug for ChannelListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelListener")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

/// Payload object with the value field replaced by its converted form. The
/// timestamp field is left as received.
fn normalise(mut payload: Value, property_name: &str, record: &ValueRecord) -> Value {
    if let (Value::Object(map), Some(value)) = (&mut payload, &record.value) {
        map.insert(property_name.to_string(), value.clone());
    }
    payload
}
