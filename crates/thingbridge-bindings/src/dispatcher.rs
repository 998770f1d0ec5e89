//! Batch read/write dispatcher.
//!
//! Requests are routed to the binding registered for their endpoint. Every
//! request yields exactly one [`RequestOutcome`], in request order; errors
//! become failure records and never abort the rest of a batch.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thingbridge_core::{action_topic, EventMetadata, GatewayEvent};

use crate::error::BindingError;
use crate::listener::ValueRecord;
use crate::registry::{BindingRegistry, RegistryEntry};

/// Read of one property endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    pub endpoint: String,
}

impl ReadRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

/// Write of a JSON payload to one action endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub endpoint: String,
    /// Object payload, or a string holding one
    pub payload: Value,
}

impl WriteRequest {
    pub fn new(endpoint: impl Into<String>, payload: Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            payload,
        }
    }
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub endpoint: String,
    pub record: ValueRecord,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        self.record.is_success()
    }
}

/// Routes batches of reads and writes through the registry.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<BindingRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<BindingRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<BindingRegistry> {
        &self.registry
    }

    /// Read a batch of property endpoints concurrently.
    pub async fn read_batch(&self, requests: &[ReadRequest]) -> Vec<RequestOutcome> {
        join_all(requests.iter().map(|r| self.read_one(&r.endpoint))).await
    }

    pub async fn read_one(&self, endpoint: &str) -> RequestOutcome {
        let record = self.read_endpoint(endpoint).await;
        trace_outcome("read", endpoint, &record);
        RequestOutcome {
            endpoint: endpoint.to_string(),
            record,
        }
    }

    /// Write a batch of action payloads, one after the other.
    ///
    /// A failed write does not undo the writes before it.
    pub async fn write_batch(&self, requests: &[WriteRequest]) -> Vec<RequestOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.write_one(&request.endpoint, &request.payload).await);
        }
        outcomes
    }

    pub async fn write_one(&self, endpoint: &str, payload: &Value) -> RequestOutcome {
        let record = match self.registry.lookup_entry(endpoint) {
            Ok(entry) => {
                let record = self.write_entry(&entry, payload).await;
                self.announce_write(&entry, &record);
                record
            }
            Err(e) => ValueRecord::failure(endpoint, e.to_string()),
        };
        trace_outcome("write", endpoint, &record);
        RequestOutcome {
            endpoint: endpoint.to_string(),
            record,
        }
    }

    async fn read_endpoint(&self, endpoint: &str) -> ValueRecord {
        let entry = match self.registry.lookup_entry(endpoint) {
            Ok(entry) => entry,
            Err(e) => return ValueRecord::failure(endpoint, e.to_string()),
        };
        let name = entry.descriptor.name.as_str();
        let Some(listener) = entry.listener.as_ref() else {
            return ValueRecord::failure(
                name,
                BindingError::lookup(format!("{} is not a property endpoint", endpoint))
                    .to_string(),
            );
        };

        match entry.binding.read(entry.config.as_ref()).await {
            Ok(Some(payload)) => listener.update(&payload),
            Ok(None) => match listener.cached() {
                Some(cached) => ValueRecord::success(name, cached.value, cached.timestamp),
                None => ValueRecord::failure(name, "no value available"),
            },
            // Keep serving the last good value alongside the failure.
            Err(e) => ValueRecord::failure(name, e.to_string())
                .with_value(listener.cached().map(|c| c.value)),
        }
    }

    async fn write_entry(&self, entry: &RegistryEntry, payload: &Value) -> ValueRecord {
        let name = entry.descriptor.name.as_str();
        if !entry.is_action() {
            return ValueRecord::failure(
                name,
                BindingError::validation(format!("{} is not an action endpoint", entry.endpoint))
                    .to_string(),
            );
        }

        let parsed;
        let payload = match payload {
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(v) => {
                    parsed = v;
                    &parsed
                }
                Err(e) => {
                    return ValueRecord::failure(
                        name,
                        BindingError::validation(format!("payload is not valid JSON: {}", e))
                            .to_string(),
                    )
                }
            },
            other => other,
        };

        if let Err(e) = entry.schema.validate(payload) {
            return ValueRecord::failure(name, e.to_string());
        }

        match entry
            .binding
            .write(entry.config.as_ref(), &entry.descriptor, payload)
            .await
        {
            Ok(()) => ValueRecord::acknowledged(name),
            Err(e) => ValueRecord::failure(name, e.to_string()),
        }
    }

    fn announce_write(&self, entry: &RegistryEntry, record: &ValueRecord) {
        if !entry.is_action() {
            return;
        }
        self.registry.event_bus().publish_with_metadata(
            action_topic(&entry.device_name, &entry.descriptor.name),
            GatewayEvent::ActionInvoked {
                device_name: entry.device_name.clone(),
                action_name: entry.descriptor.name.clone(),
                success: record.is_success(),
                message: record.message.clone(),
                timestamp: record.timestamp,
            },
            EventMetadata::new("dispatcher"),
        );
    }
}

fn trace_outcome(operation: &str, endpoint: &str, record: &ValueRecord) {
    if record.is_success() {
        tracing::debug!(operation, endpoint, timestamp = record.timestamp, "Dispatch succeeded");
    } else {
        tracing::warn!(
            operation,
            endpoint,
            reason = record.message.as_deref().unwrap_or_default(),
            "Dispatch failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{BindingCatalog, MockBinding};
    use crate::descriptor::{DataType, ResourceDescriptor};
    use crate::listener::RecordStatus;
    use crate::registry::ResourceRegistration;
    use serde_json::json;
    use thingbridge_core::EventBus;

    const TEMP_URI: &str = "things/t1/properties/temperature";
    const SET_URI: &str = "things/t1/actions/setTemperature";

    /// Field names of every event seen while installed.
    #[derive(Clone, Default)]
    struct EventFields(Arc<parking_lot::Mutex<Vec<Vec<&'static str>>>>);

    struct FieldNames<'a>(&'a mut Vec<&'static str>);

    impl tracing::field::Visit for FieldNames<'_> {
        fn record_debug(&mut self, field: &tracing::field::Field, _value: &dyn std::fmt::Debug) {
            self.0.push(field.name());
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventFields {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut names = Vec::new();
            event.record(&mut FieldNames(&mut names));
            self.0.lock().push(names);
        }
    }

    fn setup() -> (Dispatcher, Arc<MockBinding>) {
        let mock = Arc::new(MockBinding::new("mock"));
        let catalog = Arc::new(BindingCatalog::new());
        catalog.register(mock.clone());
        let registry = Arc::new(BindingRegistry::new(catalog, Arc::new(EventBus::new())));
        registry.start();
        registry
            .register(
                ResourceRegistration::new("t1", "mock")
                    .with_property(
                        ResourceDescriptor::property("temperature", DataType::Number)
                            .with_endpoint(TEMP_URI),
                        TEMP_URI,
                        "sensor",
                    )
                    .with_action(
                        ResourceDescriptor::action("setTemperature")
                            .with_field("temperature", DataType::Number, true)
                            .with_endpoint(SET_URI),
                        SET_URI,
                        "actuator",
                    ),
            )
            .unwrap();
        (Dispatcher::new(registry), mock)
    }

    #[tokio::test]
    async fn test_read_without_value() {
        let (dispatcher, _) = setup();
        let outcome = dispatcher.read_one(TEMP_URI).await;
        assert_eq!(outcome.record.status, RecordStatus::Failure);
        assert_eq!(outcome.record.message.as_deref(), Some("no value available"));
    }

    #[tokio::test]
    async fn test_read_error_attaches_cached_value() {
        let (dispatcher, mock) = setup();
        mock.queue_read("sensor", Ok(Some(json!({"time": 1000, "temperature": 21.5}))));
        mock.queue_read("sensor", Err(BindingError::technology("timeout")));

        assert!(dispatcher.read_one(TEMP_URI).await.is_success());
        let outcome = dispatcher.read_one(TEMP_URI).await;
        assert_eq!(outcome.record.status, RecordStatus::Failure);
        assert_eq!(outcome.record.value, Some(json!(21.5)));
        assert!(outcome.record.message.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_read_of_action_endpoint_fails() {
        let (dispatcher, mock) = setup();
        let outcome = dispatcher.read_one(SET_URI).await;
        assert!(!outcome.is_success());
        assert_eq!(mock.read_count(), 0);
    }

    #[tokio::test]
    async fn test_write_string_payload() {
        let (dispatcher, mock) = setup();
        let outcome = dispatcher
            .write_one(SET_URI, &json!(r#"{"temperature": 20}"#))
            .await;
        assert!(outcome.is_success());
        assert_eq!(mock.writes(), vec![("actuator".to_string(), json!({"temperature": 20}))]);
    }

    #[tokio::test]
    async fn test_write_to_property_rejected() {
        let (dispatcher, mock) = setup();
        let outcome = dispatcher
            .write_one(TEMP_URI, &json!({"time": 1, "temperature": 20}))
            .await;
        assert!(!outcome.is_success());
        assert_eq!(mock.write_count(), 0);
    }

    #[tokio::test]
    async fn test_write_publishes_action_event() {
        let (dispatcher, _) = setup();
        let mut rx = dispatcher.registry().event_bus().filter().action_events();
        dispatcher
            .write_one(SET_URI, &json!({"temperature": 20}))
            .await;

        let message = rx.try_recv().unwrap();
        assert_eq!(message.topic, "things/t1/actions/setTemperature");
        assert!(matches!(
            message.event,
            GatewayEvent::ActionInvoked { success: true, .. }
        ));
    }

    #[test]
    fn test_failed_dispatch_logs_reason_once() {
        use tracing_subscriber::layer::SubscriberExt;

        let fields = EventFields::default();
        let subscriber = tracing_subscriber::registry().with(fields.clone());
        let record = ValueRecord::failure("temperature", "timeout");
        tracing::subscriber::with_default(subscriber, || {
            trace_outcome("read", TEMP_URI, &record)
        });

        let events = fields.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].iter().filter(|n| **n == "message").count(), 1);
        assert!(events[0].contains(&"reason"));
    }
}
