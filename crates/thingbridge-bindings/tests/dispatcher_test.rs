//! Dispatcher Tests
//!
//! Tests batch dispatch including:
//! - Per-request isolation of failures
//! - Validation before any write reaches a binding
//! - Fallback to cached values
//! - Concurrent listener updates against reads
//

use std::sync::Arc;

use serde_json::json;
use thingbridge_bindings::{
    BindingCatalog, BindingError, BindingRegistry, ChannelConsumer, ConsumerHandle, DataType,
    Dispatcher, MockBinding, ReadRequest, RecordStatus, ResourceDescriptor, ResourceRegistration,
    WriteRequest,
};
use thingbridge_core::EventBus;

const TEMP_URI: &str = "things/t1/properties/temperature";
const HUMIDITY_URI: &str = "things/t1/properties/humidity";
const SET_URI: &str = "things/t1/actions/setTemperature";

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
                    "temp",
                )
                .with_action(
                    ResourceDescriptor::action("setTemperature")
                        .with_field("temperature", DataType::Number, true)
                        .with_range("temperature", Some(5.0), Some(30.0))
                        .with_endpoint(SET_URI),
                    SET_URI,
                    "set",
                ),
        )
        .unwrap();
    registry
        .register(ResourceRegistration::new("t1", "mock").with_property(
            ResourceDescriptor::property("humidity", DataType::Integer).with_endpoint(HUMIDITY_URI),
            HUMIDITY_URI,
            "humidity",
        ))
        .unwrap();

    (Dispatcher::new(registry), mock)
}

#[tokio::test]
async fn test_batch_isolation() {
    let (dispatcher, mock) = setup();
    mock.set_read("temp", Err(BindingError::technology("device offline")));
    mock.set_read("humidity", Ok(Some(json!({"time": 2000, "humidity": 40}))));

    let outcomes = dispatcher
        .read_batch(&[
            ReadRequest::new(TEMP_URI),
            ReadRequest::new("things/t9/properties/missing"),
            ReadRequest::new(HUMIDITY_URI),
        ])
        .await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0].endpoint, TEMP_URI);
    assert_eq!(outcomes[0].record.status, RecordStatus::Failure);
    assert!(outcomes[0]
        .record
        .message
        .as_deref()
        .unwrap()
        .contains("device offline"));

    assert_eq!(outcomes[1].record.status, RecordStatus::Failure);
    assert!(outcomes[1].record.message.as_deref().unwrap().contains("Lookup"));

    assert_eq!(outcomes[2].endpoint, HUMIDITY_URI);
    assert!(outcomes[2].is_success());
    assert_eq!(outcomes[2].record.value, Some(json!(40)));
    assert_eq!(outcomes[2].record.timestamp, 2000);
}

#[tokio::test]
async fn test_failure_timestamp_is_now() {
    let (dispatcher, mock) = setup();
    mock.set_read("temp", Err(BindingError::technology("device offline")));

    let before = thingbridge_core::now_millis();
    let outcome = dispatcher.read_one(TEMP_URI).await;
    let after = thingbridge_core::now_millis();

    assert!(outcome.record.timestamp >= before && outcome.record.timestamp <= after);
    assert_eq!(outcome.record.value, None);
}

#[tokio::test]
async fn test_write_validation_before_io() {
    let (dispatcher, mock) = setup();

    let outcomes = dispatcher
        .write_batch(&[
            WriteRequest::new(SET_URI, json!({"mode": "eco"})),
            WriteRequest::new(SET_URI, json!({"temperature": "hot"})),
            WriteRequest::new(SET_URI, json!({"temperature": 99})),
            WriteRequest::new(SET_URI, json!("not json at all")),
        ])
        .await;

    assert!(outcomes.iter().all(|o| !o.is_success()));
    assert!(outcomes[0].record.message.as_deref().unwrap().contains("missing"));
    assert_eq!(mock.write_count(), 0);
}

#[tokio::test]
async fn test_write_batch_no_rollback() {
    let (dispatcher, mock) = setup();

    let outcomes = dispatcher
        .write_batch(&[
            WriteRequest::new(SET_URI, json!({"temperature": 21})),
            WriteRequest::new(SET_URI, json!({})),
            WriteRequest::new(SET_URI, json!({"temperature": 22.5})),
        ])
        .await;

    let statuses: Vec<bool> = outcomes.iter().map(|o| o.is_success()).collect();
    assert_eq!(statuses, vec![true, false, true]);
    assert_eq!(mock.write_count(), 2);
    assert_eq!(mock.writes()[1].1, json!({"temperature": 22.5}));
}

#[tokio::test]
async fn test_write_technology_failure() {
    let (dispatcher, mock) = setup();
    mock.fail_writes("actuator jammed");

    let outcome = dispatcher
        .write_one(SET_URI, &json!({"temperature": 21}))
        .await;
    assert_eq!(outcome.record.status, RecordStatus::Failure);
    assert!(outcome.record.message.unwrap().contains("actuator jammed"));
}

#[tokio::test]
async fn test_fallback_read_uses_cache() {
    let (dispatcher, mock) = setup();
    let (consumer, mut rx) = ChannelConsumer::new();
    dispatcher
        .registry()
        .register(
            ResourceRegistration::new("t1", "mock")
                .with_property(
                    ResourceDescriptor::property("temperature", DataType::Number)
                        .with_endpoint(TEMP_URI),
                    TEMP_URI,
                    "temp",
                )
                .with_consumer(ConsumerHandle::new(consumer)),
        )
        .unwrap();

    // Driver push, then a poll that has nothing new.
    assert_eq!(mock.push("temp", &json!({"time": 1000, "temperature": 21.5})), 1);
    let outcome = dispatcher.read_one(TEMP_URI).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.record.value, Some(json!(21.5)));
    assert_eq!(outcome.record.timestamp, 1000);

    let delivered = rx.recv().await.unwrap();
    assert_eq!(delivered.value, Some(json!(21.5)));
    assert_eq!(delivered.timestamp, 1000);
}

#[tokio::test]
async fn test_read_rejects_bad_payload_but_keeps_cache() {
    let (dispatcher, mock) = setup();
    mock.queue_read("temp", Ok(Some(json!({"time": 1000, "temperature": 21.5}))));
    mock.queue_read("temp", Ok(Some(json!({"temperature": 19.0}))));

    assert!(dispatcher.read_one(TEMP_URI).await.is_success());
    let outcome = dispatcher.read_one(TEMP_URI).await;
    assert_eq!(outcome.record.status, RecordStatus::Failure);

    let cached = dispatcher
        .registry()
        .lookup_listener(TEMP_URI)
        .unwrap()
        .cached()
        .unwrap();
    assert_eq!(cached.value, json!(21.5));
    assert_eq!(cached.timestamp, 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_updates_race_reads_without_tearing() {
    let (dispatcher, _) = setup();
    let listener = dispatcher.registry().lookup_listener(TEMP_URI).unwrap();
    listener.update(&json!({"time": 0, "temperature": 0}));

    // Writer w sends (time, temperature) pairs w*1000+1 ..= w*1000+250.
    let writers: Vec<_> = (1..=4i64)
        .map(|w| {
            let listener = listener.clone();
            tokio::task::spawn_blocking(move || {
                for i in 1..=250 {
                    let stamp = w * 1000 + i;
                    listener.update(&json!({"time": stamp, "temperature": stamp}));
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    let outcome = dispatcher.read_one(TEMP_URI).await;
                    assert_eq!(outcome.record.status, RecordStatus::Success);
                    let value = outcome.record.value.and_then(|v| v.as_f64()).unwrap();
                    assert_eq!(value, outcome.record.timestamp as f64);
                }
            })
        })
        .collect();

    for handle in writers {
        handle.await.unwrap();
    }
    for handle in readers {
        handle.await.unwrap();
    }

    let cached = listener.cached().unwrap();
    assert_eq!(cached.value.as_f64(), Some(cached.timestamp as f64));
    assert!([1250, 2250, 3250, 4250].contains(&cached.timestamp));
}
