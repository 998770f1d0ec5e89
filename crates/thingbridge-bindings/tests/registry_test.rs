//! Binding Registry Tests
//!
//! Tests registry behavior including:
//! - Exact config instance lookup
//! - Consumer-based unregistration
//! - Atomic registration on factory failure
//! - Unregistration racing unrelated registrations
//

use std::sync::Arc;

use thingbridge_bindings::{
    BindingCatalog, BindingError, BindingRegistry, ConsumerHandle, DataType, FnConsumer,
    MockBinding, ResourceDescriptor, ResourceRegistration,
};
use thingbridge_core::EventBus;

const TEMP_URI: &str = "things/t1/properties/temperature";
const HUMIDITY_URI: &str = "things/t1/properties/humidity";
const SET_URI: &str = "things/t1/actions/setTemperature";

fn setup() -> (Arc<BindingRegistry>, Arc<MockBinding>, Arc<EventBus>) {
    let mock = Arc::new(MockBinding::new("mock"));
    let catalog = Arc::new(BindingCatalog::new());
    catalog.register(mock.clone());
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(BindingRegistry::new(catalog, bus.clone()));
    registry.start();
    (registry, mock, bus)
}

fn property(name: &str, uri: &str) -> ResourceDescriptor {
    ResourceDescriptor::property(name, DataType::Number).with_endpoint(uri)
}

fn set_temperature() -> ResourceDescriptor {
    ResourceDescriptor::action("setTemperature")
        .with_field("temperature", DataType::Number, true)
        .with_endpoint(SET_URI)
}

fn noop_consumer() -> ConsumerHandle {
    ConsumerHandle::new(FnConsumer::new(|_| {}))
}

#[tokio::test]
async fn test_lookup_returns_same_config_instance() {
    let (registry, _, _) = setup();
    registry
        .register(ResourceRegistration::new("t1", "mock").with_property(
            property("temperature", TEMP_URI),
            TEMP_URI,
            "sensor-a",
        ))
        .unwrap();

    let first = registry.lookup_binding_config(TEMP_URI).unwrap();
    let second = registry.lookup_binding_config(TEMP_URI).unwrap();
    let entry = registry.lookup_entry(TEMP_URI).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &entry.config));
    assert_eq!(first.raw(), "sensor-a");
}

#[tokio::test]
async fn test_lookup_unknown_endpoint() {
    let (registry, _, _) = setup();
    assert!(matches!(
        registry.lookup_binding_config("things/x/properties/y"),
        Err(BindingError::Lookup(_))
    ));
    assert!(matches!(
        registry.lookup_listener("things/x/properties/y"),
        Err(BindingError::Lookup(_))
    ));
}

#[tokio::test]
async fn test_unregister_is_idempotent() {
    let (registry, _, _) = setup();
    let consumer = noop_consumer();
    registry
        .register(
            ResourceRegistration::new("t1", "mock")
                .with_property(property("temperature", TEMP_URI), TEMP_URI, "a")
                .with_action(set_temperature(), SET_URI, "b")
                .with_consumer(consumer.clone()),
        )
        .unwrap();
    let listener = registry.lookup_listener(TEMP_URI).unwrap();

    assert_eq!(registry.unregister(&consumer), 2);
    assert!(listener.is_closed());
    assert!(registry.is_empty());

    assert_eq!(registry.unregister(&consumer), 0);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_unregister_unknown_consumer_is_noop() {
    let (registry, _, _) = setup();
    registry
        .register(
            ResourceRegistration::new("t1", "mock")
                .with_property(property("temperature", TEMP_URI), TEMP_URI, "a")
                .with_consumer(noop_consumer()),
        )
        .unwrap();

    assert_eq!(registry.unregister(&noop_consumer()), 0);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_unregister_leaves_other_consumers() {
    let (registry, mock, _) = setup();
    let first = noop_consumer();
    let second = noop_consumer();
    registry
        .register(
            ResourceRegistration::new("t1", "mock")
                .with_property(property("temperature", TEMP_URI), TEMP_URI, "a")
                .with_consumer(first.clone()),
        )
        .unwrap();
    registry
        .register(
            ResourceRegistration::new("t1", "mock")
                .with_property(property("humidity", HUMIDITY_URI), HUMIDITY_URI, "b")
                .with_consumer(second.clone()),
        )
        .unwrap();

    assert_eq!(registry.unregister(&first), 1);
    assert_eq!(registry.endpoints(), vec![HUMIDITY_URI.to_string()]);
    assert!(!registry.lookup_listener(HUMIDITY_URI).unwrap().is_closed());
    assert_eq!(mock.attached_count(), 1);
}

#[tokio::test]
async fn test_no_partial_registration_on_factory_failure() {
    let (registry, mock, _) = setup();
    mock.reject_config("broken-actuator", "unreachable host");

    let err = registry
        .register(
            ResourceRegistration::new("t1", "mock")
                .with_property(property("temperature", TEMP_URI), TEMP_URI, "sensor")
                .with_action(set_temperature(), SET_URI, "broken-actuator"),
        )
        .unwrap_err();

    assert!(matches!(err, BindingError::Configuration(ref m) if m.contains("unreachable")));
    assert!(registry.is_empty());
    assert_eq!(mock.attached_count(), 0);
}

#[tokio::test]
async fn test_action_only_registration() {
    let (registry, mock, _) = setup();
    let endpoints = registry
        .register(ResourceRegistration::new("t1", "mock").with_action(
            set_temperature(),
            SET_URI,
            "actuator",
        ))
        .unwrap();

    assert_eq!(endpoints, vec![SET_URI.to_string()]);
    assert!(registry.lookup_entry(SET_URI).unwrap().is_action());
    assert!(registry.lookup_binding_config(SET_URI).is_ok());
    assert!(registry.lookup_listener(SET_URI).is_err());
    assert!(registry.property_endpoints().is_empty());
    assert_eq!(mock.attached_count(), 0);
}

#[tokio::test]
async fn test_lifecycle_events_published() {
    let (registry, _, bus) = setup();
    let mut rx = bus.filter().lifecycle_events();
    registry
        .register(ResourceRegistration::new("t1", "mock").with_property(
            property("temperature", TEMP_URI),
            TEMP_URI,
            "a",
        ))
        .unwrap();
    registry.unregister_endpoint(TEMP_URI);

    let registered = rx.try_recv().unwrap();
    assert_eq!(registered.topic, "things/t1/lifecycle");
    assert_eq!(registered.event.type_name(), "ResourceRegistered");
    assert_eq!(rx.try_recv().unwrap().event.type_name(), "ResourceUnregistered");
}

#[tokio::test]
async fn test_restart_clears_entries() {
    let (registry, _, _) = setup();
    registry
        .register(ResourceRegistration::new("t1", "mock").with_property(
            property("temperature", TEMP_URI),
            TEMP_URI,
            "a",
        ))
        .unwrap();

    registry.stop();
    assert!(matches!(
        registry.register(ResourceRegistration::new("t1", "mock").with_property(
            property("temperature", TEMP_URI),
            TEMP_URI,
            "a",
        )),
        Err(BindingError::Inactive)
    ));

    registry.start();
    assert!(registry.is_active());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_concurrent_registration() {
    let (registry, _, _) = setup();
    let mut handles = Vec::new();
    for i in 0..16 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let uri = format!("things/d{}/properties/temperature", i);
            registry
                .register(
                    ResourceRegistration::new(format!("d{}", i), "mock")
                        .with_property(property("temperature", &uri), &uri, "s"),
                )
                .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(registry.len(), 16);
}

#[test]
fn test_unregister_while_other_devices_register() {
    let (registry, mock, _) = setup();
    let owner = noop_consumer();
    for i in 0..200 {
        let uri = format!("things/v{}/properties/temperature", i);
        registry
            .register(
                ResourceRegistration::new(format!("v{}", i), "mock")
                    .with_property(property("temperature", &uri), &uri, format!("v{}", i))
                    .with_consumer(owner.clone()),
            )
            .unwrap();
    }

    let other = noop_consumer();
    let removed = std::thread::scope(|scope| {
        let registering = scope.spawn(|| {
            for i in 0..500 {
                let uri = format!("things/f{}/properties/temperature", i);
                registry
                    .register(
                        ResourceRegistration::new(format!("f{}", i), "mock")
                            .with_property(property("temperature", &uri), &uri, format!("f{}", i))
                            .with_consumer(other.clone()),
                    )
                    .unwrap();
            }
        });
        let removed = registry.unregister(&owner);
        registering.join().unwrap();
        removed
    });

    assert_eq!(removed, 200);
    assert_eq!(registry.len(), 500);
    assert_eq!(mock.attached_count(), 500);
    for i in 0..200 {
        let uri = format!("things/v{}/properties/temperature", i);
        assert!(matches!(
            registry.lookup_listener(&uri),
            Err(BindingError::Lookup(_))
        ));
    }
    for i in 0..500 {
        let uri = format!("things/f{}/properties/temperature", i);
        let listener = registry.lookup_listener(&uri).unwrap();
        assert_eq!(listener.consumer_id(), Some(other.id()));
    }
}
