//! Binding registry.
//!
//! One entry per endpoint URI holds everything the dispatcher needs: the
//! binding, its config, the resource descriptor with its compiled schema, and
//! for properties the channel listener. There is no second map to keep in
//! sync.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use thingbridge_core::{lifecycle_topic, EventMetadata, GatewayEvent, ResourceConfig, SharedEventBus};
use uuid::Uuid;

use crate::binding::{Binding, BindingCatalog, BindingConfig};
use crate::descriptor::{ResourceDescriptor, ResourceKind};
use crate::error::{BindingError, BindingResult};
use crate::listener::{ChannelListener, ConsumerHandle};
use crate::validation::CompiledSchema;

/// One endpoint of a registration request.
#[derive(Debug, Clone)]
pub struct EndpointRegistration {
    pub descriptor: ResourceDescriptor,
    pub uri: String,
    /// Technology-specific configuration string
    pub raw_config: String,
}

impl EndpointRegistration {
    pub fn new(
        descriptor: ResourceDescriptor,
        uri: impl Into<String>,
        raw_config: impl Into<String>,
    ) -> Self {
        Self {
            descriptor,
            uri: uri.into(),
            raw_config: raw_config.into(),
        }
    }
}

/// Registration request for one logical resource of a device.
#[derive(Debug, Clone)]
pub struct ResourceRegistration {
    pub device_name: String,
    pub technology: String,
    pub property: Option<EndpointRegistration>,
    pub action: Option<EndpointRegistration>,
    pub consumer: Option<ConsumerHandle>,
}

impl ResourceRegistration {
    pub fn new(device_name: impl Into<String>, technology: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            technology: technology.into(),
            property: None,
            action: None,
            consumer: None,
        }
    }

    pub fn with_property(
        mut self,
        descriptor: ResourceDescriptor,
        uri: impl Into<String>,
        raw_config: impl Into<String>,
    ) -> Self {
        self.property = Some(EndpointRegistration::new(descriptor, uri, raw_config));
        self
    }

    pub fn with_action(
        mut self,
        descriptor: ResourceDescriptor,
        uri: impl Into<String>,
        raw_config: impl Into<String>,
    ) -> Self {
        self.action = Some(EndpointRegistration::new(descriptor, uri, raw_config));
        self
    }

    pub fn with_consumer(mut self, consumer: ConsumerHandle) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Build a request from a `[[resources]]` entry of the gateway file.
    pub fn from_config(
        config: &ResourceConfig,
        consumer: Option<ConsumerHandle>,
    ) -> BindingResult<Self> {
        let mut registration = Self::new(&config.device, &config.technology);
        registration.consumer = consumer;

        if let Some(section) = &config.property {
            let (descriptor, uri) = ResourceDescriptor::from_endpoint_config(
                &config.device,
                ResourceKind::Property,
                section,
            )?;
            registration = registration.with_property(descriptor, uri, &section.config);
        }
        if let Some(section) = &config.action {
            let (descriptor, uri) = ResourceDescriptor::from_endpoint_config(
                &config.device,
                ResourceKind::Action,
                section,
            )?;
            registration = registration.with_action(descriptor, uri, &section.config);
        }
        Ok(registration)
    }
}

/// A registered endpoint.
pub struct RegistryEntry {
    pub endpoint: String,
    pub device_name: String,
    pub technology: String,
    pub binding: Arc<dyn Binding>,
    pub config: Arc<dyn BindingConfig>,
    pub descriptor: Arc<ResourceDescriptor>,
    pub schema: Arc<CompiledSchema>,
    /// Present for property endpoints only
    pub listener: Option<Arc<ChannelListener>>,
    /// Consumer of the registration that created this entry
    pub owner: Option<Uuid>,
}

impl RegistryEntry {
    pub fn kind(&self) -> ResourceKind {
        self.descriptor.kind
    }

    pub fn is_property(&self) -> bool {
        self.kind() == ResourceKind::Property
    }

    pub fn is_action(&self) -> bool {
        self.kind() == ResourceKind::Action
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("endpoint", &self.endpoint)
            .field("device_name", &self.device_name)
            .field("technology", &self.technology)
            .field("kind", &self.kind())
            .field("config", &self.config)
            .finish()
    }
}

/// Endpoint URI to binding map.
pub struct BindingRegistry {
    catalog: Arc<BindingCatalog>,
    event_bus: SharedEventBus,
    entries: DashMap<String, Arc<RegistryEntry>>,
    active: AtomicBool,
}

impl BindingRegistry {
    /// Create an inactive registry; call [`start`](Self::start) before registering.
    pub fn new(catalog: Arc<BindingCatalog>, event_bus: SharedEventBus) -> Self {
        Self {
            catalog,
            event_bus,
            entries: DashMap::new(),
            active: AtomicBool::new(false),
        }
    }

    pub fn catalog(&self) -> &Arc<BindingCatalog> {
        &self.catalog
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.event_bus
    }

    /// Drop stale entries and accept registrations.
    pub fn start(&self) {
        self.drain();
        self.active.store(true, Ordering::SeqCst);
        tracing::info!(
            technologies = ?self.catalog.technologies(),
            "Binding registry started"
        );
    }

    /// Close every listener, detach it from its binding and empty the registry.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        let removed = self.drain();
        tracing::info!(removed, "Binding registry stopped");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Register the endpoints of one resource.
    ///
    /// Every config is created and every descriptor checked before the first
    /// insert, so a failed registration leaves the registry untouched.
    /// Returns the registered endpoint URIs.
    pub fn register(&self, registration: ResourceRegistration) -> BindingResult<Vec<String>> {
        if !self.is_active() {
            return Err(BindingError::Inactive);
        }
        if registration.device_name.trim().is_empty() {
            return Err(BindingError::registration("device name is empty"));
        }
        if registration.property.is_none() && registration.action.is_none() {
            return Err(BindingError::registration(format!(
                "resource of device '{}' has neither a property nor an action endpoint",
                registration.device_name
            )));
        }
        if let (Some(p), Some(a)) = (&registration.property, &registration.action) {
            if p.uri == a.uri {
                return Err(BindingError::registration(format!(
                    "property and action share endpoint {}",
                    p.uri
                )));
            }
        }

        let binding = self.catalog.get(&registration.technology)?;
        let owner = registration.consumer.as_ref().map(ConsumerHandle::id);

        let mut prepared = Vec::with_capacity(2);
        if let Some(endpoint) = &registration.property {
            let entry = self.prepare(
                &registration,
                &binding,
                endpoint,
                ResourceKind::Property,
                owner,
            )?;
            prepared.push(entry);
        }
        if let Some(endpoint) = &registration.action {
            let entry =
                self.prepare(&registration, &binding, endpoint, ResourceKind::Action, owner)?;
            prepared.push(entry);
        }

        if registration.property.is_none() {
            tracing::info!(
                device = %registration.device_name,
                technology = %registration.technology,
                "Action-only resource registered; it cannot report values"
            );
        }

        let mut endpoints = Vec::with_capacity(prepared.len());
        for entry in prepared {
            let entry = Arc::new(entry);
            let previous = self.entries.insert(entry.endpoint.clone(), entry.clone());
            if let Some(listener) = &entry.listener {
                entry.binding.attach(&entry.config, listener.clone());
            }
            if let Some(previous) = previous {
                tracing::debug!(endpoint = %entry.endpoint, "Replacing registered endpoint");
                self.retire(&previous, false);
            }

            tracing::info!(
                endpoint = %entry.endpoint,
                device = %entry.device_name,
                technology = %entry.technology,
                kind = %entry.kind(),
                "Endpoint registered"
            );
            self.publish_lifecycle(
                &entry.device_name,
                GatewayEvent::ResourceRegistered {
                    device_name: entry.device_name.clone(),
                    resource_name: entry.descriptor.name.clone(),
                    endpoint: entry.endpoint.clone(),
                    technology: entry.technology.clone(),
                },
            );
            endpoints.push(entry.endpoint.clone());
        }
        Ok(endpoints)
    }

    fn prepare(
        &self,
        registration: &ResourceRegistration,
        binding: &Arc<dyn Binding>,
        endpoint: &EndpointRegistration,
        kind: ResourceKind,
        owner: Option<Uuid>,
    ) -> BindingResult<RegistryEntry> {
        let descriptor = &endpoint.descriptor;
        if descriptor.kind != kind {
            return Err(BindingError::registration(format!(
                "'{}' is a {} but was registered as a {}",
                descriptor.name, descriptor.kind, kind
            )));
        }
        descriptor.validate()?;
        if !descriptor.has_endpoint(&endpoint.uri) {
            return Err(BindingError::registration(format!(
                "endpoint {} is not listed by {} '{}'",
                endpoint.uri, kind, descriptor.name
            )));
        }

        let config = binding.create_config(&endpoint.raw_config)?;
        let schema = Arc::new(CompiledSchema::compile(descriptor));
        let listener = match kind {
            ResourceKind::Property => Some(Arc::new(ChannelListener::new(
                &registration.device_name,
                &endpoint.uri,
                schema.clone(),
                registration.consumer.clone(),
                self.event_bus.clone(),
            ))),
            ResourceKind::Action => None,
        };

        Ok(RegistryEntry {
            endpoint: endpoint.uri.clone(),
            device_name: registration.device_name.clone(),
            technology: registration.technology.clone(),
            binding: binding.clone(),
            config,
            descriptor: Arc::new(descriptor.clone()),
            schema,
            listener,
            owner,
        })
    }

    /// Remove every entry registered with `consumer`. Returns how many were
    /// removed; unknown consumers remove nothing.
    pub fn unregister(&self, consumer: &ConsumerHandle) -> usize {
        let id = consumer.id();
        let matching: Vec<(String, Arc<RegistryEntry>)> = self
            .entries
            .iter()
            .filter(|e| e.value().owner == Some(id))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut removed = 0;
        for (key, entry) in matching {
            // A concurrent re-registration of the same endpoint stays.
            if let Some((_, entry)) = self
                .entries
                .remove_if(&key, |_, current| Arc::ptr_eq(current, &entry))
            {
                self.retire(&entry, true);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(consumer = %id, removed, "Consumer unregistered");
        }
        removed
    }

    /// Remove a single endpoint. Returns whether it was registered.
    pub fn unregister_endpoint(&self, uri: &str) -> bool {
        match self.entries.remove(uri) {
            Some((_, entry)) => {
                self.retire(&entry, true);
                tracing::info!(endpoint = %uri, "Endpoint unregistered");
                true
            }
            None => false,
        }
    }

    pub fn lookup_entry(&self, uri: &str) -> BindingResult<Arc<RegistryEntry>> {
        self.entries
            .get(uri)
            .map(|e| e.value().clone())
            .ok_or_else(|| BindingError::lookup(format!("no binding registered for {}", uri)))
    }

    /// The exact config instance created at registration.
    pub fn lookup_binding_config(&self, uri: &str) -> BindingResult<Arc<dyn BindingConfig>> {
        self.lookup_entry(uri).map(|e| e.config.clone())
    }

    pub fn lookup_listener(&self, uri: &str) -> BindingResult<Arc<ChannelListener>> {
        self.lookup_entry(uri)?
            .listener
            .clone()
            .ok_or_else(|| BindingError::lookup(format!("{} has no channel listener", uri)))
    }

    /// All registered endpoint URIs, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        uris.sort();
        uris
    }

    /// Registered property endpoint URIs, sorted.
    pub fn property_endpoints(&self) -> Vec<String> {
        let mut uris: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().is_property())
            .map(|e| e.key().clone())
            .collect();
        uris.sort();
        uris
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn drain(&self) -> usize {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.retire(&entry, true);
                removed += 1;
            }
        }
        removed
    }

    fn retire(&self, entry: &RegistryEntry, announce: bool) {
        if let Some(listener) = &entry.listener {
            listener.close();
            entry.binding.detach(&entry.config);
        }
        if announce {
            self.publish_lifecycle(
                &entry.device_name,
                GatewayEvent::ResourceUnregistered {
                    device_name: entry.device_name.clone(),
                    endpoint: entry.endpoint.clone(),
                },
            );
        }
    }

    fn publish_lifecycle(&self, device_name: &str, event: GatewayEvent) {
        self.event_bus.publish_with_metadata(
            lifecycle_topic(device_name),
            event,
            EventMetadata::new("registry"),
        );
    }
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("active", &self.is_active())
            .field("endpoints", &self.endpoints())
            .finish()
    }
}
