//! Binding contract.
//!
//! A binding speaks one technology (HTTP polling, an in-process pub/sub
//! space, ...). It turns raw configuration strings into opaque
//! [`BindingConfig`]s, reads and writes through them, and optionally pushes
//! inbound values to attached listeners.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::descriptor::ResourceDescriptor;
use crate::error::{BindingError, BindingResult};
use crate::listener::ChannelListener;

/// Technology-specific configuration produced by [`Binding::create_config`].
pub trait BindingConfig: Any + Send + Sync + fmt::Debug {
    /// Raw string the config was created from.
    fn raw(&self) -> &str;

    /// Get this config as `Any` for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Downcast a config to the concrete type of a binding.
pub fn downcast_config<'a, T: 'static>(
    config: &'a dyn BindingConfig,
    technology: &str,
) -> BindingResult<&'a T> {
    config.as_any().downcast_ref::<T>().ok_or_else(|| {
        BindingError::configuration(format!(
            "config {:?} was not created by the {} binding",
            config.raw(),
            technology
        ))
    })
}

/// Stable identity of a config instance.
pub fn config_id(config: &Arc<dyn BindingConfig>) -> usize {
    Arc::as_ptr(config) as *const () as usize
}

/// A technology driver.
#[async_trait]
pub trait Binding: Send + Sync {
    /// Technology tag (e.g. "http", "memory").
    fn technology(&self) -> &'static str;

    /// Parse a raw configuration string.
    fn create_config(&self, raw: &str) -> BindingResult<Arc<dyn BindingConfig>>;

    /// Read the current payload of a property.
    ///
    /// `Ok(None)` means the technology has nothing to offer on demand; the
    /// cached value is used instead.
    async fn read(&self, config: &dyn BindingConfig) -> BindingResult<Option<Value>>;

    /// Send a validated action payload.
    async fn write(
        &self,
        config: &dyn BindingConfig,
        action: &ResourceDescriptor,
        payload: &Value,
    ) -> BindingResult<()>;

    /// Hand a listener to the driver so it can push updates.
    fn attach(&self, _config: &Arc<dyn BindingConfig>, _listener: Arc<ChannelListener>) {
        // Default: polled technologies never push
    }

    /// Stop pushing updates for a config.
    fn detach(&self, _config: &Arc<dyn BindingConfig>) {}
}

/// Technology tag to binding map.
#[derive(Default)]
pub struct BindingCatalog {
    bindings: RwLock<HashMap<String, Arc<dyn Binding>>>,
}

impl BindingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the built-in bindings enabled at compile time.
    pub fn with_builtin() -> Self {
        let catalog = Self::new();
        catalog.register(Arc::new(crate::adapters::MemoryBinding::new()));
        #[cfg(feature = "http")]
        catalog.register(Arc::new(crate::adapters::HttpBinding::new()));
        catalog
    }

    /// Add a binding, replacing any binding with the same tag.
    pub fn register(&self, binding: Arc<dyn Binding>) {
        let technology = binding.technology().to_string();
        tracing::debug!(technology = %technology, "Binding registered");
        self.bindings.write().insert(technology, binding);
    }

    pub fn get(&self, technology: &str) -> BindingResult<Arc<dyn Binding>> {
        self.bindings
            .read()
            .get(technology)
            .cloned()
            .ok_or_else(|| BindingError::UnknownTechnology(technology.to_string()))
    }

    /// Registered technology tags, sorted.
    pub fn technologies(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.bindings.read().keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl fmt::Debug for BindingCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingCatalog")
            .field("technologies", &self.technologies())
            .finish()
    }
}

/// Config of the [`MockBinding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConfig {
    pub raw: String,
}

impl BindingConfig for MockConfig {
    fn raw(&self) -> &str {
        &self.raw
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scriptable binding for testing.
///
/// Reads return queued results first, then the standing result set for the
/// config (default `Ok(None)`). Every call is counted.
pub struct MockBinding {
    technology: &'static str,
    read_queue: Mutex<HashMap<String, VecDeque<BindingResult<Option<Value>>>>>,
    read_results: Mutex<HashMap<String, BindingResult<Option<Value>>>>,
    rejected_configs: Mutex<HashMap<String, String>>,
    write_failure: Mutex<Option<String>>,
    writes: Mutex<Vec<(String, Value)>>,
    listeners: Mutex<Vec<(usize, String, Arc<ChannelListener>)>>,
    reads: AtomicUsize,
    configs_created: AtomicUsize,
}

impl MockBinding {
    /// Create a new mock binding for a technology tag.
    pub fn new(technology: &'static str) -> Self {
        Self {
            technology,
            read_queue: Mutex::new(HashMap::new()),
            read_results: Mutex::new(HashMap::new()),
            rejected_configs: Mutex::new(HashMap::new()),
            write_failure: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            configs_created: AtomicUsize::new(0),
        }
    }

    /// Result returned by every read of `raw` once the queue is drained.
    pub fn set_read(&self, raw: &str, result: BindingResult<Option<Value>>) {
        self.read_results.lock().insert(raw.to_string(), result);
    }

    /// One-shot result for the next read of `raw`.
    pub fn queue_read(&self, raw: &str, result: BindingResult<Option<Value>>) {
        self.read_queue
            .lock()
            .entry(raw.to_string())
            .or_default()
            .push_back(result);
    }

    /// Make `create_config(raw)` fail.
    pub fn reject_config(&self, raw: &str, message: impl Into<String>) {
        self.rejected_configs
            .lock()
            .insert(raw.to_string(), message.into());
    }

    /// Make every write fail with a technology error.
    pub fn fail_writes(&self, message: impl Into<String>) {
        *self.write_failure.lock() = Some(message.into());
    }

    /// Push a payload to every listener attached for `raw`.
    pub fn push(&self, raw: &str, payload: &Value) -> usize {
        let targets: Vec<Arc<ChannelListener>> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, r, _)| r == raw)
            .map(|(_, _, l)| l.clone())
            .collect();
        for listener in &targets {
            listener.update(payload);
        }
        targets.len()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn configs_created(&self) -> usize {
        self.configs_created.load(Ordering::SeqCst)
    }

    /// `(raw config, payload)` of every delivered write.
    pub fn writes(&self) -> Vec<(String, Value)> {
        self.writes.lock().clone()
    }

    pub fn attached_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

#[async_trait]
impl Binding for MockBinding {
    fn technology(&self) -> &'static str {
        self.technology
    }

    fn create_config(&self, raw: &str) -> BindingResult<Arc<dyn BindingConfig>> {
        if let Some(message) = self.rejected_configs.lock().get(raw) {
            return Err(BindingError::configuration(message.clone()));
        }
        self.configs_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConfig {
            raw: raw.to_string(),
        }))
    }

    async fn read(&self, config: &dyn BindingConfig) -> BindingResult<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let raw = config.raw();
        if let Some(result) = self
            .read_queue
            .lock()
            .get_mut(raw)
            .and_then(VecDeque::pop_front)
        {
            return result;
        }
        self.read_results
            .lock()
            .get(raw)
            .cloned()
            .unwrap_or(Ok(None))
    }

    async fn write(
        &self,
        config: &dyn BindingConfig,
        _action: &ResourceDescriptor,
        payload: &Value,
    ) -> BindingResult<()> {
        if let Some(message) = self.write_failure.lock().clone() {
            return Err(BindingError::technology(message));
        }
        self.writes
            .lock()
            .push((config.raw().to_string(), payload.clone()));
        Ok(())
    }

    fn attach(&self, config: &Arc<dyn BindingConfig>, listener: Arc<ChannelListener>) {
        self.listeners
            .lock()
            .push((config_id(config), config.raw().to_string(), listener));
    }

    fn detach(&self, config: &Arc<dyn BindingConfig>) {
        let id = config_id(config);
        self.listeners.lock().retain(|(c, _, _)| *c != id);
    }
}
