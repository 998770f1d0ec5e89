//! In-process pub/sub binding.
//!
//! Models an event-driven technology: values arrive through
//! [`MemoryBinding::publish`] (standing in for a network callback thread) and
//! are pushed to every listener attached to the topic. Reads never produce a
//! fresh value, so the dispatcher serves the cached one. Writes record the
//! payload as the topic's last command.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::binding::{config_id, downcast_config, Binding, BindingConfig};
use crate::descriptor::ResourceDescriptor;
use crate::error::{BindingError, BindingResult};
use crate::listener::{ChannelListener, ValueRecord};

/// Technology tag of the memory binding.
pub const MEMORY_TECHNOLOGY: &str = "memory";

/// Config of the memory binding: a topic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    pub topic: String,
}

impl BindingConfig for MemoryConfig {
    fn raw(&self) -> &str {
        &self.topic
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Topic-addressed in-process binding.
#[derive(Default)]
pub struct MemoryBinding {
    /// topic -> (config id, listener)
    subscriptions: DashMap<String, Vec<(usize, Arc<ChannelListener>)>>,
    /// topic -> last command payload
    commands: DashMap<String, Value>,
}

impl MemoryBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an inbound message to every listener on `topic`.
    ///
    /// Returns one record per listener.
    pub fn publish(&self, topic: &str, payload: &Value) -> Vec<ValueRecord> {
        let listeners: Vec<Arc<ChannelListener>> = self
            .subscriptions
            .get(topic)
            .map(|subs| subs.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();
        if listeners.is_empty() {
            tracing::debug!(topic, "No listener for published message");
        }
        listeners.iter().map(|l| l.update(payload)).collect()
    }

    /// Last command written to `topic`.
    pub fn last_command(&self, topic: &str) -> Option<Value> {
        self.commands.get(topic).map(|v| v.value().clone())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions.get(topic).map(|s| s.len()).unwrap_or(0)
    }
}

fn parse_topic(raw: &str) -> BindingResult<MemoryConfig> {
    let topic = raw.trim();
    if topic.is_empty() {
        return Err(BindingError::configuration("memory topic is empty"));
    }
    if topic.contains(['#', '+']) {
        return Err(BindingError::configuration(format!(
            "memory topic {:?} must not contain wildcards",
            topic
        )));
    }
    Ok(MemoryConfig {
        topic: topic.to_string(),
    })
}

#[async_trait]
impl Binding for MemoryBinding {
    fn technology(&self) -> &'static str {
        MEMORY_TECHNOLOGY
    }

    fn create_config(&self, raw: &str) -> BindingResult<Arc<dyn BindingConfig>> {
        Ok(Arc::new(parse_topic(raw)?))
    }

    async fn read(&self, config: &dyn BindingConfig) -> BindingResult<Option<Value>> {
        downcast_config::<MemoryConfig>(config, MEMORY_TECHNOLOGY)?;
        Ok(None)
    }

    async fn write(
        &self,
        config: &dyn BindingConfig,
        action: &ResourceDescriptor,
        payload: &Value,
    ) -> BindingResult<()> {
        let config: &MemoryConfig = downcast_config(config, MEMORY_TECHNOLOGY)?;
        tracing::debug!(topic = %config.topic, action = %action.name, "Memory command stored");
        self.commands.insert(config.topic.clone(), payload.clone());
        Ok(())
    }

    fn attach(&self, config: &Arc<dyn BindingConfig>, listener: Arc<ChannelListener>) {
        self.subscriptions
            .entry(config.raw().to_string())
            .or_default()
            .push((config_id(config), listener));
    }

    fn detach(&self, config: &Arc<dyn BindingConfig>) {
        let id = config_id(config);
        let topic = config.raw().to_string();
        if let Some(mut subs) = self.subscriptions.get_mut(&topic) {
            subs.retain(|(c, _)| *c != id);
        }
        self.subscriptions.remove_if(&topic, |_, subs| subs.is_empty());
    }
}
