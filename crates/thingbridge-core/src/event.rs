//! Gateway event types.
//!
//! Every event travels on the event bus together with the topic it was
//! published on and an [`EventMetadata`] envelope.

use serde::{Deserialize, Serialize};

use crate::config::topics;

/// Events published by the binding layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// A property listener accepted a new value.
    ///
    /// `value` is the normalised payload object the value was taken from.
    #[serde(rename_all = "camelCase")]
    PropertyChanged {
        value: serde_json::Value,
        device_name: String,
        property_name: String,
    },

    /// An endpoint was bound to a technology.
    #[serde(rename_all = "camelCase")]
    ResourceRegistered {
        device_name: String,
        resource_name: String,
        endpoint: String,
        technology: String,
    },

    /// An endpoint was removed from the registry.
    #[serde(rename_all = "camelCase")]
    ResourceUnregistered {
        device_name: String,
        endpoint: String,
    },

    /// A write was delivered to (or rejected by) a binding.
    #[serde(rename_all = "camelCase")]
    ActionInvoked {
        device_name: String,
        action_name: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: i64,
    },
}

impl GatewayEvent {
    /// Get the event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::PropertyChanged { .. } => "PropertyChanged",
            Self::ResourceRegistered { .. } => "ResourceRegistered",
            Self::ResourceUnregistered { .. } => "ResourceUnregistered",
            Self::ActionInvoked { .. } => "ActionInvoked",
        }
    }

    /// Device the event refers to.
    pub fn device_name(&self) -> &str {
        match self {
            Self::PropertyChanged { device_name, .. }
            | Self::ResourceRegistered { device_name, .. }
            | Self::ResourceUnregistered { device_name, .. }
            | Self::ActionInvoked { device_name, .. } => device_name,
        }
    }

    pub fn is_property_event(&self) -> bool {
        matches!(self, Self::PropertyChanged { .. })
    }

    pub fn is_lifecycle_event(&self) -> bool {
        matches!(
            self,
            Self::ResourceRegistered { .. } | Self::ResourceUnregistered { .. }
        )
    }

    pub fn is_action_event(&self) -> bool {
        matches!(self, Self::ActionInvoked { .. })
    }
}

/// Topic a property value is published on: `things/<device>/properties/<property>`.
pub fn property_topic(device_name: &str, property_name: &str) -> String {
    format!(
        "{}{}{}{}",
        topics::PREFIX,
        device_name,
        topics::PROPERTY_TAG,
        property_name
    )
}

/// Topic an action result is published on: `things/<device>/actions/<action>`.
pub fn action_topic(device_name: &str, action_name: &str) -> String {
    format!(
        "{}{}{}{}",
        topics::PREFIX,
        device_name,
        topics::ACTION_TAG,
        action_name
    )
}

/// Topic for registry lifecycle events of a device: `things/<device>/lifecycle`.
pub fn lifecycle_topic(device_name: &str) -> String {
    format!("{}{}{}", topics::PREFIX, device_name, topics::LIFECYCLE_TAG)
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub event_id: String,
    /// Event source (component that published)
    pub source: String,
    /// Publication time in milliseconds since the epoch
    pub timestamp: i64,
}

impl EventMetadata {
    /// Create new event metadata.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
