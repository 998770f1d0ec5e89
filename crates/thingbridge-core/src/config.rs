//! Gateway configuration.
//!
//! Defaults and environment variable names shared by every crate, plus the
//! TOML file model the `thingbridge` binary loads. A gateway file looks like:
//!
//! ```toml
//! [gateway]
//! name = "edge-1"
//! poll_interval_secs = 15
//!
//! [[resources]]
//! device = "t1"
//! technology = "http"
//!
//! [resources.property]
//! name = "temperature"
//! data_type = "number"
//! config = "http://192.168.1.20/api/temperature"
//!
//! [resources.action]
//! name = "setTemperature"
//! data_type = "number"
//! config = '{"url": "http://192.168.1.20/api/temperature", "commandMethod": "PUT"}'
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Topic layout used on the event bus.
pub mod topics {
    /// Prefix of every resource topic.
    pub const PREFIX: &str = "things/";
    /// Separator between device name and property name.
    pub const PROPERTY_TAG: &str = "/properties/";
    /// Separator between device name and action name.
    pub const ACTION_TAG: &str = "/actions/";
    /// Suffix of the per-device lifecycle topic.
    pub const LIFECYCLE_TAG: &str = "/lifecycle";
}

/// Name of the timestamp field when a schema does not declare one.
pub const DEFAULT_TIMESTAMP_FIELD: &str = "time";

/// Default poll cycle interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default HTTP binding timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Default gateway name.
pub const DEFAULT_GATEWAY_NAME: &str = "thingbridge";

/// Environment variable names
pub mod env_vars {
    use super::DEFAULT_POLL_INTERVAL_SECS;
    use crate::eventbus::DEFAULT_CHANNEL_CAPACITY;

    pub const POLL_INTERVAL_SECS: &str = "THINGBRIDGE_POLL_INTERVAL_SECS";
    pub const EVENT_BUS_CAPACITY: &str = "THINGBRIDGE_EVENT_BUS_CAPACITY";
    pub const LOG_JSON: &str = "THINGBRIDGE_LOG_JSON";
    pub const CONFIG_PATH: &str = "THINGBRIDGE_CONFIG";

    /// Poll interval from the environment, or the default.
    pub fn poll_interval_secs() -> u64 {
        std::env::var(POLL_INTERVAL_SECS)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
    }

    /// Event bus capacity from the environment, or the default.
    pub fn event_bus_capacity() -> usize {
        std::env::var(EVENT_BUS_CAPACITY)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Whether JSON log output was requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// Top-level gateway file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// `[gateway]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Gateway name, used as event source
    pub name: String,
    /// Poll cycle interval in seconds
    pub poll_interval_secs: u64,
    /// Event bus buffer size
    pub event_bus_capacity: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_GATEWAY_NAME.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            event_bus_capacity: crate::eventbus::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// One `[[resources]]` entry: a logical resource of a device, reachable
/// through a property endpoint, an action endpoint, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Owning device name
    pub device: String,
    /// Technology tag selecting the binding (e.g. "http", "memory")
    pub technology: String,
    #[serde(default)]
    pub property: Option<EndpointConfig>,
    #[serde(default)]
    pub action: Option<EndpointConfig>,
}

/// Endpoint section of a resource.
///
/// Either `descriptor` carries a full resource descriptor, or `name` and
/// `data_type` describe the canonical `{time, <name>}` payload shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Raw, technology-specific binding configuration
    pub config: String,
    /// Endpoint URI; derived from device and resource name when absent
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub descriptor: Option<serde_json::Value>,
}

impl GatewayConfig {
    /// Parse a gateway file from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a gateway file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            resources = config.resources.len(),
            "Gateway file loaded"
        );
        Ok(config)
    }

    /// Apply `THINGBRIDGE_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if std::env::var(env_vars::POLL_INTERVAL_SECS).is_ok() {
            self.gateway.poll_interval_secs = env_vars::poll_interval_secs();
        }
        if std::env::var(env_vars::EVENT_BUS_CAPACITY).is_ok() {
            self.gateway.event_bus_capacity = env_vars::event_bus_capacity();
        }
        self
    }

    /// Check structural constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.poll_interval_secs == 0 {
            return Err(Error::config("gateway.poll_interval_secs must be positive"));
        }
        for (index, resource) in self.resources.iter().enumerate() {
            if resource.device.trim().is_empty() {
                return Err(crate::config_err!("resources[{}]: device is empty", index));
            }
            if resource.technology.trim().is_empty() {
                return Err(crate::config_err!("resources[{}]: technology is empty", index));
            }
            if resource.property.is_none() && resource.action.is_none() {
                return Err(crate::config_err!(
                    "resources[{}] ({}): needs a property or an action endpoint",
                    index,
                    resource.device
                ));
            }
            for endpoint in resource.property.iter().chain(resource.action.iter()) {
                if endpoint.descriptor.is_none() && endpoint.name.is_none() {
                    return Err(crate::config_err!(
                        "resources[{}] ({}): endpoint needs either a descriptor or a name",
                        index,
                        resource.device
                    ));
                }
            }
        }
        Ok(())
    }
}
