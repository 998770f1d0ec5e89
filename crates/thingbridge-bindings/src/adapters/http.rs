//! HTTP binding.
//!
//! Polls a URL for property payloads and sends action payloads as JSON.
//! The raw configuration is either a bare URL or a JSON object:
//!
//! ```json
//! {
//!   "url": "http://192.168.1.100/api/telemetry",
//!   "method": "GET",
//!   "commandUrl": "http://192.168.1.100/api/command",
//!   "commandMethod": "PUT",
//!   "headers": {"X-API-Key": "abc"},
//!   "authToken": "token123",
//!   "timeoutSecs": 5
//! }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thingbridge_core::config::DEFAULT_HTTP_TIMEOUT_SECS;

use crate::binding::{downcast_config, Binding, BindingConfig};
use crate::descriptor::ResourceDescriptor;
use crate::error::{BindingError, BindingResult};

/// Technology tag of the HTTP binding.
pub const HTTP_TECHNOLOGY: &str = "http";

/// Per-endpoint HTTP configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// URL polled for property values
    pub url: String,
    /// Polling method (GET, POST)
    #[serde(default = "default_http_method")]
    pub method: String,
    /// Command URL (if different from `url`)
    #[serde(default)]
    pub command_url: Option<String>,
    /// Command method (POST, PUT, PATCH)
    #[serde(default = "default_command_method")]
    pub command_method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Bearer token
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(skip)]
    raw: String,
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_command_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl HttpConfig {
    /// Parse a bare URL or a JSON object.
    pub fn parse(raw: &str) -> BindingResult<Self> {
        let trimmed = raw.trim();
        let mut config = if trimmed.starts_with('{') {
            serde_json::from_str::<HttpConfig>(trimmed).map_err(|e| {
                BindingError::configuration(format!("invalid http config: {}", e))
            })?
        } else {
            HttpConfig {
                url: trimmed.to_string(),
                method: default_http_method(),
                command_url: None,
                command_method: default_command_method(),
                headers: HashMap::new(),
                auth_token: None,
                timeout_secs: default_timeout(),
                raw: String::new(),
            }
        };

        if !(config.url.starts_with("http://") || config.url.starts_with("https://")) {
            return Err(BindingError::configuration(format!(
                "http url must start with http:// or https://, got {:?}",
                config.url
            )));
        }
        config.method = config.method.to_ascii_uppercase();
        config.command_method = config.command_method.to_ascii_uppercase();
        if !matches!(config.method.as_str(), "GET" | "POST") {
            return Err(BindingError::configuration(format!(
                "Unsupported HTTP method: {}",
                config.method
            )));
        }
        if !matches!(config.command_method.as_str(), "POST" | "PUT" | "PATCH") {
            return Err(BindingError::configuration(format!(
                "Unsupported command method: {}",
                config.command_method
            )));
        }
        config.raw = raw.to_string();
        Ok(config)
    }

    pub fn command_url(&self) -> &str {
        self.command_url.as_deref().unwrap_or(&self.url)
    }
}

impl BindingConfig for HttpConfig {
    fn raw(&self) -> &str {
        &self.raw
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Polling HTTP binding.
pub struct HttpBinding {
    client: Client,
}

impl HttpBinding {
    pub fn new() -> Self {
        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    fn decorate(&self, mut request: RequestBuilder, config: &HttpConfig) -> RequestBuilder {
        request = request.timeout(Duration::from_secs(config.timeout_secs));
        for (key, value) in &config.headers {
            request = request.header(key, value);
        }
        if let Some(token) = &config.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }
}

impl Default for HttpBinding {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Binding for HttpBinding {
    fn technology(&self) -> &'static str {
        HTTP_TECHNOLOGY
    }

    fn create_config(&self, raw: &str) -> BindingResult<Arc<dyn BindingConfig>> {
        Ok(Arc::new(HttpConfig::parse(raw)?))
    }

    async fn read(&self, config: &dyn BindingConfig) -> BindingResult<Option<Value>> {
        let config: &HttpConfig = downcast_config(config, HTTP_TECHNOLOGY)?;

        let request = match config.method.as_str() {
            "POST" => self.client.post(&config.url),
            _ => self.client.get(&config.url),
        };
        let response = self
            .decorate(request, config)
            .send()
            .await
            .map_err(|e| BindingError::technology(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BindingError::technology(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BindingError::technology(format!("HTTP body read failed: {}", e)))?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        // Non-JSON bodies are handed over as strings and rejected by the listener.
        Ok(Some(
            serde_json::from_str(&body).unwrap_or(Value::String(body)),
        ))
    }

    async fn write(
        &self,
        config: &dyn BindingConfig,
        action: &ResourceDescriptor,
        payload: &Value,
    ) -> BindingResult<()> {
        let config: &HttpConfig = downcast_config(config, HTTP_TECHNOLOGY)?;
        let url = config.command_url();

        let request = match config.command_method.as_str() {
            "PUT" => self.client.put(url),
            "PATCH" => self.client.patch(url),
            _ => self.client.post(url),
        };
        let response = self
            .decorate(request, config)
            .json(payload)
            .send()
            .await
            .map_err(|e| BindingError::technology(format!("HTTP command failed: {}", e)))?;

        if response.status().is_success() {
            tracing::debug!(action = %action.name, url, "HTTP command delivered");
            Ok(())
        } else {
            Err(BindingError::technology(format!(
                "HTTP command error: {}",
                response.status()
            )))
        }
    }
}
