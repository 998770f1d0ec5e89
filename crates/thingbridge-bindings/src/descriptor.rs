//! Resource descriptors.
//!
//! A descriptor names a property (readable telemetry point) or an action
//! (writable command), the JSON payload shape it exchanges, and the endpoints
//! it is reachable through. Descriptors are immutable once built and shared as
//! `Arc<ResourceDescriptor>`.
//!
//! ```json
//! {
//!   "name": "temperature",
//!   "kind": "property",
//!   "schema": {
//!     "timestampField": "time",
//!     "requiredFields": ["time", "temperature"],
//!     "fieldTypes": {
//!       "time": {"type": "integer"},
//!       "temperature": {"type": "number", "unit": "°C", "minimum": -40, "maximum": 125}
//!     }
//!   },
//!   "endpoints": [
//!     {"uri": "things/t1/properties/temperature", "operation": "readproperty", "contentType": "application/json"}
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thingbridge_core::config::{topics, DEFAULT_TIMESTAMP_FIELD};
use thingbridge_core::EndpointConfig;

use crate::error::{BindingError, BindingResult};

/// Default endpoint content type.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Whether a resource is read (property) or written (action).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Property,
    Action,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property => write!(f, "property"),
            Self::Action => write!(f, "action"),
        }
    }
}

/// Primitive type of a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Number,
    Integer,
    Boolean,
    String,
    Object,
    Array,
}

impl DataType {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for DataType {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "number" | "float" | "double" => Ok(Self::Number),
            "integer" | "int" => Ok(Self::Integer),
            "boolean" | "bool" => Ok(Self::Boolean),
            "string" => Ok(Self::String),
            "object" => Ok(Self::Object),
            "array" => Ok(Self::Array),
            other => Err(BindingError::registration(format!(
                "unknown data type '{}'",
                other
            ))),
        }
    }
}

/// Interaction an endpoint supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    ReadProperty,
    ObserveProperty,
    WriteProperty,
    InvokeAction,
}

impl Operation {
    /// Whether this operation may appear on an endpoint of `kind`.
    pub fn applies_to(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Property => !matches!(self, Self::InvokeAction),
            ResourceKind::Action => matches!(self, Self::InvokeAction),
        }
    }

    /// Default operation for an endpoint of `kind`.
    pub fn default_for(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Property => Self::ReadProperty,
            ResourceKind::Action => Self::InvokeAction,
        }
    }
}

/// URI plus supported operation and content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    JSON_CONTENT_TYPE.to_string()
}

impl Endpoint {
    pub fn new(uri: impl Into<String>, operation: Operation) -> Self {
        Self {
            uri: uri.into(),
            operation: Some(operation),
            content_type: default_content_type(),
        }
    }
}

/// Per-field type information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl FieldSchema {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            minimum: None,
            maximum: None,
            unit: None,
        }
    }
}

/// JSON payload shape: a timestamp field plus named value fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSchema {
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub field_types: BTreeMap<String, FieldSchema>,
}

fn default_timestamp_field() -> String {
    DEFAULT_TIMESTAMP_FIELD.to_string()
}

impl Default for PayloadSchema {
    fn default() -> Self {
        Self {
            timestamp_field: default_timestamp_field(),
            required_fields: Vec::new(),
            field_types: BTreeMap::new(),
        }
    }
}

impl PayloadSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.field_types.get(name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required_fields.iter().any(|f| f == name)
    }

    fn add_field(&mut self, name: &str, field: FieldSchema, required: bool) {
        self.field_types.insert(name.to_string(), field);
        if required && !self.is_required(name) {
            self.required_fields.push(name.to_string());
        }
    }
}

/// A property or action definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub schema: PayloadSchema,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl ResourceDescriptor {
    /// Property with the canonical `{time, <name>}` payload, both required.
    pub fn property(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        let mut schema = PayloadSchema::default();
        let timestamp_field = schema.timestamp_field.clone();
        schema.add_field(&timestamp_field, FieldSchema::new(DataType::Integer), true);
        schema.add_field(&name, FieldSchema::new(data_type), true);
        Self {
            name,
            kind: ResourceKind::Property,
            schema,
            endpoints: Vec::new(),
        }
    }

    /// Action whose payload may carry an optional timestamp; add fields with
    /// [`with_field`](Self::with_field).
    pub fn action(name: impl Into<String>) -> Self {
        let mut schema = PayloadSchema::default();
        let timestamp_field = schema.timestamp_field.clone();
        schema.add_field(&timestamp_field, FieldSchema::new(DataType::Integer), false);
        Self {
            name: name.into(),
            kind: ResourceKind::Action,
            schema,
            endpoints: Vec::new(),
        }
    }

    /// Add (or replace) a payload field.
    pub fn with_field(mut self, name: &str, data_type: DataType, required: bool) -> Self {
        self.schema.add_field(name, FieldSchema::new(data_type), required);
        self
    }

    /// Set the numeric range of a field already declared.
    pub fn with_range(mut self, field: &str, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        if let Some(schema) = self.schema.field_types.get_mut(field) {
            schema.minimum = minimum;
            schema.maximum = maximum;
        }
        self
    }

    /// Set the unit of a field already declared.
    pub fn with_unit(mut self, field: &str, unit: impl Into<String>) -> Self {
        if let Some(schema) = self.schema.field_types.get_mut(field) {
            schema.unit = Some(unit.into());
        }
        self
    }

    /// Append an endpoint using the default operation for this kind.
    pub fn with_endpoint(mut self, uri: impl Into<String>) -> Self {
        self.endpoints
            .push(Endpoint::new(uri, Operation::default_for(self.kind)));
        self
    }

    pub fn endpoint(&self, uri: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.uri == uri)
    }

    pub fn has_endpoint(&self, uri: &str) -> bool {
        self.endpoint(uri).is_some()
    }

    /// Name of the field carrying the resource value.
    pub fn value_field(&self) -> &str {
        &self.name
    }

    pub fn timestamp_field(&self) -> &str {
        &self.schema.timestamp_field
    }

    /// Check the structural rules of a descriptor.
    pub fn validate(&self) -> BindingResult<()> {
        if self.name.trim().is_empty() {
            return Err(BindingError::registration("descriptor name is empty"));
        }
        if self.endpoints.is_empty() {
            return Err(BindingError::registration(format!(
                "{} '{}' has no endpoints",
                self.kind, self.name
            )));
        }
        for endpoint in &self.endpoints {
            if endpoint.uri.trim().is_empty() {
                return Err(BindingError::registration(format!(
                    "{} '{}' has an endpoint with an empty uri",
                    self.kind, self.name
                )));
            }
            if let Some(op) = endpoint.operation {
                if !op.applies_to(self.kind) {
                    return Err(BindingError::registration(format!(
                        "endpoint {} declares {:?}, which does not apply to a {}",
                        endpoint.uri, op, self.kind
                    )));
                }
            }
        }
        for required in &self.schema.required_fields {
            if self.schema.field(required).is_none() {
                return Err(BindingError::registration(format!(
                    "{} '{}': required field '{}' has no declared type",
                    self.kind, self.name, required
                )));
            }
        }
        if self.kind == ResourceKind::Property {
            if !self.schema.is_required(self.timestamp_field()) {
                return Err(BindingError::registration(format!(
                    "property '{}': timestamp field '{}' must be required",
                    self.name,
                    self.timestamp_field()
                )));
            }
            if self.schema.field(self.value_field()).is_none() {
                return Err(BindingError::registration(format!(
                    "property '{}': schema has no field named after the property",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Build a descriptor from a gateway file endpoint section.
    ///
    /// Returns the descriptor together with the endpoint URI the section
    /// binds. When the section has no `uri`, it defaults to
    /// `things/<device>/properties/<name>` (or `/actions/`).
    pub fn from_endpoint_config(
        device_name: &str,
        kind: ResourceKind,
        config: &EndpointConfig,
    ) -> BindingResult<(Self, String)> {
        let mut descriptor = match &config.descriptor {
            Some(raw) => {
                let descriptor: ResourceDescriptor = serde_json::from_value(raw.clone())
                    .map_err(|e| {
                        BindingError::registration(format!("invalid descriptor: {}", e))
                    })?;
                if descriptor.kind != kind {
                    return Err(BindingError::registration(format!(
                        "descriptor '{}' is a {}, expected a {}",
                        descriptor.name, descriptor.kind, kind
                    )));
                }
                descriptor
            }
            None => {
                let name = config.name.as_deref().ok_or_else(|| {
                    BindingError::registration("endpoint needs a descriptor or a name")
                })?;
                let data_type = match config.data_type.as_deref() {
                    Some(raw) => raw.parse()?,
                    None => DataType::Number,
                };
                let descriptor = match kind {
                    ResourceKind::Property => ResourceDescriptor::property(name, data_type),
                    ResourceKind::Action => {
                        ResourceDescriptor::action(name).with_field(name, data_type, true)
                    }
                };
                match &config.unit {
                    Some(unit) => descriptor.with_unit(name, unit.clone()),
                    None => descriptor,
                }
            }
        };

        let uri = match (&config.uri, descriptor.endpoints.first()) {
            (Some(uri), _) => uri.clone(),
            (None, Some(first)) => first.uri.clone(),
            (None, None) => default_uri(device_name, kind, &descriptor.name),
        };
        if !descriptor.has_endpoint(&uri) {
            descriptor = descriptor.with_endpoint(uri.clone());
        }
        descriptor.validate()?;
        Ok((descriptor, uri))
    }
}

/// `things/<device>/properties/<name>` or `things/<device>/actions/<name>`.
pub fn default_uri(device_name: &str, kind: ResourceKind, name: &str) -> String {
    let tag = match kind {
        ResourceKind::Property => topics::PROPERTY_TAG,
        ResourceKind::Action => topics::ACTION_TAG,
    };
    format!("{}{}{}{}", topics::PREFIX, device_name, tag, name)
}
