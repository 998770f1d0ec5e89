//! Per-resource payload checks compiled once at registration time.
//!
//! Two directions share one compiled form:
//! - outgoing action payloads are **validated** strictly (required fields
//!   present, primitive types match, numeric ranges hold) before any I/O;
//! - inbound property payloads are **extracted**: the timestamp and value
//!   field are pulled out and the value is coerced to the declared type.

use serde_json::{Number, Value};

use crate::descriptor::{DataType, ResourceDescriptor};
use crate::error::{BindingError, BindingResult};

#[derive(Debug, Clone)]
struct FieldCheck {
    name: String,
    data_type: DataType,
    required: bool,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

/// Validation and extraction rules for one resource.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    resource: String,
    timestamp_field: String,
    value_field: String,
    value_type: Option<DataType>,
    checks: Vec<FieldCheck>,
}

impl CompiledSchema {
    /// Compile the rules of a descriptor.
    pub fn compile(descriptor: &ResourceDescriptor) -> Self {
        let schema = &descriptor.schema;
        let checks = schema
            .field_types
            .iter()
            .map(|(name, field)| FieldCheck {
                name: name.clone(),
                data_type: field.data_type,
                required: schema.is_required(name),
                minimum: field.minimum,
                maximum: field.maximum,
            })
            .collect();

        Self {
            resource: descriptor.name.clone(),
            timestamp_field: schema.timestamp_field.clone(),
            value_field: descriptor.value_field().to_string(),
            value_type: schema.field(descriptor.value_field()).map(|f| f.data_type),
            checks,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn timestamp_field(&self) -> &str {
        &self.timestamp_field
    }

    /// Strict check of an outgoing payload.
    pub fn validate(&self, payload: &Value) -> BindingResult<()> {
        let object = payload.as_object().ok_or_else(|| {
            BindingError::validation(format!(
                "{}: payload must be a JSON object, got {}",
                self.resource,
                json_type_name(payload)
            ))
        })?;

        let missing: Vec<&str> = self
            .checks
            .iter()
            .filter(|c| c.required && !object.contains_key(&c.name))
            .map(|c| c.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(BindingError::validation(format!(
                "{}: missing required fields: {}",
                self.resource,
                missing.join(",")
            )));
        }

        let mut errors = Vec::new();
        for check in &self.checks {
            let Some(value) = object.get(&check.name) else {
                continue;
            };
            if !matches_type(value, check.data_type) {
                errors.push(format!(
                    "'{}' must be {}, got {}",
                    check.name,
                    check.data_type,
                    json_type_name(value)
                ));
                continue;
            }
            if let Some(n) = value.as_f64() {
                if let Some(min) = check.minimum {
                    if n < min {
                        errors.push(format!("'{}' = {} is below minimum {}", check.name, n, min));
                    }
                }
                if let Some(max) = check.maximum {
                    if n > max {
                        errors.push(format!("'{}' = {} is above maximum {}", check.name, n, max));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BindingError::validation(format!(
                "{}: {}",
                self.resource,
                errors.join("; ")
            )))
        }
    }

    /// Pull `(converted value, timestamp)` out of an inbound payload.
    pub fn extract(&self, payload: &Value) -> BindingResult<(Value, i64)> {
        let object = payload.as_object().ok_or_else(|| {
            BindingError::conversion(format!(
                "{}: payload must be a JSON object, got {}",
                self.resource,
                json_type_name(payload)
            ))
        })?;

        let timestamp = match object.get(&self.timestamp_field) {
            Some(raw) => timestamp_millis(raw).ok_or_else(|| {
                BindingError::conversion(format!(
                    "{}: timestamp field '{}' is not a numeric timestamp in range",
                    self.resource, self.timestamp_field
                ))
            })?,
            None => {
                return Err(BindingError::conversion(format!(
                    "{}: missing timestamp field '{}'",
                    self.resource, self.timestamp_field
                )))
            }
        };

        let raw = object.get(&self.value_field).ok_or_else(|| {
            BindingError::conversion(format!(
                "{}: missing value field '{}'",
                self.resource, self.value_field
            ))
        })?;

        let value = match self.value_type {
            Some(data_type) => coerce(raw, data_type).ok_or_else(|| {
                BindingError::conversion(format!(
                    "{}: cannot convert {} to {}",
                    self.resource, raw, data_type
                ))
            })?,
            None => raw.clone(),
        };

        Ok((value, timestamp))
    }
}

/// Whether `value` already has the JSON shape of `data_type`.
pub fn matches_type(value: &Value, data_type: DataType) -> bool {
    match data_type {
        DataType::Number => value.is_number(),
        DataType::Integer => is_integral(value),
        DataType::Boolean => value.is_boolean(),
        DataType::String => value.is_string(),
        DataType::Object => value.is_object(),
        DataType::Array => value.is_array(),
    }
}

/// Coerce an inbound JSON value to `data_type`.
///
/// Numeric strings convert to numbers, `"true"`/`"false"` to booleans and
/// scalars to strings. Returns `None` when no conversion exists.
pub fn coerce(value: &Value, data_type: DataType) -> Option<Value> {
    match data_type {
        DataType::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            _ => None,
        },
        DataType::Integer => match value {
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Some(value.clone())
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Value::from(f as i64))
                }
            }
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        DataType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        DataType::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        DataType::Object => value.is_object().then(|| value.clone()),
        DataType::Array => value.is_array().then(|| value.clone()),
    }
}

fn is_integral(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
        }
        _ => false,
    }
}

/// Millisecond timestamp of a JSON number; `None` when it does not fit an `i64`.
fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) if n.is_u64() => n.as_i64(),
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
