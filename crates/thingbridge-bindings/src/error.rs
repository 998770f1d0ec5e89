//! Error type for the binding layer.

use thiserror::Error;

/// Result type for binding operations.
pub type BindingResult<T> = Result<T, BindingError>;

/// Error type for registry, listener, dispatcher and binding operations.
///
/// Inside a dispatch batch every variant is turned into a failure record;
/// only registration errors reach the caller directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// No binding config or listener registered for an endpoint
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Outgoing payload does not satisfy the action schema
    #[error("Validation error: {0}")]
    Validation(String),

    /// Inbound value cannot be coerced to the declared type
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Opaque failure raised by a technology driver
    #[error("Technology error: {0}")]
    Technology(String),

    /// Malformed raw binding configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed registration request or descriptor
    #[error("Registration error: {0}")]
    Registration(String),

    /// No binding registered for a technology tag
    #[error("Unknown technology: {0}")]
    UnknownTechnology(String),

    /// Registry has not been started (or was stopped)
    #[error("Registry is not active")]
    Inactive,
}

impl BindingError {
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    pub fn technology(msg: impl Into<String>) -> Self {
        Self::Technology(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }
}

impl From<BindingError> for thingbridge_core::Error {
    fn from(e: BindingError) -> Self {
        match e {
            BindingError::Lookup(msg) => thingbridge_core::Error::NotFound(msg),
            BindingError::Validation(msg) | BindingError::Conversion(msg) => {
                thingbridge_core::Error::Validation(msg)
            }
            BindingError::Configuration(msg) => thingbridge_core::Error::Config(msg),
            BindingError::Registration(_)
            | BindingError::UnknownTechnology(_)
            | BindingError::Inactive => thingbridge_core::Error::Registry(e.to_string()),
            BindingError::Technology(msg) => thingbridge_core::Error::Binding(msg),
        }
    }
}
