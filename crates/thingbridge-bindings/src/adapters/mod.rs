//! Built-in bindings.
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `http` | HTTP polling binding (default) |
//!
//! The `memory` binding is always available.

pub mod memory;
pub use memory::{MemoryBinding, MemoryConfig, MEMORY_TECHNOLOGY};

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{HttpBinding, HttpConfig, HTTP_TECHNOLOGY};

/// Technology tags of the bindings compiled into this build.
pub fn available_technologies() -> Vec<&'static str> {
    let mut tags = vec![MEMORY_TECHNOLOGY];
    #[cfg(feature = "http")]
    tags.push(HTTP_TECHNOLOGY);
    tags
}
