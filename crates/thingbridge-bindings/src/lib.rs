//! Binding dispatch layer for ThingBridge.
//!
//! Connects logical device resources (properties and actions) to the
//! technology bindings that reach them.
//!
//! ## Architecture
//!
//! ```text
//!   Dispatcher ──read/write──> BindingRegistry ──> Binding (http, memory, ...)
//!                                   │                   │ push
//!                                   ▼                   ▼
//!                             RegistryEntry ──> ChannelListener ──> consumer
//!                                                       │
//!                                                       └──> EventBus
//! ```
//!
//! - [`BindingRegistry`] owns one entry per endpoint URI.
//! - [`Dispatcher`] runs batches of reads and writes; failures become records.
//! - [`ChannelListener`] caches the last good value of a property.
//! - [`Poller`] reads every property endpoint on an interval.

pub mod adapters;
pub mod binding;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod listener;
pub mod poller;
pub mod registry;
pub mod validation;

pub use adapters::{available_technologies, MemoryBinding};
#[cfg(feature = "http")]
pub use adapters::HttpBinding;
pub use binding::{Binding, BindingCatalog, BindingConfig, MockBinding, MockConfig};
pub use descriptor::{DataType, Endpoint, Operation, PayloadSchema, ResourceDescriptor, ResourceKind};
pub use dispatcher::{Dispatcher, ReadRequest, RequestOutcome, WriteRequest};
pub use error::{BindingError, BindingResult};
pub use listener::{
    CachedValue, ChannelConsumer, ChannelListener, ConsumerHandle, FnConsumer, ListenerState,
    RecordConsumer, RecordStatus, ValueRecord,
};
pub use poller::{PollSummary, Poller, PollerHandle};
pub use registry::{BindingRegistry, EndpointRegistration, RegistryEntry, ResourceRegistration};
pub use validation::CompiledSchema;
