//! Periodic poll cycle over every registered property endpoint.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::dispatcher::{Dispatcher, ReadRequest, RequestOutcome};

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polled: usize,
    pub failed: usize,
}

/// Reads all property endpoints on a fixed interval.
pub struct Poller;

impl Poller {
    /// Read every property endpoint once.
    pub async fn poll_once(dispatcher: &Dispatcher) -> Vec<RequestOutcome> {
        let requests: Vec<ReadRequest> = dispatcher
            .registry()
            .property_endpoints()
            .into_iter()
            .map(ReadRequest::new)
            .collect();
        dispatcher.read_batch(&requests).await
    }

    /// Start polling on the current tokio runtime.
    pub fn spawn(dispatcher: Dispatcher, interval: Duration) -> PollerHandle {
        let period = interval.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !dispatcher.registry().is_active() {
                    continue;
                }
                let summary = summarize(&Self::poll_once(&dispatcher).await);
                if summary.failed > 0 {
                    tracing::warn!(
                        polled = summary.polled,
                        failed = summary.failed,
                        "Poll cycle finished with failures"
                    );
                } else {
                    tracing::debug!(polled = summary.polled, "Poll cycle finished");
                }
            }
        });

        tracing::info!(interval_ms = period.as_millis() as u64, "Poller started");
        PollerHandle { handle }
    }
}

/// Count polled and failed outcomes.
pub fn summarize(outcomes: &[RequestOutcome]) -> PollSummary {
    PollSummary {
        polled: outcomes.len(),
        failed: outcomes.iter().filter(|o| !o.is_success()).count(),
    }
}

/// Handle to a running poll task.
pub struct PollerHandle {
    handle: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(self) {
        self.handle.abort();
        tracing::info!("Poller stopped");
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{BindingCatalog, MockBinding};
    use crate::descriptor::{DataType, ResourceDescriptor};
    use crate::registry::{BindingRegistry, ResourceRegistration};
    use serde_json::json;
    use std::sync::Arc;
    use thingbridge_core::EventBus;

    const URI: &str = "things/boiler/properties/pressure";

    fn dispatcher() -> (Dispatcher, Arc<MockBinding>) {
        let mock = Arc::new(MockBinding::new("mock"));
        let catalog = Arc::new(BindingCatalog::new());
        catalog.register(mock.clone());
        let registry = Arc::new(BindingRegistry::new(catalog, Arc::new(EventBus::new())));
        registry.start();
        registry
            .register(ResourceRegistration::new("boiler", "mock").with_property(
                ResourceDescriptor::property("pressure", DataType::Number).with_endpoint(URI),
                URI,
                "p",
            ))
            .unwrap();
        (Dispatcher::new(registry), mock)
    }

    #[tokio::test]
    async fn test_poll_once_reads_properties() {
        let (dispatcher, mock) = dispatcher();
        mock.set_read("p", Ok(Some(json!({"time": 10, "pressure": 1.2}))));

        let outcomes = Poller::poll_once(&dispatcher).await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(summarize(&outcomes), PollSummary { polled: 1, failed: 0 });
        assert_eq!(mock.read_count(), 1);
    }

    #[tokio::test]
    async fn test_spawned_poller_ticks() {
        let (dispatcher, mock) = dispatcher();
        mock.set_read("p", Ok(Some(json!({"time": 10, "pressure": 1.2}))));

        let handle = Poller::spawn(dispatcher, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        handle.stop();

        assert!(mock.read_count() >= 2);
    }
}
