//! # Fault Reporting
//!
//! Failures that the runtime catches and continues past (a failing work item,
//! a failing handler) are reported through a [`FaultSink`]. The sink is
//! injected into each component; there is no process-wide default.

use crate::framework::error::DispatchError;
use tracing::error;

/// One caught failure, tagged with the component that observed it.
#[derive(Debug)]
pub struct Fault {
    /// Display name of the queue, publisher or subscriber.
    pub component: String,
    /// Topic of the message being processed, when there was one.
    pub topic: Option<String>,
    pub error: DispatchError,
}

impl Fault {
    pub fn new(component: impl Into<String>, error: DispatchError) -> Self {
        Self {
            component: component.into(),
            topic: None,
            error,
        }
    }

    pub fn with_topic(mut self, topic: Option<&str>) -> Self {
        self.topic = topic.map(str::to_string);
        self
    }
}

/// Receives caught failures.
///
/// Implementations must not fail and must not panic: `report` is called from
/// inside the worker loop and the dispatch path.
pub trait FaultSink: Send + Sync {
    fn report(&self, fault: Fault);
}

/// Default sink that writes every fault to the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn report(&self, fault: Fault) {
        error!(
            component = %fault.component,
            topic = fault.topic.as_deref().unwrap_or(""),
            kind = fault.error.as_label(),
            error = %fault.error,
            "Fault"
        );
    }
}
