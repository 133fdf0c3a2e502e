//! # Mock Framework
//!
//! Test doubles for the injected seams.
//!
//! - [`RecordingFaultSink`] keeps every reported [`Fault`] for assertions.
//! - [`MockContextFactory`] resolves handlers through a [`HandlerProvider`],
//!   records each context stage it sees, and can fail on demand at a chosen
//!   stage.
//! - [`RecordingPublisher`] is a transport that records envelopes instead of
//!   delivering them, optionally failing selected publishes.
//!
//! # Example
//! ```ignore
//! let faults = RecordingFaultSink::new();
//! let factory = MockContextFactory::new(provider).fail_at(Some(DispatchStage::End));
//! // ... dispatch ...
//! assert_eq!(faults.labels(), vec!["dispatch_failure"]);
//! assert_eq!(factory.count(DispatchStage::Dispose), 1);
//! ```

use crate::framework::context::{
    HandlerContextFactory, HandlerInstance, HandlerProvider, InvocationContext,
};
use crate::framework::error::{BoxError, DispatchStage};
use crate::framework::fault::{Fault, FaultSink};
use crate::framework::handler::HandlerType;
use crate::framework::message::Envelope;
use crate::transport::TransportPublisher;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// =============================================================================
// FAULTS
// =============================================================================

/// Collects faults in the order they were reported.
#[derive(Clone, Default)]
pub struct RecordingFaultSink {
    faults: Arc<Mutex<Vec<Fault>>>,
}

impl RecordingFaultSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.faults.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.lock().is_empty()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Fault> {
        std::mem::take(&mut *self.faults.lock())
    }

    /// `as_label()` of every recorded error, in order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.faults.lock().iter().map(|f| f.error.as_label()).collect()
    }

    /// Runs `inspect` over the recorded faults without removing them.
    pub fn with<R>(&self, inspect: impl FnOnce(&[Fault]) -> R) -> R {
        inspect(&self.faults.lock())
    }
}

impl FaultSink for RecordingFaultSink {
    fn report(&self, fault: Fault) {
        self.faults.lock().push(fault);
    }
}

// =============================================================================
// CONTEXTS
// =============================================================================

/// One stage observed by a [`MockContextFactory`] context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextEvent {
    /// Sequence number of the context, starting at 0.
    pub context: usize,
    pub stage: DispatchStage,
}

#[derive(Default)]
struct ContextLog {
    events: Mutex<Vec<ContextEvent>>,
    created: AtomicUsize,
}

/// Context factory that records stages and injects failures.
#[derive(Clone)]
pub struct MockContextFactory {
    provider: HandlerProvider,
    fail_at: Option<DispatchStage>,
    log: Arc<ContextLog>,
}

impl MockContextFactory {
    pub fn new(provider: HandlerProvider) -> Self {
        Self {
            provider,
            fail_at: None,
            log: Arc::new(ContextLog::default()),
        }
    }

    /// Every context fails at `stage`. `None` disables injection.
    pub fn fail_at(mut self, stage: Option<DispatchStage>) -> Self {
        self.fail_at = stage;
        self
    }

    pub fn events(&self) -> Vec<ContextEvent> {
        self.log.events.lock().clone()
    }

    /// How many times `stage` was entered across all contexts.
    pub fn count(&self, stage: DispatchStage) -> usize {
        self.log
            .events
            .lock()
            .iter()
            .filter(|e| e.stage == stage)
            .count()
    }

    pub fn created(&self) -> usize {
        self.log.created.load(Ordering::SeqCst)
    }
}

struct MockContext {
    id: usize,
    provider: HandlerProvider,
    fail_at: Option<DispatchStage>,
    log: Arc<ContextLog>,
}

impl MockContext {
    fn enter(&self, stage: DispatchStage) -> Result<(), BoxError> {
        self.log.events.lock().push(ContextEvent {
            context: self.id,
            stage,
        });
        if self.fail_at == Some(stage) {
            return Err(format!("injected failure at {stage}").into());
        }
        Ok(())
    }
}

#[async_trait]
impl InvocationContext for MockContext {
    async fn begin(&mut self) -> Result<(), BoxError> {
        self.enter(DispatchStage::Begin)
    }

    fn resolve(&mut self, handler: &HandlerType) -> Result<HandlerInstance, BoxError> {
        self.enter(DispatchStage::Resolve)?;
        self.provider.construct(handler)
    }

    async fn end(&mut self) -> Result<(), BoxError> {
        self.enter(DispatchStage::End)
    }

    async fn dispose(&mut self) -> Result<(), BoxError> {
        self.enter(DispatchStage::Dispose)
    }
}

impl HandlerContextFactory for MockContextFactory {
    fn create_context(&self) -> Result<Box<dyn InvocationContext>, BoxError> {
        let id = self.log.created.fetch_add(1, Ordering::SeqCst);
        self.log.events.lock().push(ContextEvent {
            context: id,
            stage: DispatchStage::CreateContext,
        });
        if self.fail_at == Some(DispatchStage::CreateContext) {
            return Err("injected failure at create_context".into());
        }
        Ok(Box::new(MockContext {
            id,
            provider: self.provider.clone(),
            fail_at: self.fail_at,
            log: self.log.clone(),
        }))
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Transport publisher that records envelopes.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    envelopes: Arc<Mutex<Vec<Envelope>>>,
    attempts: Arc<AtomicUsize>,
    fail_on: Arc<Mutex<Vec<usize>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `attempt`-th publish (0-based) fail instead of recording.
    pub fn fail_on(self, attempt: usize) -> Self {
        self.fail_on.lock().push(attempt);
        self
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.envelopes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.lock().is_empty()
    }

    /// Publishes attempted so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportPublisher for RecordingPublisher {
    async fn publish(&self, envelope: Envelope) -> Result<(), BoxError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.lock().contains(&attempt) {
            return Err(format!("publish #{attempt} rejected").into());
        }
        self.envelopes.lock().push(envelope);
        Ok(())
    }
}
