//! # Publishing
//!
//! [`PublishQueue`] is a [`QueueEngine`] whose processor forwards each
//! envelope to a [`TransportPublisher`]. [`MessagePublisher`] is the typed
//! front end producers use.
//!
//! Publishing is fire-and-forget from the producer's point of view:
//! `publish` returns once the envelope is queued. A transport error is
//! reported to the fault sink as a `ProcessingFailure` and the queue moves on.

use crate::framework::{
    BoxError, DispatchError, Envelope, FaultSink, Message, QueueEngine, QueueOptions,
    Topic, WorkProcessor, WorkerState,
};
use crate::transport::TransportPublisher;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

/// Queue that drains into a transport.
pub type PublishQueue = QueueEngine<Envelope>;

struct TransportForwarder {
    transport: Arc<dyn TransportPublisher>,
}

#[async_trait]
impl WorkProcessor<Envelope> for TransportForwarder {
    async fn process(&self, envelope: Envelope) -> Result<(), BoxError> {
        trace!(message_type = %envelope.message_type(), "Forwarding to transport");
        self.transport.publish(envelope).await
    }
}

/// Builds a [`PublishQueue`] that forwards to `transport`.
pub fn publish_queue(
    options: QueueOptions,
    transport: Arc<dyn TransportPublisher>,
    faults: Arc<dyn FaultSink>,
) -> PublishQueue {
    QueueEngine::new(options, Arc::new(TransportForwarder { transport }), faults)
}

#[derive(Debug, Clone, Default)]
pub struct PublisherOptions {
    pub queue: QueueOptions,
    /// Topic used by [`MessagePublisher::publish`]. `None` or `""` means no topic.
    pub topic: Option<String>,
}

impl PublisherOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            queue: QueueOptions::new(name),
            topic: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_queue(mut self, queue: QueueOptions) -> Self {
        self.queue = queue;
        self
    }
}

/// Typed producer API over a [`PublishQueue`].
pub struct MessagePublisher {
    queue: PublishQueue,
    topic: Option<Topic>,
}

impl MessagePublisher {
    /// Fails with `InvalidArgument` if the configured topic is whitespace-only.
    pub fn new(
        options: PublisherOptions,
        transport: Arc<dyn TransportPublisher>,
        faults: Arc<dyn FaultSink>,
    ) -> Result<Self, DispatchError> {
        let topic = Topic::parse(options.topic.as_deref())?;
        Ok(Self {
            queue: publish_queue(options.queue, transport, faults),
            topic,
        })
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub fn state(&self) -> WorkerState {
        self.queue.state()
    }

    pub fn backlog(&self) -> usize {
        self.queue.backlog()
    }

    /// Queues `message` under the configured default topic.
    pub fn publish<M: Message>(&self, message: M) -> Result<(), DispatchError> {
        debug!(component = %self.name(), ?message, "publish");
        self.queue.enqueue(Envelope::new(message, self.topic.clone()))
    }

    /// Queues `message` under an explicit topic (`None` or `""` for no topic).
    pub fn publish_to<M: Message>(
        &self,
        message: M,
        topic: Option<&str>,
    ) -> Result<(), DispatchError> {
        let topic = Topic::parse(topic)?;
        debug!(component = %self.name(), ?message, ?topic, "publish_to");
        self.queue.enqueue(Envelope::new(message, topic))
    }

    /// Queues an envelope built elsewhere.
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), DispatchError> {
        self.queue.enqueue(envelope)
    }

    pub async fn start(&self) -> Result<(), DispatchError> {
        self.queue.start().await
    }

    pub async fn pause(&self) -> Result<(), DispatchError> {
        self.queue.pause().await
    }

    pub async fn resume(&self) -> Result<(), DispatchError> {
        self.queue.resume().await
    }

    pub async fn stop(&self) -> Result<(), DispatchError> {
        self.queue.stop().await
    }

    pub async fn dispose(&self) -> Result<(), DispatchError> {
        self.queue.dispose().await
    }
}
