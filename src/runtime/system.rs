use crate::framework::error::keep_first;
use crate::framework::{DispatchError, FaultSink, HandlerContextFactory, TracingFaultSink};
use crate::runtime::config::DispatchConfig;
use crate::transport::{InMemoryTransport, MessagePublisher, MessageSubscriber};
use std::sync::Arc;
use tracing::{error, info, warn};

/// In-process publisher/subscriber pair over an [`InMemoryTransport`].
///
/// `LocalSystem` is responsible for:
/// - **Wiring**: one transport shared by the publisher and the subscriber
/// - **Ordering**: the subscriber starts before the publisher and stops after it
/// - **Teardown**: both components end `Disposed`
///
/// # Example
///
/// ```ignore
/// let provider = HandlerProvider::new();
/// provider.register(|| AuditOrders);
///
/// let system = LocalSystem::new(DispatchConfig::new("orders"), Arc::new(provider))?;
/// system.subscriber().subscribe::<AuditOrders>(None)?;
/// system.start().await?;
///
/// system.publisher().publish(OrderPlaced { id: 7 })?;
///
/// system.shutdown().await?;
/// ```
pub struct LocalSystem {
    config: DispatchConfig,
    transport: InMemoryTransport,
    publisher: MessagePublisher,
    subscriber: MessageSubscriber,
}

impl LocalSystem {
    /// Builds the system with faults going to [`TracingFaultSink`].
    pub fn new(
        config: DispatchConfig,
        factory: Arc<dyn HandlerContextFactory>,
    ) -> Result<Self, DispatchError> {
        Self::with_faults(config, factory, Arc::new(TracingFaultSink))
    }

    /// Validates `config` and builds the system.
    pub fn with_faults(
        config: DispatchConfig,
        factory: Arc<dyn HandlerContextFactory>,
        faults: Arc<dyn FaultSink>,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let transport = InMemoryTransport::new();
        let publisher = MessagePublisher::new(
            config.publisher_options(),
            Arc::new(transport.clone()),
            faults.clone(),
        )?;
        let subscriber = MessageSubscriber::new(
            config.subscriber_options(),
            Arc::new(transport.clone()),
            factory,
            faults,
        );
        Ok(Self {
            config,
            transport,
            publisher,
            subscriber,
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn transport(&self) -> &InMemoryTransport {
        &self.transport
    }

    pub fn publisher(&self) -> &MessagePublisher {
        &self.publisher
    }

    pub fn subscriber(&self) -> &MessageSubscriber {
        &self.subscriber
    }

    /// Starts the subscriber, then the publisher. If the publisher fails the
    /// subscriber is stopped again.
    pub async fn start(&self) -> Result<(), DispatchError> {
        self.subscriber.start().await?;
        if let Err(e) = self.publisher.start().await {
            if let Err(rollback) = self.subscriber.stop().await {
                warn!(component = %self.config.name, error = %rollback, "Subscriber rollback failed");
            }
            return Err(e);
        }
        info!(component = %self.config.name, "System started");
        Ok(())
    }

    /// Stops and disposes the publisher, then the subscriber.
    ///
    /// Pending publishes are discarded. Returns the first error; every step
    /// runs regardless.
    pub async fn shutdown(self) -> Result<(), DispatchError> {
        info!(component = %self.config.name, "Shutting down system...");
        let mut first_error = None;

        if self.publisher.state().is_live() {
            keep_first(&mut first_error, self.publisher.stop().await);
        }
        keep_first(&mut first_error, self.publisher.dispose().await);

        if self.subscriber.state().is_live() {
            keep_first(&mut first_error, self.subscriber.stop().await);
        }
        keep_first(&mut first_error, self.subscriber.dispose().await);

        match first_error {
            None => {
                info!(component = %self.config.name, "System shutdown complete.");
                Ok(())
            }
            Some(e) => {
                error!(component = %self.config.name, error = %e, "System shutdown failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for LocalSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSystem")
            .field("name", &self.config.name)
            .field("publisher", &self.publisher.state())
            .field("subscriber", &self.subscriber.state())
            .finish()
    }
}
