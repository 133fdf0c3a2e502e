//! # Subscribing
//!
//! [`MessageSubscriber`] is the consumer-side component. It owns a
//! [`DispatchRouter`], registers one transport callback per bundle key while
//! running, and feeds deliveries to the router.
//!
//! ## Delivery modes
//!
//! - [`DeliveryMode::Queued`] (default): deliveries are appended to a
//!   [`SubscribeQueue`] and dispatched by its worker. The transport callback
//!   returns as soon as the envelope is queued. Supports pause/resume.
//! - [`DeliveryMode::Direct`]: the transport callback dispatches inline and
//!   completes only after every handler has run. Pause is not supported.
//!
//! ## Lifecycle
//!
//! | transition | work |
//! |---|---|
//! | `start` | fresh cancellation token, start the queue, subscribe every bundle key |
//! | `pause` / `resume` | pause / resume the queue |
//! | `stop` | cancel the token, drop transport subscriptions, stop the queue |
//! | `dispose` | as `stop`, then dispose the queue and clear the bundle table |
//!
//! If any transport subscription fails during `start`, the ones already made
//! are rolled back and `start` fails with [`DispatchError::Transport`].

use crate::framework::{
    BoxError, DispatchError, DispatchRouter, Envelope, FaultSink, Handler,
    HandlerContextFactory, Message, QueueEngine, QueueOptions, SubscriptionInfo, Topic,
    WorkProcessor, WorkerHooks, WorkerLifecycle, WorkerState, DEFAULT_POLL_INTERVAL,
};
use crate::framework::error::keep_first;
use crate::transport::{DeliveryCallback, SubscriptionHandle, TransportSubscriber};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Queue that drains into a [`DispatchRouter`].
pub type SubscribeQueue = QueueEngine<Envelope>;

/// How transport deliveries reach the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    Direct,
    #[default]
    Queued,
}

#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    pub name: String,
    pub poll_interval: Duration,
    pub pause_supported: bool,
    pub delivery: DeliveryMode,
}

impl SubscriberOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            pause_supported: true,
            delivery: DeliveryMode::Queued,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_pause_supported(mut self, pause_supported: bool) -> Self {
        self.pause_supported = pause_supported;
        self
    }
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self::new("subscriber")
    }
}

/// Router plus the cancellation token of the current run.
struct Dispatcher {
    router: DispatchRouter,
    cancel: Mutex<CancellationToken>,
}

impl Dispatcher {
    fn token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    async fn dispatch(&self, envelope: &Envelope) {
        let token = self.token();
        self.router.dispatch(envelope, &token).await;
    }
}

struct RouterFeeder {
    dispatcher: Arc<Dispatcher>,
}

#[async_trait]
impl WorkProcessor<Envelope> for RouterFeeder {
    async fn process(&self, envelope: Envelope) -> Result<(), BoxError> {
        self.dispatcher.dispatch(&envelope).await;
        Ok(())
    }
}

/// Builds a [`SubscribeQueue`] that dispatches through `dispatcher`.
fn feeder_queue(
    options: QueueOptions,
    dispatcher: Arc<Dispatcher>,
    faults: Arc<dyn FaultSink>,
) -> SubscribeQueue {
    QueueEngine::new(options, Arc::new(RouterFeeder { dispatcher }), faults)
}

/// Builds a standalone [`SubscribeQueue`] in front of `router`.
///
/// Handlers see a token that is never cancelled; use [`MessageSubscriber`]
/// for cancellation on stop.
pub fn subscribe_queue(
    options: QueueOptions,
    router: DispatchRouter,
    faults: Arc<dyn FaultSink>,
) -> SubscribeQueue {
    let dispatcher = Arc::new(Dispatcher {
        router,
        cancel: Mutex::new(CancellationToken::new()),
    });
    feeder_queue(options, dispatcher, faults)
}

/// Where a transport delivery goes.
#[derive(Clone)]
enum Inbox {
    Direct(Arc<Dispatcher>),
    Queued(Arc<SubscribeQueue>),
}

impl Inbox {
    async fn deliver(&self, envelope: Envelope) -> Result<(), DispatchError> {
        match self {
            Inbox::Direct(dispatcher) => {
                dispatcher.dispatch(&envelope).await;
                Ok(())
            }
            Inbox::Queued(queue) => queue.enqueue(envelope),
        }
    }
}

struct SubscriberCore {
    name: String,
    dispatcher: Arc<Dispatcher>,
    inbox: Inbox,
    transport: Arc<dyn TransportSubscriber>,
    handles: Mutex<Vec<Box<dyn SubscriptionHandle>>>,
}

impl SubscriberCore {
    fn callback(&self) -> DeliveryCallback {
        let inbox = self.inbox.clone();
        let name = self.name.clone();
        Arc::new(move |envelope: Envelope| {
            let inbox = inbox.clone();
            let name = name.clone();
            async move {
                let message_type = envelope.message_type();
                if let Err(e) = inbox.deliver(envelope).await {
                    warn!(component = %name, %message_type, error = %e, "Delivery rejected");
                }
            }
            .boxed()
        })
    }

    fn release_handles(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        let released = handles.len();
        for handle in handles {
            handle.unsubscribe();
        }
        debug!(component = %self.name, released, "Transport subscriptions released");
    }

    fn connect(&self) -> Result<(), DispatchError> {
        let callback = self.callback();
        let mut acquired = Vec::new();
        for key in self.dispatcher.router.keys() {
            match self
                .transport
                .subscribe(key.message_type, key.topic.clone(), callback.clone())
            {
                Ok(handle) => acquired.push(handle),
                Err(e) => {
                    for handle in acquired {
                        handle.unsubscribe();
                    }
                    return Err(DispatchError::Transport(e));
                }
            }
        }
        info!(component = %self.name, subscriptions = acquired.len(), "Connected to transport");
        *self.handles.lock() = acquired;
        Ok(())
    }

    fn queue(&self) -> Option<&SubscribeQueue> {
        match &self.inbox {
            Inbox::Queued(queue) => Some(queue.as_ref()),
            Inbox::Direct(_) => None,
        }
    }

    async fn disconnect(&self) -> Result<(), DispatchError> {
        self.dispatcher.token().cancel();
        self.release_handles();
        match self.queue() {
            Some(queue) => queue.stop().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WorkerHooks for SubscriberCore {
    async fn on_start(&self) -> Result<(), DispatchError> {
        *self.dispatcher.cancel.lock() = CancellationToken::new();
        if let Some(queue) = self.queue() {
            queue.start().await?;
        }
        if let Err(e) = self.connect() {
            if let Some(queue) = self.queue() {
                if let Err(rollback) = queue.stop().await {
                    warn!(component = %self.name, error = %rollback, "Inbox rollback failed");
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn on_pause(&self) -> Result<(), DispatchError> {
        match self.queue() {
            Some(queue) => queue.pause().await,
            None => Err(DispatchError::Unsupported { operation: "pause" }),
        }
    }

    async fn on_resume(&self) -> Result<(), DispatchError> {
        match self.queue() {
            Some(queue) => queue.resume().await,
            None => Err(DispatchError::Unsupported {
                operation: "resume",
            }),
        }
    }

    async fn on_stop(&self) -> Result<(), DispatchError> {
        self.disconnect().await
    }

    /// Runs every teardown step even if an earlier one fails.
    async fn on_dispose(&self, from: WorkerState) -> Result<(), DispatchError> {
        let mut first_error = None;
        if from.is_live() {
            keep_first(&mut first_error, self.disconnect().await);
        }
        if let Some(queue) = self.queue() {
            keep_first(&mut first_error, queue.dispose().await);
        }
        self.dispatcher.router.clear();
        first_error.map_or(Ok(()), Err)
    }
}

/// Consumer-side component: handler registration plus transport wiring.
///
/// ```rust,ignore
/// let subscriber = MessageSubscriber::new(options, transport, factory, faults);
/// subscriber.subscribe::<AuditOrders>(None)?;
/// subscriber.start().await?;
/// // ... deliveries arrive through the transport ...
/// subscriber.stop().await?;
/// ```
pub struct MessageSubscriber {
    lifecycle: WorkerLifecycle,
    core: SubscriberCore,
}

impl MessageSubscriber {
    pub fn new(
        options: SubscriberOptions,
        transport: Arc<dyn TransportSubscriber>,
        factory: Arc<dyn HandlerContextFactory>,
        faults: Arc<dyn FaultSink>,
    ) -> Self {
        let queued = options.delivery == DeliveryMode::Queued;
        let lifecycle = WorkerLifecycle::new(
            options.name.clone(),
            queued && options.pause_supported,
        );
        let router = DispatchRouter::new(
            options.name.clone(),
            lifecycle.watch(),
            factory,
            faults.clone(),
        );
        let dispatcher = Arc::new(Dispatcher {
            router,
            cancel: Mutex::new(CancellationToken::new()),
        });
        let inbox = if queued {
            let queue_options = QueueOptions::new(format!("{}.inbox", options.name))
                .with_poll_interval(options.poll_interval)
                .with_pause_supported(options.pause_supported);
            Inbox::Queued(Arc::new(feeder_queue(
                queue_options,
                dispatcher.clone(),
                faults,
            )))
        } else {
            Inbox::Direct(dispatcher.clone())
        };

        Self {
            lifecycle,
            core: SubscriberCore {
                name: options.name,
                dispatcher,
                inbox,
                transport,
                handles: Mutex::new(Vec::new()),
            },
        }
    }

    pub fn name(&self) -> &str {
        self.lifecycle.name()
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        match self.core.inbox {
            Inbox::Direct(_) => DeliveryMode::Direct,
            Inbox::Queued(_) => DeliveryMode::Queued,
        }
    }

    /// Deliveries queued and not yet dispatched. Always 0 in direct mode.
    pub fn backlog(&self) -> usize {
        self.core.queue().map_or(0, SubscribeQueue::backlog)
    }

    pub fn router(&self) -> &DispatchRouter {
        &self.core.dispatcher.router
    }

    /// Subscribes handler `H` under `topic`. Only while `NotStarted` or `Stopped`.
    pub fn subscribe<H: Handler>(&self, topic: Option<&str>) -> Result<(), DispatchError> {
        self.router().subscribe::<H>(topic)
    }

    pub fn unsubscribe<H: Handler>(&self) -> Result<usize, DispatchError> {
        self.router().unsubscribe::<H>()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.router().subscriptions()
    }

    /// Hands an envelope to this subscriber as if the transport had delivered it.
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), DispatchError> {
        let state = self.state();
        if !state.is_live() {
            return Err(DispatchError::invalid_state("deliver", state));
        }
        self.core.inbox.deliver(envelope).await
    }

    /// Dispatches `message` inline, bypassing the transport and the queue.
    pub async fn dispatch<M: Message>(
        &self,
        message: M,
        topic: Option<&str>,
    ) -> Result<(), DispatchError> {
        let topic = Topic::parse(topic)?;
        let state = self.state();
        if state != WorkerState::Running {
            return Err(DispatchError::invalid_state("dispatch", state));
        }
        self.core
            .dispatcher
            .dispatch(&Envelope::new(message, topic))
            .await;
        Ok(())
    }

    pub async fn start(&self) -> Result<(), DispatchError> {
        self.lifecycle.start(&self.core).await
    }

    pub async fn pause(&self) -> Result<(), DispatchError> {
        self.lifecycle.pause(&self.core).await
    }

    pub async fn resume(&self) -> Result<(), DispatchError> {
        self.lifecycle.resume(&self.core).await
    }

    pub async fn stop(&self) -> Result<(), DispatchError> {
        self.lifecycle.stop(&self.core).await
    }

    pub async fn dispose(&self) -> Result<(), DispatchError> {
        self.lifecycle.dispose(&self.core).await
    }
}
