//! # Dispatch Router
//!
//! [`DispatchRouter`] owns the subscription table and delivers messages to
//! handlers.
//!
//! ## The bundle table
//!
//! Handlers are grouped into *bundles* keyed by `(MessageType, Option<Topic>)`.
//! A bundle is created on the first subscription for its key. Handlers within
//! a bundle keep their registration order, and a handler type may appear only
//! once per bundle.
//!
//! Subscriptions are startup configuration: the table can only change while
//! the owning component is `NotStarted` or `Stopped`. The owner's state is
//! read under the table lock, so a subscription can't slip in after `start`
//! has read the table.
//!
//! ## Delivery
//!
//! ```text
//! dispatch(envelope)
//!   └─ bundle for (type, topic)?  ── none ──► no-op
//!        └─ for each handler, in order:
//!             create_context ─► begin ─► resolve ─► handle ─► end
//!                                                             └─► dispose (always)
//! ```
//!
//! Every failure, including panics, is reported to the fault sink as
//! [`DispatchError::DispatchFailure`] with the failing stage. The remaining
//! handlers still run, and nothing propagates back to the caller.
//!
//! The table lock is released before any handler runs.

use crate::framework::context::{HandlerContextFactory, InvocationContext};
use crate::framework::error::{BoxError, DispatchError, DispatchStage, PanicError};
use crate::framework::fault::{Fault, FaultSink};
use crate::framework::handler::{Handler, HandlerDescriptor, HandlerType};
use crate::framework::message::{topic_label, Envelope, MessageType, Topic};
use crate::framework::state::WorkerState;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Routing key of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BundleKey {
    pub message_type: MessageType,
    pub topic: Option<Topic>,
}

/// One row of [`DispatchRouter::subscriptions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub message_type: MessageType,
    pub topic: Option<Topic>,
    pub handler_type: HandlerType,
}

struct Bundle {
    seq: u64,
    handlers: Arc<Vec<HandlerDescriptor>>,
}

#[derive(Default)]
struct BundleTable {
    bundles: HashMap<BundleKey, Bundle>,
    next_seq: u64,
}

impl BundleTable {
    fn ordered(&self) -> Vec<(&BundleKey, &Bundle)> {
        let mut rows: Vec<_> = self.bundles.iter().collect();
        rows.sort_by_key(|(_, bundle)| bundle.seq);
        rows
    }
}

/// Routes envelopes to the handlers subscribed to their `(type, topic)` key.
pub struct DispatchRouter {
    name: String,
    owner: watch::Receiver<WorkerState>,
    factory: Arc<dyn HandlerContextFactory>,
    faults: Arc<dyn FaultSink>,
    table: RwLock<BundleTable>,
}

impl DispatchRouter {
    /// Creates a router whose subscription window follows `owner`.
    pub fn new(
        name: impl Into<String>,
        owner: watch::Receiver<WorkerState>,
        factory: Arc<dyn HandlerContextFactory>,
        faults: Arc<dyn FaultSink>,
    ) -> Self {
        Self {
            name: name.into(),
            owner,
            factory,
            faults,
            table: RwLock::new(BundleTable::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_configurable(&self, operation: &'static str) -> Result<(), DispatchError> {
        let state = *self.owner.borrow();
        if state.is_idle() {
            Ok(())
        } else {
            Err(DispatchError::invalid_state(operation, state))
        }
    }

    /// Validates `H` and adds it to the bundle for its message type and `topic`.
    pub fn subscribe<H: Handler>(&self, topic: Option<&str>) -> Result<(), DispatchError> {
        let topic = Topic::parse(topic)?;
        let descriptor = HandlerDescriptor::of::<H>()?;
        self.register(descriptor, topic)
    }

    /// Adds an already validated descriptor.
    pub fn register(
        &self,
        descriptor: HandlerDescriptor,
        topic: Option<Topic>,
    ) -> Result<(), DispatchError> {
        let mut table = self.table.write();
        self.ensure_configurable("subscribe")?;

        let key = BundleKey {
            message_type: descriptor.message_type(),
            topic,
        };
        let seq = table.next_seq;
        let bundle = table.bundles.entry(key.clone()).or_insert_with(|| Bundle {
            seq,
            handlers: Arc::new(Vec::new()),
        });
        if bundle
            .handlers
            .iter()
            .any(|existing| existing.handler_type() == descriptor.handler_type())
        {
            return Err(DispatchError::DuplicateSubscription {
                handler: descriptor.handler_type().short_name(),
                message_type: key.message_type.short_name(),
                topic: topic_label(key.topic.as_ref()),
            });
        }

        info!(
            component = %self.name,
            handler = %descriptor.handler_type(),
            message_type = %key.message_type,
            topic = %topic_label(key.topic.as_ref()),
            mode = ?descriptor.mode(),
            "Subscribed"
        );
        Arc::make_mut(&mut bundle.handlers).push(descriptor);
        if bundle.seq == seq {
            table.next_seq += 1;
        }
        Ok(())
    }

    /// Removes handler `H` from every bundle. Returns how many registrations
    /// were removed; empty bundles are dropped.
    pub fn unsubscribe<H: Handler>(&self) -> Result<usize, DispatchError> {
        self.unregister(HandlerType::of::<H>())
    }

    pub fn unregister(&self, handler_type: HandlerType) -> Result<usize, DispatchError> {
        let mut table = self.table.write();
        self.ensure_configurable("unsubscribe")?;

        let mut removed = 0;
        table.bundles.retain(|_, bundle| {
            let before = bundle.handlers.len();
            Arc::make_mut(&mut bundle.handlers).retain(|d| d.handler_type() != handler_type);
            removed += before - bundle.handlers.len();
            !bundle.handlers.is_empty()
        });
        info!(component = %self.name, handler = %handler_type, removed, "Unsubscribed");
        Ok(removed)
    }

    /// Bundle keys in creation order.
    pub fn keys(&self) -> Vec<BundleKey> {
        self.table
            .read()
            .ordered()
            .into_iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Snapshot of every `(message type, topic, handler)` registration.
    ///
    /// Empty once the owner is disposed.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        if self.owner.borrow().is_terminal() {
            return Vec::new();
        }
        let table = self.table.read();
        table
            .ordered()
            .into_iter()
            .flat_map(|(key, bundle)| {
                bundle.handlers.iter().map(move |d| SubscriptionInfo {
                    message_type: key.message_type,
                    topic: key.topic.clone(),
                    handler_type: d.handler_type(),
                })
            })
            .collect()
    }

    pub(crate) fn clear(&self) {
        let mut table = self.table.write();
        table.bundles.clear();
    }

    /// Delivers `envelope` to every handler of its bundle, in registration order.
    ///
    /// Never fails: handler errors go to the fault sink.
    pub async fn dispatch(&self, envelope: &Envelope, cancel: &CancellationToken) {
        let key = BundleKey {
            message_type: envelope.message_type(),
            topic: envelope.topic().cloned(),
        };
        let handlers = self
            .table
            .read()
            .bundles
            .get(&key)
            .map(|bundle| bundle.handlers.clone());
        let Some(handlers) = handlers else {
            trace!(component = %self.name, message_type = %key.message_type, "No bundle");
            return;
        };

        for descriptor in handlers.iter() {
            self.invoke(descriptor, envelope, cancel).await;
        }
    }

    async fn invoke(
        &self,
        descriptor: &HandlerDescriptor,
        envelope: &Envelope,
        cancel: &CancellationToken,
    ) {
        let mut context = match self.factory.create_context() {
            Ok(context) => context,
            Err(source) => {
                self.report(DispatchStage::CreateContext, descriptor, envelope, source);
                return;
            }
        };

        let mut stage = DispatchStage::Begin;
        let outcome = AssertUnwindSafe(run_scoped(
            context.as_mut(),
            descriptor,
            envelope,
            cancel,
            &mut stage,
        ))
        .catch_unwind()
        .await;
        match outcome {
            Ok(Ok(())) => debug!(
                component = %self.name,
                handler = %descriptor.handler_type(),
                message_type = %envelope.message_type(),
                "Handled"
            ),
            Ok(Err(source)) => self.report(stage, descriptor, envelope, source),
            Err(panic) => self.report(
                stage,
                descriptor,
                envelope,
                Box::new(PanicError::from_payload(panic)),
            ),
        }

        let disposal = AssertUnwindSafe(context.dispose()).catch_unwind().await;
        match disposal {
            Ok(Ok(())) => {}
            Ok(Err(source)) => self.report(DispatchStage::Dispose, descriptor, envelope, source),
            Err(panic) => self.report(
                DispatchStage::Dispose,
                descriptor,
                envelope,
                Box::new(PanicError::from_payload(panic)),
            ),
        }
    }

    fn report(
        &self,
        stage: DispatchStage,
        descriptor: &HandlerDescriptor,
        envelope: &Envelope,
        source: BoxError,
    ) {
        warn!(
            component = %self.name,
            handler = %descriptor.handler_type(),
            message_type = %envelope.message_type(),
            %stage,
            error = %source,
            "Handler failed"
        );
        let fault = Fault::new(
            self.name.clone(),
            DispatchError::DispatchFailure {
                stage,
                handler: descriptor.handler_type().short_name(),
                message_type: envelope.message_type().short_name(),
                source,
            },
        )
        .with_topic(envelope.topic().map(Topic::as_str));
        self.faults.report(fault);
    }
}

/// Runs begin → resolve → handle → end, recording the stage reached.
async fn run_scoped(
    context: &mut dyn InvocationContext,
    descriptor: &HandlerDescriptor,
    envelope: &Envelope,
    cancel: &CancellationToken,
    stage: &mut DispatchStage,
) -> Result<(), BoxError> {
    *stage = DispatchStage::Begin;
    context.begin().await?;

    *stage = DispatchStage::Resolve;
    let instance = context.resolve(&descriptor.handler_type())?;

    *stage = DispatchStage::Handle;
    descriptor
        .invoke(instance.as_ref(), envelope.payload(), cancel)
        .await?;

    *stage = DispatchStage::End;
    context.end().await
}

impl std::fmt::Debug for DispatchRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRouter")
            .field("name", &self.name)
            .field("bundles", &self.table.read().bundles.len())
            .finish()
    }
}
