//! Transport seam and the components built on it.
//!
//! The runtime never speaks a wire protocol itself. A transport is anything
//! that implements [`TransportPublisher`] (outbound) and/or
//! [`TransportSubscriber`] (inbound).
//!
//! # Main Components
//!
//! - [`MessagePublisher`] - enqueues messages; a [`PublishQueue`] forwards them to the transport
//! - [`MessageSubscriber`] - owns the handler table; deliveries go through a [`SubscribeQueue`] or inline
//! - [`InMemoryTransport`] - in-process transport for tests and single-process setups

pub mod memory;
pub mod publisher;
pub mod subscriber;

use crate::framework::{BoxError, Envelope, MessageType, Topic};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

pub use memory::InMemoryTransport;
pub use publisher::{publish_queue, MessagePublisher, PublishQueue, PublisherOptions};
pub use subscriber::{subscribe_queue, DeliveryMode, MessageSubscriber, SubscribeQueue, SubscriberOptions};

/// Future returned by a delivery callback; the transport awaits it.
pub type DeliveryFuture = BoxFuture<'static, ()>;

/// Callback a subscriber registers with the transport.
pub type DeliveryCallback = Arc<dyn Fn(Envelope) -> DeliveryFuture + Send + Sync>;

/// Outbound side of a transport.
#[async_trait]
pub trait TransportPublisher: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> Result<(), BoxError>;
}

/// Handle for one transport registration. Dropping it without calling
/// `unsubscribe` leaves the registration in place.
pub trait SubscriptionHandle: Send + Sync {
    fn unsubscribe(self: Box<Self>);
}

/// Inbound side of a transport.
pub trait TransportSubscriber: Send + Sync {
    /// Registers `callback` for envelopes of `message_type` published with exactly `topic`.
    fn subscribe(
        &self,
        message_type: MessageType,
        topic: Option<Topic>,
        callback: DeliveryCallback,
    ) -> Result<Box<dyn SubscriptionHandle>, BoxError>;
}
