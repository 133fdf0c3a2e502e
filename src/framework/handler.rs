//! # Handlers
//!
//! A handler is a type that implements [`MessageHandler<M>`] (synchronous) or
//! [`AsyncMessageHandler<M>`] (asynchronous) for one message type, and
//! declares that capability through [`Handler::declare`].
//!
//! ## Why a declaration?
//!
//! A Rust type may implement `MessageHandler<A>` *and* `MessageHandler<B>`, and
//! the compiler can't enumerate those impls at runtime. Instead each handler
//! lists the shapes it implements, and subscription checks that list once:
//! exactly one shape is accepted, zero or several are rejected with
//! [`DispatchError::InvalidArgument`]. The result is a [`HandlerDescriptor`]
//! carrying a monomorphized invoker, so the dispatch path only performs two
//! `Any` downcasts.
//!
//! ```rust
//! use dispatch_recipe::framework::{BoxError, Handler, HandlerDescriptor, HandlerShapes, MessageHandler};
//!
//! #[derive(Debug)]
//! struct OrderPlaced { id: u32 }
//!
//! struct AuditOrders;
//!
//! impl MessageHandler<OrderPlaced> for AuditOrders {
//!     fn handle(&self, message: &OrderPlaced) -> Result<(), BoxError> {
//!         println!("order {} placed", message.id);
//!         Ok(())
//!     }
//! }
//!
//! impl Handler for AuditOrders {
//!     fn declare(shapes: &mut HandlerShapes<Self>) {
//!         shapes.handles::<OrderPlaced>();
//!     }
//! }
//!
//! let descriptor = HandlerDescriptor::of::<AuditOrders>().unwrap();
//! assert_eq!(descriptor.message_type().short_name(), "OrderPlaced");
//! ```

use crate::framework::error::{BoxError, DispatchError};
use crate::framework::message::{short_type_name, Message, MessageType};
use async_trait::async_trait;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Synchronous handler for messages of type `M`.
pub trait MessageHandler<M: Message>: Send + Sync + 'static {
    fn handle(&self, message: &M) -> Result<(), BoxError>;
}

/// Asynchronous handler for messages of type `M`.
///
/// `cancel` fires when the owning subscriber stops or is disposed. A handler
/// that gives up because of it should return [`DispatchError::Cancelled`].
#[async_trait]
pub trait AsyncMessageHandler<M: Message>: Send + Sync + 'static {
    async fn handle_async(&self, message: &M, cancel: &CancellationToken) -> Result<(), BoxError>;
}

/// Declares which handler shapes a type implements.
pub trait Handler: Send + Sync + 'static {
    fn declare(shapes: &mut HandlerShapes<Self>)
    where
        Self: Sized;
}

/// Runtime identity of a handler type. Equality uses the [`TypeId`] only.
#[derive(Clone, Copy)]
pub struct HandlerType {
    id: TypeId,
    name: &'static str,
}

impl HandlerType {
    pub fn of<H: 'static>() -> Self {
        Self {
            id: TypeId::of::<H>(),
            name: type_name::<H>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

impl PartialEq for HandlerType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HandlerType {}

impl Hash for HandlerType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerType({})", self.short_name())
    }
}

impl fmt::Display for HandlerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    Sync,
    Async,
}

/// Type-erased call into a concrete handler.
#[async_trait]
pub(crate) trait Invoke: Send + Sync {
    async fn invoke(
        &self,
        instance: &(dyn Any + Send + Sync),
        message: &(dyn Any + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<(), BoxError>;
}

fn downcast<'a, T: 'static>(
    value: &'a (dyn Any + Send + Sync),
    what: &str,
) -> Result<&'a T, BoxError> {
    value.downcast_ref::<T>().ok_or_else(|| {
        DispatchError::InvalidArgument(format!("{what} is not a {}", type_name::<T>())).into()
    })
}

struct SyncInvoker<H, M>(PhantomData<fn() -> (H, M)>);

#[async_trait]
impl<H, M> Invoke for SyncInvoker<H, M>
where
    H: MessageHandler<M>,
    M: Message,
{
    async fn invoke(
        &self,
        instance: &(dyn Any + Send + Sync),
        message: &(dyn Any + Send + Sync),
        _cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        let handler = downcast::<H>(instance, "resolved handler")?;
        let message = downcast::<M>(message, "message")?;
        MessageHandler::<M>::handle(handler, message)
    }
}

struct AsyncInvoker<H, M>(PhantomData<fn() -> (H, M)>);

#[async_trait]
impl<H, M> Invoke for AsyncInvoker<H, M>
where
    H: AsyncMessageHandler<M>,
    M: Message,
{
    async fn invoke(
        &self,
        instance: &(dyn Any + Send + Sync),
        message: &(dyn Any + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        let handler = downcast::<H>(instance, "resolved handler")?;
        let message = downcast::<M>(message, "message")?;
        AsyncMessageHandler::<M>::handle_async(handler, message, cancel).await
    }
}

struct HandlerShape {
    message_type: MessageType,
    mode: HandlerMode,
    invoker: Arc<dyn Invoke>,
}

/// Collects the shapes a handler declares in [`Handler::declare`].
pub struct HandlerShapes<H> {
    shapes: Vec<HandlerShape>,
    _handler: PhantomData<fn() -> H>,
}

impl<H: Handler> HandlerShapes<H> {
    fn new() -> Self {
        Self {
            shapes: Vec::new(),
            _handler: PhantomData,
        }
    }

    /// Declares `H: MessageHandler<M>`.
    pub fn handles<M: Message>(&mut self) -> &mut Self
    where
        H: MessageHandler<M>,
    {
        self.shapes.push(HandlerShape {
            message_type: MessageType::of::<M>(),
            mode: HandlerMode::Sync,
            invoker: Arc::new(SyncInvoker::<H, M>(PhantomData)),
        });
        self
    }

    /// Declares `H: AsyncMessageHandler<M>`.
    pub fn handles_async<M: Message>(&mut self) -> &mut Self
    where
        H: AsyncMessageHandler<M>,
    {
        self.shapes.push(HandlerShape {
            message_type: MessageType::of::<M>(),
            mode: HandlerMode::Async,
            invoker: Arc::new(AsyncInvoker::<H, M>(PhantomData)),
        });
        self
    }
}

/// A validated handler registration: handler type, message type and mode.
#[derive(Clone)]
pub struct HandlerDescriptor {
    handler_type: HandlerType,
    message_type: MessageType,
    mode: HandlerMode,
    invoker: Arc<dyn Invoke>,
}

impl HandlerDescriptor {
    /// Validates `H`'s declared shapes and builds its descriptor.
    pub fn of<H: Handler>() -> Result<Self, DispatchError> {
        let handler_type = HandlerType::of::<H>();
        let mut shapes = HandlerShapes::<H>::new();
        H::declare(&mut shapes);

        let mut shapes = shapes.shapes;
        match shapes.len() {
            1 => {
                let shape = shapes.remove(0);
                Ok(Self {
                    handler_type,
                    message_type: shape.message_type,
                    mode: shape.mode,
                    invoker: shape.invoker,
                })
            }
            0 => Err(DispatchError::InvalidArgument(format!(
                "handler {handler_type} declares no handler interface"
            ))),
            n => Err(DispatchError::InvalidArgument(format!(
                "handler {handler_type} declares {n} handler interfaces; exactly one is required"
            ))),
        }
    }

    pub fn handler_type(&self) -> HandlerType {
        self.handler_type
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn mode(&self) -> HandlerMode {
        self.mode
    }

    pub(crate) async fn invoke(
        &self,
        instance: &(dyn Any + Send + Sync),
        message: &(dyn Any + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        self.invoker.invoke(instance, message, cancel).await
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("handler_type", &self.handler_type)
            .field("message_type", &self.message_type)
            .field("mode", &self.mode)
            .finish()
    }
}
