//! Dispatch framework: queues, lifecycles and handler routing.
//!
//! This module provides the building blocks every component is made of. It
//! knows nothing about transports; see [`crate::transport`] for those.
//!
//! # Main Components
//!
//! - [`WorkerLifecycle`] - State machine shared by every long-running component
//! - [`QueueEngine`] - FIFO queue drained by one worker task
//! - [`DispatchRouter`] - Bundle table and per-handler invocation scopes
//! - [`Handler`] / [`MessageHandler`] / [`AsyncMessageHandler`] - What users implement
//! - [`HandlerContextFactory`] - Seam for scoped handler resolution
//! - [`FaultSink`] - Where caught failures go
//! - [`DispatchError`] - Common error type
//!
//! # Testing
//!
//! See [`mock`] module for recording sinks and failure-injecting contexts.

pub mod context;
pub mod error;
pub mod fault;
pub mod handler;
pub mod lifecycle;
pub mod message;
pub mod mock;
pub mod queue;
pub mod router;
pub mod state;

pub use context::{HandlerContextFactory, HandlerInstance, HandlerProvider, InvocationContext};
pub use error::{BoxError, DispatchError, DispatchStage, PanicError};
pub use fault::{Fault, FaultSink, TracingFaultSink};
pub use handler::{
    AsyncMessageHandler, Handler, HandlerDescriptor, HandlerMode, HandlerShapes, HandlerType,
    MessageHandler,
};
pub use lifecycle::{WorkerHooks, WorkerLifecycle};
pub use message::{Envelope, Message, MessageType, Topic};
pub use queue::{QueueEngine, QueueOptions, WorkProcessor, DEFAULT_POLL_INTERVAL};
pub use router::{BundleKey, DispatchRouter, SubscriptionInfo};
pub use state::WorkerState;
