#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Dispatch Recipe
//!
//! > **A Recipe for transport-agnostic message dispatch in Rust.**
//!
//! This crate lets producers enqueue messages for asynchronous delivery and
//! lets consumers register typed handlers that run when matching messages
//! arrive. Both sides share one start/pause/resume/stop/dispose lifecycle.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Why queues + routers?
//!
//! The runtime is split into three small engines:
//! - **WorkerLifecycle**: one legal order of state transitions, serialized per component.
//! - **QueueEngine**: one background task per queue, draining items in order.
//! - **DispatchRouter**: `(message type, topic)` → ordered handlers, one scope per invocation.
//!
//! A publisher is a queue that drains into a transport. A subscriber is a
//! router, optionally behind a queue, that the transport drains into.
//!
//! ## 🚀 Core Concepts
//!
//! ### Handlers declare what they handle
//! Rust can't list a type's trait impls at runtime, so a handler declares its
//! shape through [`Handler::declare`](framework::Handler::declare). Subscribe
//! checks that declaration once; dispatch only performs `Any` downcasts.
//!
//! ### Failures are isolated
//! A failing or panicking handler is reported to a [`FaultSink`](framework::FaultSink)
//! and the next handler still runs. A failing work item never stops its queue.
//!
//! ### Mocking
//! Contexts, fault sinks and transports are all injected. See the
//! [`framework::mock`] module for recording doubles.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Type-Safe Error Handling
//! Everything returns [`DispatchError`](framework::DispatchError), a `thiserror`
//! enum with a stable `as_label()` per variant.
//!
//! ### 2. Control Handshake
//! `pause`/`resume`/`stop` send a request to the worker task over `mpsc` with a
//! `oneshot` sender to acknowledge it. When the call returns, the worker has
//! applied it.
//!
//! ### 3. Concurrency Model
//! One worker task per running queue. Enqueue takes a short data lock; no lock
//! is held while user code runs.
//!
//! ### 4. Observability
//! We use `tracing` everywhere with a `component` field on every event.
//! See the [`runtime::tracing`] module for details.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Engine ([`framework`])
//! - **Role**: lifecycle, queue, router, handler model, faults.
//! - **Key items**: [`QueueEngine`](framework::QueueEngine), [`DispatchRouter`](framework::DispatchRouter).
//!
//! ### 2. The Edges ([`transport`])
//! - **Role**: the transport seam and the components built on it.
//! - **Key items**: [`MessagePublisher`](transport::MessagePublisher), [`MessageSubscriber`](transport::MessageSubscriber), [`InMemoryTransport`](transport::InMemoryTransport).
//!
//! ### 3. The Orchestrator ([`runtime`])
//! - **Role**: configuration, local wiring and tracing setup.
//! - **Key items**: [`DispatchConfig`](runtime::DispatchConfig), [`LocalSystem`](runtime::LocalSystem).
//!
//! ### Running Tests
//!
//! ```bash
//! RUST_LOG=info cargo test
//! ```

pub mod framework;
pub mod runtime;
pub mod transport;
