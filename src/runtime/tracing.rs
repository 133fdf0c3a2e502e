//! # Observability & Tracing
//!
//! Every component logs through `tracing` with a `component` field carrying
//! its display name. Handler and queue events add `message_type` and
//! `handler` fields where they apply.
//!
//! ## Levels
//!
//! - `info`: lifecycle transitions, subscriptions, transport connect
//! - `debug`: each handled message, worker start/exit
//! - `trace`: enqueue, control requests, forwarding
//! - `warn`: failed handlers and work items, failed transitions
//! - `error`: faults written by [`TracingFaultSink`](crate::framework::TracingFaultSink)
//!
//! ## Usage Examples
//!
//! ```bash
//! # Lifecycle only
//! RUST_LOG=info cargo test
//!
//! # Every dispatched message
//! RUST_LOG=dispatch_recipe=debug cargo test
//!
//! # Queue internals
//! RUST_LOG=dispatch_recipe::framework::queue=trace cargo test
//! ```
//!
//! With `RUST_LOG=debug` a publish/dispatch round trip reads:
//!
//! ```text
//! INFO start from=not_started to=running component="orders.subscriber.inbox"
//! INFO Connected to transport component="orders.subscriber" subscriptions=1
//! DEBUG publish component="orders.publisher" message=OrderPlaced { id: 7 }
//! DEBUG Handled component="orders.subscriber" handler=AuditOrders message_type=OrderPlaced
//! ```

/// Installs a compact fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once: later calls leave the first subscriber in
/// place.
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}
