//! Runtime configuration, wiring and observability.
//!
//! This module contains what a host needs around the framework:
//!
//! - **Configuration**: serde-loadable settings converted into component options
//! - **Wiring**: an in-process publisher/subscriber pair
//! - **Observability setup**: initializing tracing and logging
//!
//! # Main Components
//!
//! - [`DispatchConfig`] - Settings with defaults and validation
//! - [`LocalSystem`] - Publisher and subscriber over an in-memory transport
//! - [`setup_tracing`] - Initializes the tracing/logging infrastructure

pub mod config;
pub mod system;
pub mod tracing;

pub use config::DispatchConfig;
pub use system::LocalSystem;
pub use self::tracing::setup_tracing;
