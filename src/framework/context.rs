//! # Invocation Contexts
//!
//! Every handler invocation runs inside its own [`InvocationContext`], created
//! by an injected [`HandlerContextFactory`]. The context is the place where a
//! host plugs in its own scoping: a database transaction, a DI scope, a
//! tracing span, and so on.
//!
//! The router drives a context through a fixed sequence:
//!
//! ```text
//! create_context ─► begin ─► resolve(handler) ─► handle ─► end ─► dispose
//!                      │            │               │        │       ▲
//!                      └────────────┴───── error ───┴────────┴───────┘
//! ```
//!
//! `dispose` runs exactly once on every path that created a context.
//!
//! [`HandlerProvider`] is the plain factory: it builds handlers from
//! registered constructors and its begin/end/dispose do nothing.

use crate::framework::error::{BoxError, DispatchError};
use crate::framework::handler::HandlerType;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// A resolved handler instance.
pub type HandlerInstance = Arc<dyn Any + Send + Sync>;

/// Scope for a single handler invocation.
#[async_trait]
pub trait InvocationContext: Send {
    async fn begin(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Produces the handler instance for this invocation.
    fn resolve(&mut self, handler: &HandlerType) -> Result<HandlerInstance, BoxError>;

    async fn end(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Releases the scope. Called once, after success or failure.
    async fn dispose(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Creates one [`InvocationContext`] per handler invocation.
pub trait HandlerContextFactory: Send + Sync {
    fn create_context(&self) -> Result<Box<dyn InvocationContext>, BoxError>;
}

type Constructor = Arc<dyn Fn() -> HandlerInstance + Send + Sync>;

/// Resolves handlers from registered constructors.
///
/// Cloning shares the registrations.
#[derive(Clone, Default)]
pub struct HandlerProvider {
    constructors: Arc<RwLock<HashMap<TypeId, Constructor>>>,
}

impl HandlerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor that builds a fresh `H` for every invocation.
    pub fn register<H, F>(&self, make: F) -> &Self
    where
        H: Send + Sync + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(move || Arc::new(make()) as HandlerInstance);
        self.constructors
            .write()
            .insert(TypeId::of::<H>(), constructor);
        self
    }

    /// Registers one shared `H` returned for every invocation.
    pub fn register_shared<H>(&self, instance: Arc<H>) -> &Self
    where
        H: Send + Sync + 'static,
    {
        let constructor: Constructor = Arc::new(move || instance.clone() as HandlerInstance);
        self.constructors
            .write()
            .insert(TypeId::of::<H>(), constructor);
        self
    }

    pub fn contains(&self, handler: &HandlerType) -> bool {
        self.constructors.read().contains_key(&handler.id())
    }

    pub(crate) fn construct(&self, handler: &HandlerType) -> Result<HandlerInstance, BoxError> {
        let constructor = self
            .constructors
            .read()
            .get(&handler.id())
            .cloned()
            .ok_or_else(|| {
                DispatchError::InvalidArgument(format!(
                    "no constructor registered for handler {handler}"
                ))
            })?;
        Ok(constructor())
    }
}

impl std::fmt::Debug for HandlerProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerProvider")
            .field("registered", &self.constructors.read().len())
            .finish()
    }
}

struct ProviderContext {
    provider: HandlerProvider,
}

#[async_trait]
impl InvocationContext for ProviderContext {
    fn resolve(&mut self, handler: &HandlerType) -> Result<HandlerInstance, BoxError> {
        self.provider.construct(handler)
    }
}

impl HandlerContextFactory for HandlerProvider {
    fn create_context(&self) -> Result<Box<dyn InvocationContext>, BoxError> {
        Ok(Box::new(ProviderContext {
            provider: self.clone(),
        }))
    }
}
