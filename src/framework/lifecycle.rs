//! # Worker Lifecycle
//!
//! This module defines [`WorkerLifecycle`], the state machine embedded in every
//! long-running component (queues, publishers, subscribers).
//!
//! ## Transitions
//!
//! ```text
//!  NotStarted ─┐
//!              ├─ start ──► Starting ──► Running ─ pause ──► Pausing ──► Paused
//!  Stopped ────┘                          ▲   │                            │
//!                                         │   └── stop ──► Stopping ──► Stopped
//!                                         │                  ▲             │
//!                                         └── Resuming ◄─ resume ──────────┘
//!
//!  any state except Disposed ── dispose ──► Disposed (terminal)
//! ```
//!
//! The component supplies the work of each transition through [`WorkerHooks`].
//! The lifecycle only decides *whether* a transition may run and records the
//! outcome.
//!
//! ## Concurrency
//!
//! Transitions are serialized by one async lock per instance, held across the
//! hook. State reads go through a `watch` cell and never wait for a running
//! transition; readers see either the transitional state (`Starting`,
//! `Pausing`, …) or the final one.

use crate::framework::error::DispatchError;
use crate::framework::state::WorkerState;
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// The work a component performs for each lifecycle transition.
///
/// All hooks default to doing nothing.
#[async_trait]
pub trait WorkerHooks: Send + Sync {
    async fn on_start(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn on_pause(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn on_resume(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), DispatchError> {
        Ok(())
    }

    /// Called with the state the component was in when `dispose` was requested.
    async fn on_dispose(&self, _from: WorkerState) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Enforces the legal order of lifecycle transitions for one component.
///
/// A transition that is illegal for the current state fails with
/// [`DispatchError::InvalidState`] and leaves the state untouched. If a hook
/// fails, the state is rolled back to what it was before the call. The one
/// exception is `dispose`, which always ends in `Disposed`.
pub struct WorkerLifecycle {
    name: String,
    pause_supported: bool,
    transition: Mutex<()>,
    state: watch::Sender<WorkerState>,
}

impl WorkerLifecycle {
    pub fn new(name: impl Into<String>, pause_supported: bool) -> Self {
        let (state, _) = watch::channel(WorkerState::NotStarted);
        Self {
            name: name.into(),
            pause_supported,
            transition: Mutex::new(()),
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pause_supported(&self) -> bool {
        self.pause_supported
    }

    /// Current state. Never blocks on an in-progress transition.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change of this component.
    pub fn watch(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub async fn start<H: WorkerHooks + ?Sized>(&self, hooks: &H) -> Result<(), DispatchError> {
        self.run_transition(
            "start",
            |s| s.is_idle(),
            WorkerState::Starting,
            WorkerState::Running,
            || hooks.on_start(),
        )
        .await
    }

    pub async fn pause<H: WorkerHooks + ?Sized>(&self, hooks: &H) -> Result<(), DispatchError> {
        if !self.pause_supported {
            return Err(DispatchError::Unsupported { operation: "pause" });
        }
        self.run_transition(
            "pause",
            |s| s == WorkerState::Running,
            WorkerState::Pausing,
            WorkerState::Paused,
            || hooks.on_pause(),
        )
        .await
    }

    pub async fn resume<H: WorkerHooks + ?Sized>(&self, hooks: &H) -> Result<(), DispatchError> {
        if !self.pause_supported {
            return Err(DispatchError::Unsupported {
                operation: "resume",
            });
        }
        self.run_transition(
            "resume",
            |s| s == WorkerState::Paused,
            WorkerState::Resuming,
            WorkerState::Running,
            || hooks.on_resume(),
        )
        .await
    }

    pub async fn stop<H: WorkerHooks + ?Sized>(&self, hooks: &H) -> Result<(), DispatchError> {
        self.run_transition(
            "stop",
            |s| matches!(s, WorkerState::Running | WorkerState::Paused),
            WorkerState::Stopping,
            WorkerState::Stopped,
            || hooks.on_stop(),
        )
        .await
    }

    /// Disposes the component. Legal from every state except `Disposed`.
    ///
    /// The state becomes `Disposed` even if the hook fails; the hook's error
    /// is still returned.
    pub async fn dispose<H: WorkerHooks + ?Sized>(&self, hooks: &H) -> Result<(), DispatchError> {
        let _guard = self.transition.lock().await;
        let before = self.state();
        if before.is_terminal() {
            return Err(DispatchError::invalid_state("dispose", before));
        }

        let result = hooks.on_dispose(before).await;
        self.state.send_replace(WorkerState::Disposed);
        match &result {
            Ok(()) => info!(component = %self.name, from = %before, "Disposed"),
            Err(e) => warn!(component = %self.name, from = %before, error = %e, "Disposed with error"),
        }
        result
    }

    async fn run_transition<F, Fut>(
        &self,
        operation: &'static str,
        legal: fn(WorkerState) -> bool,
        during: WorkerState,
        after: WorkerState,
        hook: F,
    ) -> Result<(), DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), DispatchError>>,
    {
        let _guard = self.transition.lock().await;
        let before = self.state();
        if !legal(before) {
            return Err(DispatchError::invalid_state(operation, before));
        }

        self.state.send_replace(during);
        match hook().await {
            Ok(()) => {
                self.state.send_replace(after);
                info!(component = %self.name, from = %before, to = %after, "{operation}");
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(before);
                warn!(component = %self.name, state = %before, error = %e, "{operation} failed");
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for WorkerLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLifecycle")
            .field("name", &self.name)
            .field("pause_supported", &self.pause_supported)
            .field("state", &self.state())
            .finish()
    }
}
