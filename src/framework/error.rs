//! # Dispatch Errors
//!
//! This module defines the error type shared by every component of the runtime.
//!
//! Errors fall into two groups:
//!
//! - **Call-time errors** (`InvalidState`, `Unsupported`, `InvalidArgument`,
//!   `DuplicateSubscription`, `Transport`) are returned directly to the caller.
//! - **Caught errors** (`DispatchFailure`, `ProcessingFailure`) never reach the
//!   producer or the transport. They are reported once through a
//!   [`FaultSink`](crate::framework::FaultSink) and the engine keeps going.

use crate::framework::state::WorkerState;
use std::fmt;

/// Boxed error used at every external seam (handlers, transports, contexts).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The step of a handler invocation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    CreateContext,
    Begin,
    Resolve,
    Handle,
    End,
    Dispose,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateContext => write!(f, "create_context"),
            Self::Begin => write!(f, "begin"),
            Self::Resolve => write!(f, "resolve"),
            Self::Handle => write!(f, "handle"),
            Self::End => write!(f, "end"),
            Self::Dispose => write!(f, "dispose"),
        }
    }
}

/// Errors produced by the dispatch runtime.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: WorkerState,
    },
    #[error("{operation} is not supported by this component")]
    Unsupported { operation: &'static str },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("handler {handler} is already subscribed to {message_type} (topic: {topic})")]
    DuplicateSubscription {
        handler: &'static str,
        message_type: &'static str,
        topic: String,
    },
    #[error("handler {handler} failed at {stage} for {message_type}: {source}")]
    DispatchFailure {
        stage: DispatchStage,
        handler: &'static str,
        message_type: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("{component} failed to process work item: {source}")]
    ProcessingFailure {
        component: String,
        #[source]
        source: BoxError,
    },
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
    #[error("operation cancelled")]
    Cancelled,
}

impl DispatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::InvalidState { .. } => "invalid_state",
            Self::Unsupported { .. } => "unsupported",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::DuplicateSubscription { .. } => "duplicate_subscription",
            Self::DispatchFailure { .. } => "dispatch_failure",
            Self::ProcessingFailure { .. } => "processing_failure",
            Self::Transport(_) => "transport",
            Self::Cancelled => "cancelled",
        }
    }

    pub(crate) fn invalid_state(operation: &'static str, state: WorkerState) -> Self {
        Self::InvalidState { operation, state }
    }
}

/// Keeps the first error of a multi-step teardown; later ones are dropped.
pub(crate) fn keep_first(first: &mut Option<DispatchError>, result: Result<(), DispatchError>) {
    if let Err(e) = result {
        first.get_or_insert(e);
    }
}

/// A panic caught while running user code, carried as an ordinary error.
#[derive(Debug, thiserror::Error)]
#[error("panicked: {0}")]
pub struct PanicError(pub String);

impl PanicError {
    /// Extracts the panic message the same way the default hook prints it.
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let any = &*payload;
        let message = if let Some(msg) = any.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = any.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        Self(message)
    }
}
