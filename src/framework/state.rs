//! # Worker States
//!
//! The states every long-running component moves through. See
//! [`WorkerLifecycle`](crate::framework::WorkerLifecycle) for the legal transitions.

use std::fmt;

/// Lifecycle state of a worker component.
///
/// `NotStarted` and `Stopped` are both valid entry points for `start`.
/// `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    NotStarted,
    Starting,
    Running,
    Pausing,
    Paused,
    Resuming,
    Stopping,
    Stopped,
    Disposed,
}

impl WorkerState {
    /// True for the states `start` and `subscribe` accept.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::NotStarted | Self::Stopped)
    }

    /// True while a background worker is alive and accepting work.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::Pausing | Self::Paused | Self::Resuming
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Pausing => write!(f, "pausing"),
            Self::Paused => write!(f, "paused"),
            Self::Resuming => write!(f, "resuming"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Disposed => write!(f, "disposed"),
        }
    }
}
