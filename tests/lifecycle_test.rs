use async_trait::async_trait;
use dispatch_recipe::framework::{DispatchError, WorkerHooks, WorkerLifecycle, WorkerState};
use parking_lot::Mutex;
use std::sync::Arc;

/// Hooks that record every call and can be told to fail one of them.
#[derive(Default)]
struct RecordingHooks {
    calls: Mutex<Vec<&'static str>>,
    fail: Mutex<Option<&'static str>>,
}

impl RecordingHooks {
    fn call(&self, name: &'static str) -> Result<(), DispatchError> {
        self.calls.lock().push(name);
        if *self.fail.lock() == Some(name) {
            return Err(DispatchError::InvalidArgument(format!("{name} refused")));
        }
        Ok(())
    }

    fn fail_on(&self, name: &'static str) {
        *self.fail.lock() = Some(name);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WorkerHooks for RecordingHooks {
    async fn on_start(&self) -> Result<(), DispatchError> {
        self.call("start")
    }

    async fn on_pause(&self) -> Result<(), DispatchError> {
        self.call("pause")
    }

    async fn on_resume(&self) -> Result<(), DispatchError> {
        self.call("resume")
    }

    async fn on_stop(&self) -> Result<(), DispatchError> {
        self.call("stop")
    }

    async fn on_dispose(&self, _from: WorkerState) -> Result<(), DispatchError> {
        self.call("dispose")
    }
}

fn assert_invalid_state(result: Result<(), DispatchError>, expected: WorkerState) {
    match result {
        Err(DispatchError::InvalidState { state, .. }) => assert_eq!(state, expected),
        other => panic!("expected InvalidState({expected}), got {other:?}"),
    }
}

#[tokio::test]
async fn test_full_legal_sequence() {
    let lifecycle = WorkerLifecycle::new("worker", true);
    let hooks = RecordingHooks::default();
    assert_eq!(lifecycle.state(), WorkerState::NotStarted);

    lifecycle.start(&hooks).await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Running);

    lifecycle.pause(&hooks).await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Paused);

    lifecycle.resume(&hooks).await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Running);

    lifecycle.stop(&hooks).await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Stopped);

    // Stopped is a valid entry point again
    lifecycle.start(&hooks).await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Running);

    lifecycle.pause(&hooks).await.unwrap();
    lifecycle.stop(&hooks).await.unwrap();
    lifecycle.dispose(&hooks).await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Disposed);

    assert_eq!(
        hooks.calls(),
        vec!["start", "pause", "resume", "stop", "start", "pause", "stop", "dispose"]
    );
}

#[tokio::test]
async fn test_illegal_transitions_leave_state_unchanged() {
    let lifecycle = WorkerLifecycle::new("worker", true);
    let hooks = RecordingHooks::default();

    assert_invalid_state(lifecycle.pause(&hooks).await, WorkerState::NotStarted);
    assert_invalid_state(lifecycle.resume(&hooks).await, WorkerState::NotStarted);
    assert_invalid_state(lifecycle.stop(&hooks).await, WorkerState::NotStarted);
    assert_eq!(lifecycle.state(), WorkerState::NotStarted);

    lifecycle.start(&hooks).await.unwrap();
    assert_invalid_state(lifecycle.start(&hooks).await, WorkerState::Running);
    assert_invalid_state(lifecycle.resume(&hooks).await, WorkerState::Running);
    assert_eq!(lifecycle.state(), WorkerState::Running);

    lifecycle.pause(&hooks).await.unwrap();
    assert_invalid_state(lifecycle.pause(&hooks).await, WorkerState::Paused);
    assert_invalid_state(lifecycle.start(&hooks).await, WorkerState::Paused);
    assert_eq!(lifecycle.state(), WorkerState::Paused);

    lifecycle.stop(&hooks).await.unwrap();
    assert_invalid_state(lifecycle.stop(&hooks).await, WorkerState::Stopped);
    assert_invalid_state(lifecycle.pause(&hooks).await, WorkerState::Stopped);

    // Only the legal calls reached the hooks
    assert_eq!(hooks.calls(), vec!["start", "pause", "stop"]);
}

#[tokio::test]
async fn test_disposed_is_terminal() {
    let lifecycle = WorkerLifecycle::new("worker", true);
    let hooks = RecordingHooks::default();

    lifecycle.dispose(&hooks).await.unwrap();
    assert_eq!(lifecycle.state(), WorkerState::Disposed);

    assert_invalid_state(lifecycle.dispose(&hooks).await, WorkerState::Disposed);
    assert_invalid_state(lifecycle.start(&hooks).await, WorkerState::Disposed);
    assert_invalid_state(lifecycle.stop(&hooks).await, WorkerState::Disposed);
    assert_eq!(hooks.calls(), vec!["dispose"]);
}

#[tokio::test]
async fn test_pause_unsupported() {
    let lifecycle = WorkerLifecycle::new("no-pause", false);
    let hooks = RecordingHooks::default();
    lifecycle.start(&hooks).await.unwrap();

    let err = lifecycle.pause(&hooks).await.unwrap_err();
    assert!(matches!(err, DispatchError::Unsupported { operation: "pause" }));
    assert_eq!(err.as_label(), "unsupported");

    let err = lifecycle.resume(&hooks).await.unwrap_err();
    assert!(matches!(err, DispatchError::Unsupported { .. }));
    assert_eq!(lifecycle.state(), WorkerState::Running);
}

#[tokio::test]
async fn test_failed_hook_rolls_back() {
    let lifecycle = WorkerLifecycle::new("worker", true);
    let hooks = RecordingHooks::default();

    hooks.fail_on("start");
    let err = lifecycle.start(&hooks).await.unwrap_err();
    assert_eq!(err.as_label(), "invalid_argument");
    assert_eq!(lifecycle.state(), WorkerState::NotStarted);

    *hooks.fail.lock() = None;
    lifecycle.start(&hooks).await.unwrap();

    hooks.fail_on("stop");
    assert!(lifecycle.stop(&hooks).await.is_err());
    assert_eq!(lifecycle.state(), WorkerState::Running);
}

#[tokio::test]
async fn test_dispose_with_failing_hook_still_disposes() {
    let lifecycle = WorkerLifecycle::new("worker", true);
    let hooks = RecordingHooks::default();
    lifecycle.start(&hooks).await.unwrap();

    hooks.fail_on("dispose");
    assert!(lifecycle.dispose(&hooks).await.is_err());
    assert_eq!(lifecycle.state(), WorkerState::Disposed);
}

#[tokio::test]
async fn test_watch_observes_transitions() {
    let lifecycle = WorkerLifecycle::new("worker", true);
    let hooks = RecordingHooks::default();
    let watcher = lifecycle.watch();

    lifecycle.start(&hooks).await.unwrap();
    assert_eq!(*watcher.borrow(), WorkerState::Running);

    lifecycle.stop(&hooks).await.unwrap();
    assert_eq!(*watcher.borrow(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_concurrent_starts_only_one_wins() {
    let lifecycle = Arc::new(WorkerLifecycle::new("worker", true));
    let hooks = Arc::new(RecordingHooks::default());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let lifecycle = lifecycle.clone();
        let hooks = hooks.clone();
        tasks.push(tokio::spawn(async move {
            lifecycle.start(hooks.as_ref()).await.is_ok()
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap() {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(hooks.calls(), vec!["start"]);
    assert_eq!(lifecycle.state(), WorkerState::Running);
}

#[test]
fn test_state_helpers() {
    assert!(WorkerState::NotStarted.is_idle());
    assert!(WorkerState::Stopped.is_idle());
    assert!(!WorkerState::Running.is_idle());
    assert!(WorkerState::Paused.is_live());
    assert!(WorkerState::Resuming.is_live());
    assert!(!WorkerState::Stopping.is_live());
    assert!(WorkerState::Disposed.is_terminal());
    assert_eq!(WorkerState::NotStarted.to_string(), "not_started");
}
