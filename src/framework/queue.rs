//! # Queue Engine
//!
//! This module defines [`QueueEngine`], a FIFO work queue drained by one
//! background worker task, under the standard [`WorkerLifecycle`].
//!
//! ## Architecture
//!
//! ```text
//!  enqueue() ──► [data lock] VecDeque<T> ──notify──┐
//!  (any task)                                      ▼
//!                                          ┌───────────────┐
//!  pause()/resume()/stop() ── request ───► │  worker task  │ ──► WorkProcessor::process(item)
//!          ▲                               │ (one per run) │            │ error / panic
//!          └──────────── ack (oneshot) ─── └───────────────┘            ▼
//!                                                                 FaultSink::report
//! ```
//!
//! Each loop iteration of the worker:
//!
//! 1. applies a pending control request and acknowledges it;
//! 2. otherwise takes one item and awaits the processor;
//! 3. with nothing queued, waits up to `poll_interval` for data or a request.
//!
//! While paused the worker only listens for control requests, in
//! `poll_interval` slices, and the backlog keeps growing.
//!
//! ## Guarantees
//!
//! - Items are processed one at a time, in enqueue order, by a single task.
//! - A failing or panicking item is reported once as
//!   [`DispatchError::ProcessingFailure`] and the loop moves on.
//! - `stop` does not drain. It waits for at most the in-flight item; pending
//!   items stay queued for the next `start`. `dispose` discards them.
//! - Once `stop` or `dispose` has begun, `enqueue` fails. An item accepted
//!   before that point is never stranded in a disposed queue.
//! - Every control call returns only after the worker has applied it.

use crate::framework::error::{BoxError, DispatchError, PanicError};
use crate::framework::fault::{Fault, FaultSink};
use crate::framework::lifecycle::{WorkerHooks, WorkerLifecycle};
use crate::framework::state::WorkerState;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};

/// Default wait between idle polls of the worker loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The per-item callback run by the worker.
#[async_trait]
pub trait WorkProcessor<T>: Send + Sync + 'static {
    async fn process(&self, item: T) -> Result<(), BoxError>;
}

/// Settings for one queue.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Display name used in logs and fault reports.
    pub name: String,
    pub poll_interval: Duration,
    pub pause_supported: bool,
}

impl QueueOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            pause_supported: true,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_pause_supported(mut self, pause_supported: bool) -> Self {
        self.pause_supported = pause_supported;
        self
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::new("queue")
    }
}

enum Control {
    Pause,
    Resume,
    Stop,
}

struct ControlRequest {
    control: Control,
    respond_to: oneshot::Sender<()>,
}

struct WorkQueue<T> {
    items: VecDeque<T>,
    in_flight: bool,
    /// Open between a successful `start` and the next `stop`/`dispose`.
    accepting: bool,
}

struct Shared<T> {
    name: String,
    poll_interval: Duration,
    queue: Mutex<WorkQueue<T>>,
    signal: Notify,
    processor: Arc<dyn WorkProcessor<T>>,
    faults: Arc<dyn FaultSink>,
}

impl<T: Send + 'static> Shared<T> {
    fn take_next(&self) -> Option<T> {
        let mut queue = self.queue.lock();
        let item = queue.items.pop_front();
        queue.in_flight = item.is_some();
        item
    }

    async fn process(&self, item: T) {
        let outcome = match AssertUnwindSafe(self.processor.process(item))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(Box::new(PanicError::from_payload(panic)) as BoxError),
        };

        if let Err(source) = outcome {
            warn!(component = %self.name, error = %source, "Work item failed");
            self.faults.report(Fault::new(
                self.name.clone(),
                DispatchError::ProcessingFailure {
                    component: self.name.clone(),
                    source,
                },
            ));
        }
        self.queue.lock().in_flight = false;
    }

    /// Applies a control request and acknowledges it. Returns `false` when
    /// the worker must exit.
    fn apply(&self, request: ControlRequest, paused: &mut bool) -> bool {
        let keep_running = match request.control {
            Control::Pause => {
                *paused = true;
                true
            }
            Control::Resume => {
                *paused = false;
                true
            }
            Control::Stop => false,
        };
        trace!(component = %self.name, paused = *paused, keep_running, "Control applied");
        let _ = request.respond_to.send(());
        keep_running
    }

    async fn run(
        self: Arc<Self>,
        mut control: mpsc::Receiver<ControlRequest>,
        ready: oneshot::Sender<()>,
    ) {
        let _ = ready.send(());
        debug!(component = %self.name, "Worker started");
        let mut paused = false;

        loop {
            match control.try_recv() {
                Ok(request) => {
                    if !self.apply(request, &mut paused) {
                        break;
                    }
                    continue;
                }
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            if paused {
                match time::timeout(self.poll_interval, control.recv()).await {
                    Ok(Some(request)) => {
                        if !self.apply(request, &mut paused) {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_elapsed) => {}
                }
                continue;
            }

            if let Some(item) = self.take_next() {
                self.process(item).await;
                continue;
            }

            tokio::select! {
                request = control.recv() => match request {
                    Some(request) => {
                        if !self.apply(request, &mut paused) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = self.signal.notified() => {}
                _ = time::sleep(self.poll_interval) => {}
            }
        }

        debug!(component = %self.name, backlog = self.queue.lock().items.len(), "Worker exited");
    }
}

struct Worker {
    control: mpsc::Sender<ControlRequest>,
    join: JoinHandle<()>,
}

/// Lifecycle hooks of the queue: they own the worker task.
struct QueueCore<T> {
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<Worker>>,
}

impl<T: Send + 'static> QueueCore<T> {
    fn worker_gone(&self) -> DispatchError {
        DispatchError::ProcessingFailure {
            component: self.shared.name.clone(),
            source: "queue worker is not running".into(),
        }
    }

    async fn request(&self, control: Control) -> Result<(), DispatchError> {
        let sender = self
            .worker
            .lock()
            .as_ref()
            .map(|worker| worker.control.clone())
            .ok_or_else(|| self.worker_gone())?;

        let (respond_to, ack) = oneshot::channel();
        sender
            .send(ControlRequest {
                control,
                respond_to,
            })
            .await
            .map_err(|_| self.worker_gone())?;
        ack.await.map_err(|_| self.worker_gone())
    }

    async fn shutdown_worker(&self) -> Result<(), DispatchError> {
        self.shared.queue.lock().accepting = false;
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return Ok(());
        };

        let (respond_to, ack) = oneshot::channel();
        if worker
            .control
            .send(ControlRequest {
                control: Control::Stop,
                respond_to,
            })
            .await
            .is_ok()
        {
            let _ = ack.await;
        }
        if let Err(e) = worker.join.await {
            warn!(component = %self.shared.name, error = %e, "Worker task ended abnormally");
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Send + 'static> WorkerHooks for QueueCore<T> {
    async fn on_start(&self) -> Result<(), DispatchError> {
        let (control, receiver) = mpsc::channel(1);
        let (ready, started) = oneshot::channel();
        let join = tokio::spawn(self.shared.clone().run(receiver, ready));
        started.await.map_err(|_| self.worker_gone())?;
        *self.worker.lock() = Some(Worker { control, join });
        self.shared.queue.lock().accepting = true;
        Ok(())
    }

    async fn on_pause(&self) -> Result<(), DispatchError> {
        self.request(Control::Pause).await
    }

    async fn on_resume(&self) -> Result<(), DispatchError> {
        self.request(Control::Resume).await
    }

    async fn on_stop(&self) -> Result<(), DispatchError> {
        self.shutdown_worker().await
    }

    async fn on_dispose(&self, _from: WorkerState) -> Result<(), DispatchError> {
        self.shutdown_worker().await?;
        let dropped = {
            let mut queue = self.shared.queue.lock();
            let dropped = queue.items.len();
            queue.items.clear();
            dropped
        };
        if dropped > 0 {
            info!(component = %self.shared.name, dropped, "Discarded pending work items");
        }
        Ok(())
    }
}

/// A FIFO work queue drained by one background task.
///
/// ```rust,ignore
/// let queue = QueueEngine::new(QueueOptions::new("audit"), processor, faults);
/// queue.start().await?;
/// queue.enqueue(item)?;
/// queue.stop().await?;
/// ```
pub struct QueueEngine<T: Send + 'static> {
    lifecycle: WorkerLifecycle,
    core: QueueCore<T>,
}

impl<T: Send + 'static> QueueEngine<T> {
    pub fn new(
        options: QueueOptions,
        processor: Arc<dyn WorkProcessor<T>>,
        faults: Arc<dyn FaultSink>,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: options.name.clone(),
            poll_interval: options.poll_interval,
            queue: Mutex::new(WorkQueue {
                items: VecDeque::new(),
                in_flight: false,
                accepting: false,
            }),
            signal: Notify::new(),
            processor,
            faults,
        });
        Self {
            lifecycle: WorkerLifecycle::new(options.name, options.pause_supported),
            core: QueueCore {
                shared,
                worker: Mutex::new(None),
            },
        }
    }

    pub fn name(&self) -> &str {
        self.lifecycle.name()
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn watch(&self) -> watch::Receiver<WorkerState> {
        self.lifecycle.watch()
    }

    /// Items enqueued and not yet fully processed, including the one in flight.
    pub fn backlog(&self) -> usize {
        let queue = self.core.shared.queue.lock();
        queue.items.len() + usize::from(queue.in_flight)
    }

    /// Appends an item. Fails with `InvalidState` unless the worker is live
    /// (running, paused, or switching between the two).
    ///
    /// The check and the push happen under the data lock. `stop` and `dispose`
    /// close the queue under that lock before the worker exits.
    pub fn enqueue(&self, item: T) -> Result<(), DispatchError> {
        let backlog = {
            let mut queue = self.core.shared.queue.lock();
            let state = self.lifecycle.state();
            if !queue.accepting || !state.is_live() {
                let state = if state.is_live() { WorkerState::Stopping } else { state };
                return Err(DispatchError::invalid_state("enqueue", state));
            }
            queue.items.push_back(item);
            queue.items.len()
        };
        self.core.shared.signal.notify_one();
        trace!(component = %self.name(), backlog, "Enqueued");
        Ok(())
    }

    pub async fn start(&self) -> Result<(), DispatchError> {
        self.lifecycle.start(&self.core).await
    }

    pub async fn pause(&self) -> Result<(), DispatchError> {
        self.lifecycle.pause(&self.core).await
    }

    pub async fn resume(&self) -> Result<(), DispatchError> {
        self.lifecycle.resume(&self.core).await
    }

    pub async fn stop(&self) -> Result<(), DispatchError> {
        self.lifecycle.stop(&self.core).await
    }

    pub async fn dispose(&self) -> Result<(), DispatchError> {
        self.lifecycle.dispose(&self.core).await
    }
}

impl<T: Send + 'static> std::fmt::Debug for QueueEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEngine")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("backlog", &self.backlog())
            .finish()
    }
}
