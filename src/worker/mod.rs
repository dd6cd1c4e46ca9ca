//! Worker state machine driving one queue item at a time.
//!
//! # Overview
//!
//! The [`WorkerController`] orchestrates the queue head against a
//! [`FetchEngine`], translating interrupt and error outcomes into queue
//! mutations and observer events:
//!
//! - `start`/`resume` spawn the run loop on its own tokio task and return
//!   immediately; concurrent entry is refused through [`RunState`], not by
//!   blocking.
//! - `pause`/`cancel` set the cooperative interrupt flags; the in-flight
//!   engine observes them at its next checkpoint.
//! - On success the head item is popped; on pause/cancel/error the loop
//!   halts in a terminal state and the queue keeps its head, so a later
//!   `resume` or `start` re-enters from the same item.
//!
//! A failing head item is retried by every fresh `start` with no cap; `reset`
//! is the escape hatch. Engines that never checkpoint can not be paused or
//! cancelled; there is deliberately no watchdog around them.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::fetch::{DestinationConfig, FetchEngine, FetchError, FetchOutcome, FetchRequest};
use crate::interrupt::{Interrupt, InterruptSignal};
use crate::progress::{ProgressReporter, WorkerEvent};
use crate::queue::{ItemKind, QueueStore, WorkItem};

/// Broadcast capacity for worker events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of a worker run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RunState {
    /// No run has been started yet (or the controller was never used).
    #[default]
    Idle,
    /// The run loop is fetching the queue head.
    Running,
    /// Pause requested, not yet observed by the engine.
    Pausing,
    /// The run halted on a pause; `resume` re-enters from the queue head.
    Paused,
    /// Stop requested, not yet observed by the engine.
    Cancelling,
    /// The run halted on a stop; partial output was cleaned up.
    Cancelled,
    /// The fetch failed. The head item is retained, so a later `start`
    /// retries it.
    Error(String),
    /// The queue drained completely.
    Completed,
}

impl RunState {
    /// Returns the string label used in logs and display.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Error(_) => "error",
            Self::Completed => "completed",
        }
    }

    /// True while a run loop owns the queue head.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Pausing | Self::Cancelling)
    }

    /// The error message, when this is the error state.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Synchronous misuse signals from controller operations.
///
/// These are returned immediately to the caller and never alter an active
/// run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlError {
    /// A run is already active, or paused and awaiting `resume`.
    #[error("a download run is already active")]
    AlreadyRunning,

    /// No run is active to pause or cancel.
    #[error("no download run is active")]
    NotRunning,

    /// The queue has no items to run.
    #[error("the queue is empty")]
    EmptyQueue,
}

/// Orchestrates one queue item at a time against a fetch engine.
///
/// Cheap to clone; clones share the queue, the interrupt signal, the run
/// state and the event channel. Exactly one run loop is active at a time,
/// enforced by [`RunState`] rather than by blocking: a second `start`
/// returns [`ControlError::AlreadyRunning`] immediately.
#[derive(Clone)]
pub struct WorkerController {
    queue: Arc<QueueStore>,
    engine: Arc<dyn FetchEngine>,
    interrupt: Arc<InterruptSignal>,
    state: Arc<Mutex<RunState>>,
    events: broadcast::Sender<WorkerEvent>,
}

impl WorkerController {
    /// Creates a controller over the given queue and engine.
    #[must_use]
    pub fn new(queue: Arc<QueueStore>, engine: Arc<dyn FetchEngine>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            queue,
            engine,
            interrupt: Arc::new(InterruptSignal::new()),
            state: Arc::new(Mutex::new(RunState::Idle)),
            events,
        }
    }

    /// Registers an observer for worker events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Returns the current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.lock_state().clone()
    }

    /// The shared queue this controller drains.
    #[must_use]
    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classifies a pre-validated link and appends it to the queue.
    ///
    /// The classification probe is metadata-only. A probe failure falls back
    /// to treating the source as a single item; enqueueing itself always
    /// succeeds.
    pub async fn enqueue(&self, url: &str) -> WorkItem {
        let kind = match self.engine.probe(url).await {
            Ok(probe) => probe.kind(),
            Err(error) => {
                debug!(url, error = %error, "probe failed; treating source as single item");
                ItemKind::Single
            }
        };
        let item = self.queue.enqueue(kind, url);
        info!(url, kind = %item.kind(), queued = self.queue.len(), "added to queue");
        item
    }

    /// Starts a fresh run from the queue head.
    ///
    /// Returns immediately; the run loop executes on its own task.
    ///
    /// # Errors
    ///
    /// [`ControlError::AlreadyRunning`] while a run is active or paused (a
    /// paused run still owns the queue head; use [`resume`](Self::resume)),
    /// [`ControlError::EmptyQueue`] when there is nothing to fetch.
    pub fn start(&self, config: DestinationConfig) -> Result<(), ControlError> {
        self.begin(config, false)
    }

    /// Re-enters the run loop after a pause.
    ///
    /// Behaves exactly as `start`: the interrupt is re-armed and the head
    /// item is fetched from scratch. No partial in-item progress is retained
    /// by the controller; byte-level resumption is the engine's business.
    ///
    /// # Errors
    ///
    /// [`ControlError::AlreadyRunning`] while a run is active,
    /// [`ControlError::EmptyQueue`] when there is nothing to fetch.
    pub fn resume(&self, config: DestinationConfig) -> Result<(), ControlError> {
        self.begin(config, true)
    }

    fn begin(&self, config: DestinationConfig, allow_paused: bool) -> Result<(), ControlError> {
        let mut state = self.lock_state();
        if state.is_active() || (!allow_paused && *state == RunState::Paused) {
            return Err(ControlError::AlreadyRunning);
        }
        if self.queue.is_empty() {
            return Err(ControlError::EmptyQueue);
        }

        self.interrupt.arm();
        *state = RunState::Running;
        drop(state);

        let worker = self.clone();
        tokio::spawn(async move {
            worker.run_loop(config).await;
        });
        Ok(())
    }

    /// Requests a cooperative pause of the in-flight fetch.
    ///
    /// # Errors
    ///
    /// [`ControlError::NotRunning`] unless a run is in the `Running` state.
    pub fn pause(&self) -> Result<(), ControlError> {
        let mut state = self.lock_state();
        if *state != RunState::Running {
            return Err(ControlError::NotRunning);
        }
        self.interrupt.request_pause();
        *state = RunState::Pausing;
        info!("pause requested");
        Ok(())
    }

    /// Requests a cooperative stop of the in-flight fetch.
    ///
    /// Accepted during a pending pause as well: stop outranks pause at the
    /// next checkpoint.
    ///
    /// # Errors
    ///
    /// [`ControlError::NotRunning`] unless a run is running or pausing.
    pub fn cancel(&self) -> Result<(), ControlError> {
        let mut state = self.lock_state();
        if !matches!(*state, RunState::Running | RunState::Pausing) {
            return Err(ControlError::NotRunning);
        }
        self.interrupt.request_stop();
        *state = RunState::Cancelling;
        info!("cancel requested");
        Ok(())
    }

    /// Clears the queue unconditionally.
    ///
    /// Safe while a fetch is in flight: the in-flight item fails its later
    /// `pop_if_head` and is dropped silently. The run's terminal outcome is
    /// not affected.
    pub fn reset(&self) {
        self.queue.clear();
        info!("queue cleared");
    }

    #[instrument(skip_all)]
    async fn run_loop(&self, config: DestinationConfig) {
        info!(dest = %config.dir.display(), mode = config.mode.as_str(), "worker started");
        let reporter = ProgressReporter::new(self.events.clone());

        loop {
            // A pause/cancel issued between items lands here, within one
            // iteration of the request.
            if let Err(kind) = self.interrupt.checkpoint() {
                self.finish(terminal_for(kind));
                return;
            }

            let Some(item) = self.queue.peek_head() else {
                info!("queue drained; all done");
                self.finish(RunState::Completed);
                return;
            };

            let title = self.title_for(&item).await;
            let _ = self.events.send(WorkerEvent::ItemStarted {
                title: title.clone(),
                kind: item.kind(),
                remaining: self.queue.len(),
            });
            info!(title = %title, kind = %item.kind(), "starting fetch");

            let request = FetchRequest::for_item(&item, &config);
            match self.run_engine(&request, &reporter).await {
                Ok(_outcome) => {
                    if !self.queue.pop_if_head(&item) {
                        // The queue was cleared mid-fetch: silent drop.
                        debug!(seq = item.seq(), "item vanished before pop; dropping silently");
                    }
                    let _ = self.events.send(WorkerEvent::ItemFinished { title });
                }
                Err(FetchError::Paused) => {
                    info!(title = %title, "fetch paused; partial output left in place");
                    self.finish(RunState::Paused);
                    return;
                }
                Err(FetchError::Stopped { partial }) => {
                    remove_partial_output(partial.as_deref()).await;
                    info!(title = %title, "fetch cancelled");
                    self.finish(RunState::Cancelled);
                    return;
                }
                Err(error) => {
                    warn!(title = %title, error = %error, "fetch failed; head item retained");
                    self.finish(RunState::Error(error.to_string()));
                    return;
                }
            }
        }
    }

    /// Invokes the engine, degrading a panic to a generic output failure so
    /// the run loop context survives any engine misbehavior.
    async fn run_engine(
        &self,
        request: &FetchRequest,
        reporter: &ProgressReporter,
    ) -> Result<FetchOutcome, FetchError> {
        let fetch = self.engine.run(request, &self.interrupt, reporter);
        match std::panic::AssertUnwindSafe(fetch).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                warn!("fetch engine panicked; degrading to output error");
                Err(FetchError::output("fetch engine failed unexpectedly"))
            }
        }
    }

    /// Resolves a display title for the item. Metadata failures are
    /// swallowed; the raw URL is shown instead.
    async fn title_for(&self, item: &WorkItem) -> String {
        match self.engine.probe(item.url()).await {
            Ok(probe) => probe.title.unwrap_or_else(|| item.url().to_string()),
            Err(error) => {
                debug!(url = item.url(), error = %error, "metadata probe failed; showing raw URL");
                item.url().to_string()
            }
        }
    }

    fn finish(&self, terminal: RunState) {
        info!(state = %terminal, "worker finished");
        *self.lock_state() = terminal.clone();
        let _ = self.events.send(WorkerEvent::RunEnded { state: terminal });
    }
}

fn terminal_for(kind: Interrupt) -> RunState {
    match kind {
        Interrupt::Paused => RunState::Paused,
        Interrupt::Stopped => RunState::Cancelled,
    }
}

/// Deletes the last-known partial output after a stop, best effort.
async fn remove_partial_output(partial: Option<&Path>) {
    let Some(path) = partial else { return };
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial output"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => {
            warn!(path = %path.display(), error = %error, "failed to remove partial output");
        }
    }
}
