//! Run-and-poll controller for backend batch jobs.
//!
//! `run(target)` asks the backend to start computing results for one target
//! (every enabled model predicts one market), then polls the target's detail
//! until the aggregate result appears or the deadline passes. At most one poll
//! task exists per controller, and a run that was superseded or disposed can
//! never publish again.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PollingConfig;
use crate::error::RunError;
use crate::types::MarketDetail;

/// Point-in-time detail fetched while polling.
pub trait RunSnapshot: Clone + Send + Sync + 'static {
    /// The aggregate result has materialized.
    fn is_complete(&self) -> bool;

    /// Copy with all run results removed, shown while a new run is in progress.
    fn cleared(&self) -> Self;
}

impl RunSnapshot for MarketDetail {
    fn is_complete(&self) -> bool {
        self.consensus.is_some()
    }

    fn cleared(&self) -> Self {
        Self {
            market: self.market.clone(),
            predictions: Vec::new(),
            consensus: None,
        }
    }
}

/// Backend operations the controller drives.
#[async_trait]
pub trait RunBackend: Send + Sync + 'static {
    type Snapshot: RunSnapshot;

    /// Ask the backend to begin the batch job. Returns once it was accepted.
    async fn start_run(&self, target: &str) -> anyhow::Result<()>;

    /// Fetch the current detail for `target`.
    async fn fetch_detail(&self, target: &str) -> anyhow::Result<Self::Snapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    /// The aggregate result appeared.
    Completed,
    /// The deadline passed first; the last snapshot may lack the aggregate.
    TimedOut,
}

/// Observable state of a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct RunView<S> {
    pub state: RunState,
    pub target: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub snapshot: Option<S>,
    /// Poll ticks performed by the current (or last) run.
    pub ticks: u32,
    pub last_error: Option<String>,
}

impl<S> Default for RunView<S> {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            target: None,
            started_at: None,
            snapshot: None,
            ticks: 0,
            last_error: None,
        }
    }
}

impl<S> RunView<S> {
    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(180),
        }
    }
}

impl From<&PollingConfig> for PollSettings {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: config.run_poll_interval(),
            timeout: config.run_timeout(),
        }
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

struct Shared<B: RunBackend> {
    backend: B,
    settings: PollSettings,
    slot: Mutex<Slot>,
    view: watch::Sender<RunView<B::Snapshot>>,
}

impl<B: RunBackend> Shared<B> {
    /// Mutate the view only if `generation` is still the live run.
    fn publish<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut RunView<B::Snapshot>) -> R,
    ) -> Option<R> {
        let slot = lock(&self.slot);
        if slot.generation != generation {
            return None;
        }
        let mut out = None;
        self.view.send_modify(|view| out = Some(f(view)));
        out
    }
}

/// Drives one run at a time and exposes its progress.
pub struct RunController<B: RunBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: RunBackend> RunController<B> {
    pub fn new(backend: B) -> Self {
        Self::with_settings(backend, PollSettings::default())
    }

    pub fn with_settings(backend: B, settings: PollSettings) -> Self {
        let (view, _) = watch::channel(RunView::default());
        Self {
            shared: Arc::new(Shared {
                backend,
                settings,
                slot: Mutex::new(Slot::default()),
                view,
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn view(&self) -> RunView<B::Snapshot> {
        self.shared.view.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.view.borrow().is_running()
    }

    /// Receiver notified on every view change.
    pub fn watch(&self) -> watch::Receiver<RunView<B::Snapshot>> {
        self.shared.view.subscribe()
    }

    /// Start a run for `target` and begin polling once the backend accepts it.
    ///
    /// Any previous poll task is stopped first. If the start request fails the
    /// controller goes back to `Idle` and the error is returned (and kept in
    /// `last_error`); no polling happens.
    pub async fn run(&self, target: &str) -> Result<(), RunError> {
        let generation = {
            let mut slot = lock(&self.shared.slot);
            slot.generation += 1;
            if let Some(task) = slot.task.take() {
                task.abort();
                debug!("Stopped previous poll task");
            }
            self.shared.view.send_modify(|view| {
                view.snapshot = match (&view.snapshot, &view.target) {
                    (Some(snapshot), Some(current)) if current == target => {
                        Some(snapshot.cleared())
                    }
                    _ => None,
                };
                view.state = RunState::Running;
                view.target = Some(target.to_string());
                view.started_at = Some(Utc::now());
                view.ticks = 0;
                view.last_error = None;
            });
            slot.generation
        };

        let started = Instant::now();
        info!("[{target}] Starting run");
        let mut guard = StartGuard {
            shared: self.shared.as_ref(),
            generation,
            armed: true,
        };
        let accepted = self.shared.backend.start_run(target).await;
        guard.armed = false;
        if let Err(e) = accepted {
            warn!("[{target}] Run failed to start: {e:#}");
            let message = format!("{e:#}");
            self.shared.publish(generation, |view| {
                view.state = RunState::Idle;
                view.last_error = Some(message);
            });
            return Err(RunError::Start {
                target: target.to_string(),
                source: e.into(),
            });
        }

        let mut slot = lock(&self.shared.slot);
        if slot.generation != generation {
            debug!("[{target}] Run superseded before polling began");
            return Ok(());
        }
        slot.task = Some(tokio::spawn(poll_until_done(
            Arc::clone(&self.shared),
            target.to_string(),
            generation,
            started,
        )));
        Ok(())
    }

    /// Stop polling. The view returns to `Idle` if a run was in progress and
    /// any response still in flight is discarded.
    pub fn dispose(&self) {
        let mut slot = lock(&self.shared.slot);
        slot.generation += 1;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        self.shared.view.send_if_modified(|view| {
            if view.state == RunState::Running {
                view.state = RunState::Idle;
                true
            } else {
                false
            }
        });
    }
}

impl<B: RunBackend> Drop for RunController<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Returns the view to `Idle` if `run` is dropped while the start request is
/// still in flight, since no poll task exists yet to end the run.
struct StartGuard<'a, B: RunBackend> {
    shared: &'a Shared<B>,
    generation: u64,
    armed: bool,
}

impl<B: RunBackend> Drop for StartGuard<'_, B> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.shared.publish(self.generation, |view| {
            if view.state == RunState::Running {
                debug!("Run abandoned before the backend accepted it");
                view.state = RunState::Idle;
            }
        });
    }
}

/// Self-rescheduling poll loop: the next tick is armed only after the current
/// fetch settles, so fetches never overlap.
async fn poll_until_done<B: RunBackend>(
    shared: Arc<Shared<B>>,
    target: String,
    generation: u64,
    started: Instant,
) {
    let PollSettings { interval, timeout } = shared.settings;
    let mut ticks: u32 = 0;

    loop {
        tokio::time::sleep(interval).await;
        ticks += 1;
        let result = shared.backend.fetch_detail(&target).await;
        let elapsed = started.elapsed();

        let finished = shared.publish(generation, |view| {
            view.ticks = ticks;
            match result {
                Ok(snapshot) => {
                    let complete = snapshot.is_complete();
                    view.snapshot = Some(snapshot);
                    if complete {
                        view.state = RunState::Completed;
                        return true;
                    }
                }
                Err(e) => warn!("[{target}] Poll tick {ticks} failed: {e:#}"),
            }
            if elapsed > timeout {
                view.state = RunState::TimedOut;
                return true;
            }
            false
        });

        match finished {
            Some(false) => continue,
            Some(true) => {
                let state = shared.view.borrow().state;
                info!("[{target}] Run finished ({state:?}) after {ticks} ticks");
                return;
            }
            None => {
                debug!("[{target}] Dropping tick {ticks} of a stale run");
                return;
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
