//! Named recurring tasks with deterministic cancellation.
//!
//! Each task runs in its own spawned loop driven by `tokio::time::interval`
//! and stops when the scheduler's [`CancellationToken`] fires. The first
//! tick is consumed immediately so a task first runs one full interval after
//! [`Scheduler::start`]. Missed ticks are skipped, never bunched. A run in
//! flight when the token fires is abandoned at its next await point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// How long [`Scheduler::stop`] waits for a task loop to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Re-entrancy guard
// ---------------------------------------------------------------------------

/// Prevents a cycle from overlapping with itself.
#[derive(Debug, Default)]
pub struct CycleGuard {
    busy: AtomicBool,
}

/// Held while a cycle runs; releases the guard on drop.
#[derive(Debug)]
pub struct CycleToken<'a> {
    guard: &'a CycleGuard,
}

impl CycleGuard {
    /// Claim the guard, or `None` if a run is already in progress.
    pub fn try_enter(&self) -> Option<CycleToken<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleToken { guard: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for CycleToken<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

pub type TaskJob = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A job run every `interval` until the scheduler stops.
#[derive(Clone)]
pub struct RecurringTask {
    pub name: &'static str,
    pub interval: Duration,
    pub job: TaskJob,
}

impl RecurringTask {
    pub fn new<F>(name: &'static str, interval: Duration, job: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            name,
            interval,
            job: Arc::new(job),
        }
    }
}

impl std::fmt::Debug for RecurringTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecurringTask")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

async fn run_task(task: RecurringTask, cancel: CancellationToken) {
    tracing::info!(
        task = task.name,
        interval_secs = task.interval.as_secs(),
        "Recurring task started"
    );

    let mut interval = tokio::time::interval(task.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(task = task.name, "Recurring task stopping");
                break;
            }
            _ = interval.tick() => {
                // A job still running when the token fires is dropped.
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(task = task.name, "Recurring task cancelled mid-run");
                        break;
                    }
                    _ = (task.job)() => {}
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Running {
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

#[derive(Default)]
pub struct Scheduler {
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn every task. Returns `false` without spawning anything if the
    /// scheduler is already running.
    pub fn start(&self, tasks: Vec<RecurringTask>) -> bool {
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if running.is_some() {
            return false;
        }
        let cancel = CancellationToken::new();
        let handles = tasks
            .into_iter()
            .map(|task| {
                let name = task.name;
                (name, tokio::spawn(run_task(task, cancel.clone())))
            })
            .collect();
        *running = Some(Running { cancel, handles });
        true
    }

    /// Cancel every task and wait for the loops to exit. A second call is a
    /// no-op.
    pub async fn stop(&self) {
        let running = {
            let mut guard = self.running.lock().unwrap_or_else(|p| p.into_inner());
            guard.take()
        };
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        for (name, handle) in running.handles {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "Recurring task panicked"),
                Err(_) => tracing::warn!(task = name, "Recurring task did not stop in time"),
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }
}
