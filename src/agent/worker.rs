// Location: src/agent/worker.rs

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error};

/// Work performed on every wake of a [`BackgroundWorker`].
#[async_trait::async_trait]
pub trait WorkerTask: Send + Sync + 'static {
    /// Run one cycle. An error ends the periodic loop for good.
    async fn run_cycle(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Between a finished cycle and the next scheduling decision
    Idle,
    /// Sleeping until the next deadline
    Scheduled,
    /// Executing a cycle
    Running,
    /// The loop has exited and will not run again
    Stopped,
}

/// Runs a [`WorkerTask`] once per period on a tokio task.
///
/// Deadlines stay on the grid `start + k * period`; a late wake runs once and
/// skips the missed slots instead of running them back to back.
pub struct BackgroundWorker<T: WorkerTask> {
    task: Arc<T>,
    period: Duration,
    state: Arc<Mutex<WorkerState>>,
    shutdown_signal: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: WorkerTask> BackgroundWorker<T> {
    /// Spawn the periodic loop. Must be called within a tokio runtime.
    pub fn start(task: Arc<T>, period: Duration) -> Self {
        let state = Arc::new(Mutex::new(WorkerState::Idle));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        debug!(period_secs = period.as_secs_f64(), "Starting background worker");
        let handle = tokio::spawn(Self::run_loop(
            task.clone(),
            period,
            state.clone(),
            shutdown_rx,
        ));

        Self {
            task,
            period,
            state,
            shutdown_signal: Mutex::new(Some(shutdown_tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    /// Stop scheduling cycles. A cycle already running completes.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_signal.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the loop to exit.
    pub async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Background worker task ended abnormally");
            }
        }
    }

    /// Run a single cycle now, independent of the loop. Valid after `stop`.
    pub async fn run_once(&self) -> anyhow::Result<()> {
        self.task.run_cycle().await
    }

    async fn run_loop(
        task: Arc<T>,
        period: Duration,
        state: Arc<Mutex<WorkerState>>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let Some(mut deadline) = Instant::now().checked_add(period) else {
            error!(period_secs = period.as_secs_f64(), "Worker period out of range, worker stopped");
            *state.lock() = WorkerState::Stopped;
            return;
        };

        loop {
            *state.lock() = WorkerState::Scheduled;
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    debug!("Background worker received shutdown signal");
                    break;
                }
                _ = time::sleep_until(deadline) => {}
            }

            *state.lock() = WorkerState::Running;
            match AssertUnwindSafe(task.run_cycle()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = ?e, "Background worker cycle failed, worker stopped");
                    break;
                }
                Err(_) => {
                    error!("Background worker cycle panicked, worker stopped");
                    break;
                }
            }

            *state.lock() = WorkerState::Idle;
            match next_deadline(deadline, Instant::now(), period) {
                Some(next) => deadline = next,
                None => {
                    error!(period_secs = period.as_secs_f64(), "Next deadline out of range, worker stopped");
                    break;
                }
            }
        }

        *state.lock() = WorkerState::Stopped;
    }
}

/// First point on the grid `previous + k * period` (k >= 1) strictly after
/// `now`, or `None` when it can't be represented as an `Instant`.
pub fn next_deadline(previous: Instant, now: Instant, period: Duration) -> Option<Instant> {
    let next = previous.checked_add(period)?;
    if next > now || period.is_zero() {
        return Some(next.max(now));
    }
    let behind = now.duration_since(next).as_nanos();
    let skipped = (behind / period.as_nanos() + 1).min(u32::MAX as u128) as u32;
    next.checked_add(period.checked_mul(skipped)?)
}
