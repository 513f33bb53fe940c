//! Periodic background task scheduling.
//!
//! Background work (log flush, checkpoint, image cleanup, liveness
//! probing) is modeled as [`PeriodicTask`] implementations driven by one
//! [`TaskScheduler`]. Tasks expose a single `run_once` so tests can
//! trigger an iteration deterministically instead of waiting on the
//! clock. Shutdown is cooperative: the stop signal is checked between
//! iterations, never mid-iteration.

use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One unit of periodic background work.
pub trait PeriodicTask: Send + Sync + 'static {
    /// Task name for logging.
    fn name(&self) -> &'static str;

    /// Run a single iteration. A failed iteration is logged and the task
    /// keeps its schedule; it does not take the process down.
    fn run_once(&self) -> Result<()>;
}

/// Owns all periodic task loops and their shared shutdown signal.
pub struct TaskScheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Spawn a loop running `task` every `interval`.
    pub fn spawn(&mut self, task: Arc<dyn PeriodicTask>, interval: Duration) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so a freshly
            // started task waits one full interval.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = task.run_once() {
                            warn!(task = task.name(), "background task iteration failed: {e}");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!(task = task.name(), "background task stopping");
                            break;
                        }
                    }
                }
            }
        });
        self.handles.push(handle);
    }

    /// Signal all task loops to stop and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTask {
        runs: AtomicU32,
    }

    impl PeriodicTask for CountingTask {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn run_once(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_and_stops() {
        let task = Arc::new(CountingTask {
            runs: AtomicU32::new(0),
        });
        let mut scheduler = TaskScheduler::new();
        scheduler.spawn(task.clone(), Duration::from_millis(10));

        // Let the spawned loop register its interval timer before the
        // paused clock is advanced.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(35)).await;
        tokio::task::yield_now().await;

        scheduler.shutdown().await;
        assert!(task.runs.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_run_once_direct() {
        let task = CountingTask {
            runs: AtomicU32::new(0),
        };
        task.run_once().unwrap();
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
    }
}
