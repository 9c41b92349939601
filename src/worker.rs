//! A background Tokio task driving a single async runnable, with a readiness handshake and
//! a cooperative stop flag.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::service::ServiceState;

/// The async body a [`Worker`] drives. Returning `false` (or the future resolving on its
/// own, for a one-shot runnable) ends the worker's task; `stop()` is the cooperative
/// request to return `false` at the runnable's next check of `should_stop`.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Runs once on the worker's task. Implementors that loop internally should
    /// periodically check `should_stop` and return when it is set; implementors that do a
    /// single unit of work just return when done.
    async fn run(&self, should_stop: Arc<AtomicBool>) -> bool;
}

/// Owns exactly one background Tokio task and one [`Runnable`]. This is the building block
/// every threaded `Service` in this crate (`StepWorker`, `Scheduler`) is built on.
pub struct Worker {
    runnable: Arc<dyn Runnable>,
    should_stop: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    state: std::sync::Mutex<ServiceState>,
}

impl Worker {
    /// Creates a worker around `runnable`, not yet started.
    pub fn new(runnable: Arc<dyn Runnable>) -> Self {
        Self {
            runnable,
            should_stop: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
            state: std::sync::Mutex::new(ServiceState::None),
        }
    }

    /// Starts the background task under `name` (used as the `tracing` span name) without
    /// waiting for it to signal readiness.
    pub fn start(&self, name: impl Into<String>) {
        let name = name.into();
        self.should_stop.store(false, Ordering::Release);
        let runnable = self.runnable.clone();
        let should_stop = self.should_stop.clone();
        let span = tracing::info_span!("worker", name = %name);
        *self.state.lock().unwrap() = ServiceState::Running;
        let handle = tokio::spawn(
            async move {
                tracing::debug!("worker started");
                runnable.run(should_stop).await;
                tracing::debug!("worker stopped");
            }
            .instrument(span),
        );
        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Starts the background task and waits until it has signalled readiness via `ready_rx`
    /// (a `oneshot` the runnable is expected to fire early in its `run` body), or until the
    /// task ends first (startup failure).
    pub async fn start_sync(&self, name: impl Into<String>, ready_rx: oneshot::Receiver<()>) {
        self.start(name);
        let _ = ready_rx.await;
    }

    /// Requests the background task stop. Safe to call from any task, including the
    /// worker's own (it only flips a flag; it never joins itself).
    pub fn stop(&self) -> bool {
        self.should_stop.store(true, Ordering::Release);
        true
    }

    /// Awaits the background task's completion. Must not be called from within the
    /// worker's own task.
    pub async fn join(&self) {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        *self.state.lock().unwrap() = ServiceState::Stopped;
    }

    /// `true` once `start`/`start_sync` has been called at least once.
    pub fn has_started(&self) -> bool {
        self.handle.lock().unwrap().is_some()
    }

    /// `true` if the background task has not finished.
    pub fn is_running(&self) -> bool {
        matches!(
            self.handle.lock().unwrap().as_ref(),
            Some(handle) if !handle.is_finished()
        )
    }

    /// The flag the running task observes to know a stop was requested.
    pub fn should_stop_flag(&self) -> Arc<AtomicBool> {
        self.should_stop.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingRunnable {
        ticks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Runnable for CountingRunnable {
        async fn run(&self, should_stop: Arc<AtomicBool>) -> bool {
            while !should_stop.load(Ordering::Acquire) {
                self.ticks.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            false
        }
    }

    #[tokio::test]
    async fn worker_runs_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let worker = Worker::new(Arc::new(CountingRunnable { ticks: ticks.clone() }));
        worker.start("test-worker");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(worker.is_running());
        worker.stop();
        worker.join().await;
        assert!(ticks.load(Ordering::Relaxed) > 0);
        assert!(!worker.is_running());
    }

    struct OneShotRunnable;

    #[async_trait]
    impl Runnable for OneShotRunnable {
        async fn run(&self, _should_stop: Arc<AtomicBool>) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn one_shot_worker_finishes_on_its_own() {
        let worker = Worker::new(Arc::new(OneShotRunnable));
        worker.start("one-shot");
        worker.join().await;
        assert!(!worker.is_running());
        assert!(worker.has_started());
    }
}
