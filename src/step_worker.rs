//! A [`crate::worker::Worker`] refined with a target frequency and a pause gate.

use crate::clock::Clock;
use crate::errors::ServiceError;
use crate::service::{Service, ServiceController, ServiceState};
use crate::waitable::Waitable;
use crate::worker::{Runnable, Worker};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The repeated unit of work a [`StepWorker`] drives. Returning `false` ends the loop.
#[async_trait]
pub trait Stepper: Send + Sync {
    /// Performs one iteration's worth of work.
    async fn step(&self) -> bool;
}

const DEFAULT_MIN_PERIOD: Duration = Duration::from_millis(1);

struct StepWorkerCore {
    stepper: Arc<dyn Stepper>,
    clock: Arc<dyn Clock>,
    frequency_millihertz: AtomicU64,
    min_period: Duration,
    paused: AtomicBool,
    pause_gate: Waitable,
}

impl StepWorkerCore {
    fn period(&self) -> Duration {
        let millihertz = self.frequency_millihertz.load(Ordering::Acquire).max(1);
        let hz = millihertz as f64 / 1000.0;
        Duration::from_secs_f64(1.0 / hz).max(self.min_period)
    }

    async fn run_loop(&self, should_stop: Arc<AtomicBool>) {
        loop {
            if should_stop.load(Ordering::Acquire) {
                return;
            }
            if self.paused.load(Ordering::Acquire) {
                self.pause_gate.wait(|| !self.paused.load(Ordering::Acquire)).await;
                continue;
            }
            let start = self.clock.now().await;
            if !self.stepper.step().await {
                return;
            }
            if should_stop.load(Ordering::Acquire) {
                return;
            }
            let elapsed_ns = self.clock.now().await - start;
            let period = self.period();
            let period_ns = crate::utils::duration_to_nanos(period);
            if elapsed_ns < period_ns {
                let deadline = start + period_ns;
                self.clock.idle_until(deadline).await;
            }
        }
    }
}

struct StepWorkerRunnable {
    core: Arc<StepWorkerCore>,
}

#[async_trait]
impl Runnable for StepWorkerRunnable {
    async fn run(&self, should_stop: Arc<AtomicBool>) -> bool {
        self.core.run_loop(should_stop).await;
        false
    }
}

/// A `Worker`-like loop that calls a [`Stepper`] at a configurable frequency, with a pause
/// gate any task can toggle. Frequency is stored as a fixed-point `AtomicU64` (millihertz)
/// so it can be read and updated from any task without locking; a new value takes effect
/// at the next iteration boundary. Implements [`Service`]: `start()` spawns the step loop
/// on a background task, `stop()` requests it end at the next iteration boundary (or
/// unblocks it immediately if paused).
pub struct StepWorker {
    core: Arc<StepWorkerCore>,
    worker: Worker,
    controller: ServiceController,
}

impl StepWorker {
    /// Creates a step worker calling `stepper` at `frequency_hz`, idling on `clock` between
    /// iterations. Not yet started.
    pub fn new(stepper: Arc<dyn Stepper>, clock: Arc<dyn Clock>, frequency_hz: f64) -> Self {
        Self::with_min_period(stepper, clock, frequency_hz, DEFAULT_MIN_PERIOD)
    }

    /// As [`StepWorker::new`], with an explicit floor on the iteration period (guards
    /// against a runaway busy loop if `frequency_hz` is misconfigured absurdly high).
    pub fn with_min_period(
        stepper: Arc<dyn Stepper>,
        clock: Arc<dyn Clock>,
        frequency_hz: f64,
        min_period: Duration,
    ) -> Self {
        let core = Arc::new(StepWorkerCore {
            stepper,
            pause_gate: Waitable::new(clock.clone()),
            clock,
            frequency_millihertz: AtomicU64::new((frequency_hz * 1000.0) as u64),
            min_period,
            paused: AtomicBool::new(false),
        });
        let runnable: Arc<dyn Runnable> = Arc::new(StepWorkerRunnable { core: core.clone() });
        Self { core, worker: Worker::new(runnable), controller: ServiceController::new() }
    }

    /// Updates the iteration frequency. Takes effect at the next loop boundary.
    pub fn set_frequency(&self, frequency_hz: f64) {
        self.core
            .frequency_millihertz
            .store((frequency_hz * 1000.0) as u64, Ordering::Release);
    }

    /// The currently configured frequency.
    pub fn frequency(&self) -> f64 {
        self.core.frequency_millihertz.load(Ordering::Acquire) as f64 / 1000.0
    }

    /// Pauses iteration: the loop parks on the pause gate before its next `step`.
    pub fn pause(&self) {
        self.core.paused.store(true, Ordering::Release);
    }

    /// Resumes iteration, waking any parked loop.
    pub fn resume(&self) {
        self.core.paused.store(false, Ordering::Release);
        self.core.pause_gate.notify_all();
    }

    /// `true` if currently paused.
    pub fn is_paused(&self) -> bool {
        self.core.paused.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Service for StepWorker {
    async fn setup(&self) -> Result<(), ServiceError> {
        self.controller.run_setup(async { Ok(()) }).await
    }

    async fn init(&self) -> Result<(), ServiceError> {
        self.controller.run_init(async { Ok(()) }).await
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.controller
            .run_start(async {
                self.worker.start("step-worker");
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.controller
            .run_stop(async {
                self.worker.stop();
                self.core.pause_gate.notify_all();
                self.worker.join().await;
                Ok(())
            })
            .await
    }

    async fn reset(&self) -> Result<(), ServiceError> {
        self.controller.run_reset(async { Ok(()) }).await
    }

    fn state(&self) -> ServiceState {
        self.controller.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteadyClock;
    use std::sync::atomic::AtomicUsize;

    struct CountingStepper {
        count: Arc<AtomicUsize>,
        limit: usize,
    }

    #[async_trait]
    impl Stepper for CountingStepper {
        async fn step(&self) -> bool {
            let prev = self.count.fetch_add(1, Ordering::Relaxed);
            prev + 1 < self.limit
        }
    }

    #[tokio::test]
    async fn run_loop_stops_when_stepper_returns_false() {
        let count = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(SteadyClock::new());
        let worker = StepWorker::with_min_period(
            Arc::new(CountingStepper { count: count.clone(), limit: 3 }),
            clock,
            1000.0,
            Duration::from_millis(1),
        );
        worker.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while count.load(Ordering::Relaxed) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stepper should reach its limit");

        assert_eq!(worker.state(), ServiceState::Running);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn pause_blocks_until_resume() {
        let count = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(SteadyClock::new());
        let worker = StepWorker::new(
            Arc::new(CountingStepper { count: count.clone(), limit: 10_000 }),
            clock,
            1000.0,
        );
        worker.pause();
        worker.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::Relaxed), 0);

        worker.resume();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(count.load(Ordering::Relaxed) > 0);

        worker.stop().await.unwrap();
    }
}
