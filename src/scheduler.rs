//! Runs submitted [`crate::task::Task`]s at or after their deadlines, with minimal jitter,
//! on a single scheduling task.

use crate::clock::{AdvanceableClock, Clock, SteadyClock, VirtualClock};
use crate::errors::ServiceError;
use crate::service::{Service, ServiceController, ServiceState};
use crate::task::{Task, TaskOutcome};
use crate::utils::Timestamp;
use crate::waitable::Waitable;
use crate::worker::{Runnable, Worker};
use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use typed_builder::TypedBuilder;

const DEFAULT_OVERRUN_AT_NS: i64 = 1_000_000; // 1 ms
const DEFAULT_ACCEPTABLE_PREPLAY_NS: i64 = 100_000; // 100 us
const INTAKE_POLL_INTERVAL_NS: i64 = 50_000_000; // 50 ms

/// Builder configuration for a [`Scheduler`]; built via `typed-builder`.
#[derive(TypedBuilder)]
#[builder(build_method(into = Scheduler))]
pub struct SchedulerConfig {
    /// The clock the scheduler idles against. Ignored if `no_delay` is `true` (the
    /// scheduler then owns its own internal [`VirtualClock`]).
    ///
    /// # Default Value
    /// [`SteadyClock`].
    #[builder(
        default = Arc::new(SteadyClock::new()),
        setter(transform = |clock: impl Clock + 'static| Arc::new(clock) as Arc<dyn Clock>),
    )]
    clock: Arc<dyn Clock>,

    /// How far past a deadline (in nanoseconds) a task's fire-time may lag before it counts
    /// as an overrun.
    ///
    /// # Default Value
    /// 1 millisecond.
    #[builder(default = DEFAULT_OVERRUN_AT_NS)]
    overrun_at: Timestamp,

    /// How far ahead of a deadline (in nanoseconds) the loop is willing to spin-check
    /// rather than sleep; deadlines closer than this fire immediately without an
    /// intervening suspension.
    ///
    /// # Default Value
    /// 100 microseconds.
    #[builder(default = DEFAULT_ACCEPTABLE_PREPLAY_NS)]
    acceptable_task_preplay: Timestamp,

    /// When `true`, the scheduler ignores the configured `clock` and owns a private
    /// [`VirtualClock`] it jumps directly to each task's deadline, for deterministic replay
    /// without real sleeping.
    ///
    /// # Default Value
    /// `false`.
    #[builder(default = false)]
    no_delay: bool,

    /// When `true`, `start()` does not return until the scheduling task has entered its
    /// main loop.
    ///
    /// # Default Value
    /// `true`.
    #[builder(default = true)]
    start_synchronised: bool,
}

struct ScheduledItem {
    deadline: Timestamp,
    sequence: u64,
    task: Arc<Task>,
}

impl PartialEq for ScheduledItem {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}
impl Eq for ScheduledItem {}

impl PartialOrd for ScheduledItem {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledItem {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline.cmp(&other.deadline).then(self.sequence.cmp(&other.sequence))
    }
}

struct SchedulerCore {
    clock: Arc<dyn Clock>,
    virtual_clock: Option<Arc<VirtualClock>>,
    intake: SegQueue<Arc<Task>>,
    heap: Mutex<BinaryHeap<Reverse<ScheduledItem>>>,
    waitable: Waitable,
    sequence: AtomicU64,
    overruns: AtomicU64,
    overrun_at: Timestamp,
    acceptable_task_preplay: Timestamp,
    no_delay: bool,
    paused: AtomicBool,
    pause_gate: Waitable,
    ready_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl SchedulerCore {
    /// Drains the intake queue into the ordered heap, resolving each task's effective
    /// deadline from `run_at`/`run_in`/immediate-fire (§4.6) the first time it is seen.
    async fn drain_intake(&self) {
        while let Some(task) = self.intake.pop() {
            let deadline = match task.explicit_run_at() {
                Some(deadline) => deadline,
                None => self.clock.now().await + task.run_in().unwrap_or(0),
            };
            task.set_effective_deadline(deadline);
            let sequence = task.sequence();
            let mut heap = self.heap.lock().unwrap();
            heap.push(Reverse(ScheduledItem { deadline, sequence, task }));
        }
    }

    fn heap_is_empty(&self) -> bool {
        self.heap.lock().unwrap().is_empty()
    }

    async fn run_loop(&self, should_stop: Arc<AtomicBool>) {
        if let Some(tx) = self.ready_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        loop {
            if should_stop.load(Ordering::Acquire) {
                return;
            }
            self.drain_intake().await;

            if self.paused.load(Ordering::Acquire) {
                self.pause_gate.wait(|| !self.paused.load(Ordering::Acquire)).await;
                continue;
            }

            let next_deadline = {
                let heap = self.heap.lock().unwrap();
                heap.peek().map(|Reverse(item)| item.deadline)
            };

            let Some(deadline) = next_deadline else {
                self.waitable
                    .wait(|| should_stop.load(Ordering::Acquire) || !self.heap_is_empty())
                    .await;
                continue;
            };

            let now = self.clock.now().await;
            let delta = deadline - now;

            if delta > self.acceptable_task_preplay {
                if self.no_delay {
                    if let Some(vc) = &self.virtual_clock {
                        vc.advance_to(deadline).await;
                    }
                } else {
                    let wait_ns = delta.min(INTAKE_POLL_INTERVAL_NS).max(0) as u64;
                    self.waitable
                        .wait_for(std::time::Duration::from_nanos(wait_ns), || {
                            should_stop.load(Ordering::Acquire)
                        })
                        .await;
                }
                continue;
            }

            let item = {
                let mut heap = self.heap.lock().unwrap();
                heap.pop().map(|Reverse(item)| item)
            };
            let Some(item) = item else { continue };

            if delta < -self.overrun_at {
                self.overruns.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    label = item.task.debug_label(),
                    lag_ns = -delta,
                    "task overran its deadline"
                );
            }

            let outcome = item.task.run().await;
            match outcome {
                Ok(TaskOutcome::Continue) => {
                    if let Some(period) = item.task.reschedule_time() {
                        let new_deadline = item.deadline + period;
                        item.task.set_effective_deadline(new_deadline);
                        let mut heap = self.heap.lock().unwrap();
                        heap.push(Reverse(ScheduledItem {
                            deadline: new_deadline,
                            sequence: item.sequence,
                            task: item.task,
                        }));
                    }
                }
                Ok(TaskOutcome::Stop) => {}
                Err(reason) => {
                    tracing::warn!(label = item.task.debug_label(), %reason, "task frame failed");
                }
            }
        }
    }
}

struct SchedulerRunnable {
    core: Arc<SchedulerCore>,
}

#[async_trait]
impl Runnable for SchedulerRunnable {
    async fn run(&self, should_stop: Arc<AtomicBool>) -> bool {
        self.core.run_loop(should_stop).await;
        false
    }
}

/// Runs submitted tasks on a single background task. See module docs and the crate's
/// design notes for the full scheduling contract.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    worker: Worker,
    controller: ServiceController,
    start_synchronised: bool,
}

impl From<SchedulerConfig> for Scheduler {
    fn from(config: SchedulerConfig) -> Self {
        let (clock, virtual_clock): (Arc<dyn Clock>, Option<Arc<VirtualClock>>) = if config.no_delay {
            let vc = Arc::new(VirtualClock::from_epoch());
            (vc.clone() as Arc<dyn Clock>, Some(vc))
        } else {
            (config.clock, None)
        };

        let core = Arc::new(SchedulerCore {
            clock: clock.clone(),
            virtual_clock,
            intake: SegQueue::new(),
            heap: Mutex::new(BinaryHeap::new()),
            waitable: Waitable::new(clock.clone()),
            sequence: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            overrun_at: config.overrun_at,
            acceptable_task_preplay: config.acceptable_task_preplay,
            no_delay: config.no_delay,
            paused: AtomicBool::new(false),
            pause_gate: Waitable::new(clock),
            ready_tx: Mutex::new(None),
        });

        let runnable: Arc<dyn Runnable> = Arc::new(SchedulerRunnable { core: core.clone() });
        Self {
            core,
            worker: Worker::new(runnable),
            controller: ServiceController::new(),
            start_synchronised: config.start_synchronised,
        }
    }
}

impl Scheduler {
    /// Starts building a `Scheduler` via `typed-builder`.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfig::builder()
    }

    /// Submits a task. Its effective deadline is resolved (from `run_at`, `run_in`, or
    /// immediate fire) the next time the scheduling loop drains the intake queue — not
    /// synchronously here, so a task submitted from within a running task on this same
    /// scheduler only becomes visible on the *next* iteration (§5, ordering guarantee 4).
    ///
    /// The task's sequence number is assigned here, from this scheduler's own counter,
    /// overwriting whatever value it was constructed with — equal-deadline tasks always
    /// fire in `submit()` call order, not in whatever order (or non-order) callers happened
    /// to pass to `Task::new`.
    pub fn submit(&self, task: Arc<Task>) {
        let sequence = self.core.sequence.fetch_add(1, Ordering::Relaxed);
        task.set_sequence(sequence);
        self.core.intake.push(task);
        self.core.waitable.notify_all();
    }

    /// Drops every pending (not yet started) task. The currently running task, if any, is
    /// never interrupted.
    pub fn clear_tasks(&self) {
        let mut heap = self.core.heap.lock().unwrap();
        heap.clear();
        while self.core.intake.pop().is_some() {}
    }

    /// The number of tasks whose fire-time lag has exceeded `overrun_at` so far.
    pub fn overrun_count(&self) -> u64 {
        self.core.overruns.load(Ordering::Relaxed)
    }

    /// Pauses the main loop before its next `run()`. The currently executing task finishes.
    pub fn pause(&self) {
        self.core.paused.store(true, Ordering::Release);
    }

    /// Resumes a paused scheduler.
    pub fn resume(&self) {
        self.core.paused.store(false, Ordering::Release);
        self.core.pause_gate.notify_all();
    }

    /// `true` if currently paused.
    pub fn is_paused(&self) -> bool {
        self.core.paused.load(Ordering::Acquire)
    }

    /// The clock this scheduler is driven by (the private [`VirtualClock`] in `no_delay`
    /// mode, else the configured clock).
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.core.clock
    }

    /// The internal virtual clock, when running in `no_delay` mode. `None` otherwise.
    pub fn virtual_clock(&self) -> Option<&Arc<VirtualClock>> {
        self.core.virtual_clock.as_ref()
    }
}

#[async_trait]
impl Service for Scheduler {
    async fn setup(&self) -> Result<(), ServiceError> {
        self.controller.run_setup(async { Ok(()) }).await
    }

    async fn init(&self) -> Result<(), ServiceError> {
        self.controller.run_init(async { Ok(()) }).await
    }

    async fn start(&self) -> Result<(), ServiceError> {
        let core = self.core.clone();
        let start_synchronised = self.start_synchronised;
        self.controller
            .run_start(async move {
                let ready_rx = if start_synchronised {
                    let (tx, rx) = oneshot::channel();
                    *core.ready_tx.lock().unwrap() = Some(tx);
                    Some(rx)
                } else {
                    None
                };
                self.worker.start("scheduler");
                if let Some(rx) = ready_rx {
                    let _ = rx.await;
                }
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.controller
            .run_stop(async {
                self.worker.stop();
                self.core.waitable.notify_all();
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
    use crate::task::{TaskFrame, TaskPriority};
    use std::sync::atomic::AtomicI64;
    use std::time::Duration;

    struct RecordingFrame {
        fired_at: Arc<AtomicI64>,
        clock: Arc<dyn Clock>,
        outcome: TaskOutcome,
    }

    #[async_trait]
    impl TaskFrame for RecordingFrame {
        async fn execute(&self) -> Result<TaskOutcome, String> {
            let now = self.clock.now().await;
            self.fired_at.store(now, Ordering::SeqCst);
            Ok(self.outcome)
        }
    }

    #[tokio::test]
    async fn one_shot_task_fires_in_no_delay_mode() {
        let scheduler: Scheduler = Scheduler::builder().no_delay(true).build();
        scheduler.start().await.unwrap();

        let fired_at = Arc::new(AtomicI64::new(-1));
        let clock = scheduler.clock().clone();
        let task = Arc::new(Task::new(
            Arc::new(RecordingFrame { fired_at: fired_at.clone(), clock, outcome: TaskOutcome::Stop }),
            None,
            Some(5_000_000),
            None,
            TaskPriority::Moderate,
            "one-shot",
            0,
        ));
        scheduler.submit(task);

        tokio::time::timeout(Duration::from_secs(1), async {
            while fired_at.load(Ordering::SeqCst) < 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task should fire");

        assert_eq!(fired_at.load(Ordering::SeqCst), 5_000_000);
        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn overrun_is_counted_for_a_severely_late_deadline() {
        let scheduler: Scheduler = Scheduler::builder()
            .no_delay(true)
            .overrun_at(1_000)
            .build();
        scheduler.start().await.unwrap();

        let fired_at = Arc::new(AtomicI64::new(-1));
        let clock = scheduler.clock().clone();
        scheduler.virtual_clock().unwrap().advance_to(1_000_000).await;

        let task = Arc::new(Task::new(
            Arc::new(RecordingFrame { fired_at: fired_at.clone(), clock, outcome: TaskOutcome::Stop }),
            Some(0),
            None,
            None,
            TaskPriority::Moderate,
            "late",
            0,
        ));
        scheduler.submit(task);

        tokio::time::timeout(Duration::from_secs(1), async {
            while fired_at.load(Ordering::SeqCst) < 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("late task should still fire");

        assert_eq!(scheduler.overrun_count(), 1);
        scheduler.stop().await.unwrap();
    }
}
