//! A single schedulable unit of work.

pub mod priority;

pub use priority::TaskPriority;

use crate::utils::Timestamp;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// What a [`TaskFrame`] reports back to the scheduler after running once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Allow rescheduling if the owning [`Task`] is periodic.
    Continue,
    /// Suppress rescheduling regardless of the task's `reschedule_time`.
    Stop,
}

/// The payload a [`Task`] runs. An `Err` return is treated identically to
/// `TaskOutcome::Stop`: logged with the task's `debug_label` and the task is not
/// rescheduled, but the scheduler loop is otherwise untouched — a single misbehaving frame
/// never poisons the queue.
///
/// # Object Safety
/// Object safe; every `Task` stores its frame as `Arc<dyn TaskFrame>`.
#[async_trait]
pub trait TaskFrame: Send + Sync {
    /// Runs the unit of work once.
    async fn execute(&self) -> Result<TaskOutcome, String>;
}

/// How a periodic task's overlapping/rescheduling is handled. Only `Sequential` is
/// implemented in this crate: the scheduler runs a task to completion before computing its
/// next firing. A richer policy zoo (concurrent overlap, cancel-previous, cancel-current)
/// is left for future extension — see DESIGN.md Open Questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleStrategy {
    /// Run to completion, then compute the next deadline from the one just fired.
    #[default]
    Sequential,
}

/// A schedulable unit of work. Immutable after submission except for the
/// scheduler-managed `run_at` deadline, which the scheduler advances in place as a
/// periodic task reschedules.
pub struct Task {
    frame: std::sync::Arc<dyn TaskFrame>,
    /// Absolute deadline in nanoseconds on the owning scheduler's clock. `i64::MIN` until
    /// the scheduler computes it at submission time from `run_in`/immediate-fire.
    run_at: AtomicI64,
    run_in: Option<Timestamp>,
    reschedule_time: Option<Timestamp>,
    priority: TaskPriority,
    debug_label: String,
    schedule_strategy: ScheduleStrategy,
    sequence: AtomicU64,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("debug_label", &self.debug_label)
            .field("run_at", &self.run_at.load(Ordering::Relaxed))
            .field("reschedule_time", &self.reschedule_time)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

impl Task {
    /// Builds a one-shot or periodic task. `run_at`/`run_in` are resolved to an effective
    /// deadline by the scheduler at submission time (§4.6): `run_at` wins if set, else
    /// `clock.now() + run_in`, else immediate.
    ///
    /// `sequence` is a caller-supplied placeholder only: [`crate::scheduler::Scheduler::submit`]
    /// overwrites it with its own monotonically increasing counter, so equal-deadline tasks
    /// always fire in submission order regardless of what is passed here. Callers that never
    /// go through `Scheduler::submit` (e.g. direct `Task::run` in tests) may rely on the
    /// value given at construction.
    pub fn new(
        frame: std::sync::Arc<dyn TaskFrame>,
        run_at: Option<Timestamp>,
        run_in: Option<Timestamp>,
        reschedule_time: Option<Timestamp>,
        priority: TaskPriority,
        debug_label: impl Into<String>,
        sequence: u64,
    ) -> Self {
        Self {
            frame,
            run_at: AtomicI64::new(run_at.unwrap_or(i64::MIN)),
            run_in,
            reschedule_time,
            priority,
            debug_label: debug_label.into(),
            schedule_strategy: ScheduleStrategy::Sequential,
            sequence: AtomicU64::new(sequence),
        }
    }

    /// The explicit absolute deadline passed at construction, if any (`None` means it must
    /// be derived from `run_in` or fired immediately).
    pub fn explicit_run_at(&self) -> Option<Timestamp> {
        let v = self.run_at.load(Ordering::Acquire);
        if v == i64::MIN {
            None
        } else {
            Some(v)
        }
    }

    /// The relative delay from submission, if `run_at` was not set explicitly.
    pub fn run_in(&self) -> Option<Timestamp> {
        self.run_in
    }

    /// The periodic reschedule interval; `None` means one-shot.
    pub fn reschedule_time(&self) -> Option<Timestamp> {
        self.reschedule_time
    }

    /// This task's priority.
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// A human-readable label used in logs and error messages.
    pub fn debug_label(&self) -> &str {
        &self.debug_label
    }

    /// The reschedule/overlap policy (currently always `Sequential`).
    pub fn schedule_strategy(&self) -> ScheduleStrategy {
        self.schedule_strategy
    }

    /// The insertion sequence number, used to break ties between equal deadlines.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Overwrites the insertion sequence number. Only the owning scheduler calls this, at
    /// submission time, so it can enforce FIFO tie-break order itself rather than trust
    /// whatever value the caller passed to [`Task::new`].
    pub fn set_sequence(&self, sequence: u64) {
        self.sequence.store(sequence, Ordering::Release);
    }

    /// Overwrites the effective deadline. Only the owning scheduler calls this, when
    /// resolving a task at submission time or advancing a periodic task's deadline by
    /// `old_deadline + reschedule_time`.
    pub fn set_effective_deadline(&self, deadline: Timestamp) {
        self.run_at.store(deadline, Ordering::Release);
    }

    /// The current effective deadline, once resolved by the scheduler.
    pub fn effective_deadline(&self) -> Timestamp {
        self.run_at.load(Ordering::Acquire)
    }

    /// Runs the task's frame once.
    pub async fn run(&self) -> Result<TaskOutcome, String> {
        self.frame.execute().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingFrame {
        runs: Arc<AtomicUsize>,
        outcome: TaskOutcome,
    }

    #[async_trait]
    impl TaskFrame for CountingFrame {
        async fn execute(&self) -> Result<TaskOutcome, String> {
            self.runs.fetch_add(1, Ordering::Relaxed);
            Ok(self.outcome)
        }
    }

    #[tokio::test]
    async fn run_invokes_frame_and_reports_outcome() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = Task::new(
            Arc::new(CountingFrame { runs: runs.clone(), outcome: TaskOutcome::Continue }),
            None,
            Some(1_000_000),
            Some(1_000_000),
            TaskPriority::Moderate,
            "t1",
            0,
        );
        let outcome = task.run().await.unwrap();
        assert_eq!(outcome, TaskOutcome::Continue);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn effective_deadline_starts_unresolved_when_run_at_is_none() {
        let task = Task::new(
            Arc::new(CountingFrame {
                runs: Arc::new(AtomicUsize::new(0)),
                outcome: TaskOutcome::Stop,
            }),
            None,
            None,
            None,
            TaskPriority::Low,
            "t2",
            1,
        );
        assert_eq!(task.explicit_run_at(), None);
        task.set_effective_deadline(42);
        assert_eq!(task.effective_deadline(), 42);
    }
}
