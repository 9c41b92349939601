use async_trait::async_trait;
use dataflow_rt::clock::Clock;
use dataflow_rt::scheduler::Scheduler;
use dataflow_rt::service::{Service, ServiceState};
use dataflow_rt::task::{Task, TaskFrame, TaskOutcome, TaskPriority};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct PeriodicFrame {
    count: Arc<AtomicU64>,
    last: Arc<AtomicI64>,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl TaskFrame for PeriodicFrame {
    async fn execute(&self) -> Result<TaskOutcome, String> {
        let now = self.clock.now().await;
        self.last.store(now, Ordering::SeqCst);
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        if n >= 2 {
            Ok(TaskOutcome::Stop)
        } else {
            Ok(TaskOutcome::Continue)
        }
    }
}

#[tokio::test]
async fn periodic_task_preserves_phase_without_drift() {
    let scheduler: Scheduler = Scheduler::builder().no_delay(true).build();
    scheduler.start().await.unwrap();

    let fire_count = Arc::new(AtomicU64::new(0));
    let last_deadline = Arc::new(AtomicI64::new(-1));
    let clock = scheduler.clock().clone();

    let task = Arc::new(Task::new(
        Arc::new(PeriodicFrame { count: fire_count.clone(), last: last_deadline.clone(), clock }),
        Some(0),
        None,
        Some(10_000_000),
        TaskPriority::Moderate,
        "periodic",
        0,
    ));
    scheduler.submit(task);

    tokio::time::timeout(Duration::from_secs(1), async {
        while fire_count.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task should fire three times");

    assert_eq!(last_deadline.load(Ordering::SeqCst), 20_000_000);
    scheduler.stop().await.unwrap();
}

struct OrderRecordingFrame {
    label: &'static str,
    order: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl TaskFrame for OrderRecordingFrame {
    async fn execute(&self) -> Result<TaskOutcome, String> {
        self.order.lock().unwrap().push(self.label);
        Ok(TaskOutcome::Stop)
    }
}

#[tokio::test]
async fn equal_deadlines_fire_in_submission_order() {
    let scheduler: Scheduler = Scheduler::builder().no_delay(true).build();
    scheduler.start().await.unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));

    // Both tasks share the same `run_in` deadline, so firing order depends entirely on the
    // sequence number the scheduler assigns at `submit` time. Passing `sequence: 9` and
    // `sequence: 0` here (reversed from submission order) proves `submit` overwrites whatever
    // the caller supplied rather than trusting it.
    let first = Arc::new(Task::new(
        Arc::new(OrderRecordingFrame { label: "first", order: order.clone() }),
        None,
        Some(0),
        None,
        TaskPriority::Moderate,
        "first",
        9,
    ));
    let second = Arc::new(Task::new(
        Arc::new(OrderRecordingFrame { label: "second", order: order.clone() }),
        None,
        Some(0),
        None,
        TaskPriority::Moderate,
        "second",
        0,
    ));
    scheduler.submit(first);
    scheduler.submit(second);

    tokio::time::timeout(Duration::from_secs(1), async {
        while order.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("both tasks should fire");

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    scheduler.stop().await.unwrap();
}

#[tokio::test]
async fn stop_unblocks_promptly_with_an_empty_queue() {
    let scheduler: Scheduler = Scheduler::builder().build();
    scheduler.start().await.unwrap();
    tokio::time::timeout(Duration::from_millis(500), scheduler.stop())
        .await
        .expect("stop should not hang")
        .unwrap();
    assert_eq!(scheduler.state(), ServiceState::Stopped);
}
