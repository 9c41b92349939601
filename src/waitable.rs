use crate::clock::Clock;
use crate::utils::Timestamp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// The outcome of a predicate wait on a [`Waitable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate became true.
    Satisfied,
    /// The deadline was reached (or, for the clock-driven forms, already past) before the
    /// predicate became true.
    TimedOut,
    /// [`Waitable::cancel_loop`] was called; the predicate's truth value is irrelevant.
    Cancelled,
}

impl WaitOutcome {
    /// `true` for [`WaitOutcome::Satisfied`].
    pub fn is_satisfied(self) -> bool {
        matches!(self, WaitOutcome::Satisfied)
    }
}

/// A clock-aware notify primitive: the synchronisation building block every service loop in
/// this crate (`Worker`, `StepWorker`, `Scheduler`) idles on.
///
/// A [`Waitable`] binds a [`Clock`] so that every time-bounded wait consults that clock instead
/// of the wall clock directly. When the bound clock is a [`crate::clock::VirtualClock`], a wait
/// whose deadline has not been virtually reached returns `TimedOut` immediately rather than
/// really sleeping — advancing the clock is the caller's job (normally the owning
/// [`crate::scheduler::Scheduler`]'s loop).
///
/// Only *predicate* waits are exposed: there is no bare `wait()` that returns on a spurious
/// wake with nothing checked, because every caller in this crate needs the recheck-after-wake
/// discipline to be correct (§4.2 of the design: "every predicate wait re-checks the predicate
/// on spurious wake-up and on notification").
#[derive(Debug)]
pub struct Waitable {
    clock: Arc<dyn Clock>,
    notify: Notify,
    cancelled: AtomicBool,
}

impl Waitable {
    /// Creates a new `Waitable` bound to `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            notify: Notify::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// The clock this waitable consults for all time-bounded waits.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Waits until `predicate` returns `true` or [`Waitable::cancel_loop`] is called. There is
    /// no timeout; callers that need one should use [`Waitable::wait_for`] or
    /// [`Waitable::wait_until`].
    pub async fn wait<F>(&self, mut predicate: F) -> WaitOutcome
    where
        F: FnMut() -> bool,
    {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return WaitOutcome::Cancelled;
            }
            if predicate() {
                return WaitOutcome::Satisfied;
            }
            let notified = self.notify.notified();
            // Re-check between registering interest and awaiting it, closing the race where a
            // notification lands in between the predicate check above and the `notified()` call.
            if self.cancelled.load(Ordering::Acquire) {
                return WaitOutcome::Cancelled;
            }
            if predicate() {
                return WaitOutcome::Satisfied;
            }
            notified.await;
        }
    }

    /// Waits until `predicate` returns `true`, the clock-relative `duration` elapses, or the
    /// wait is cancelled.
    pub async fn wait_for<F>(&self, duration: Duration, predicate: F) -> WaitOutcome
    where
        F: FnMut() -> bool,
    {
        let deadline = self.clock.now().await + crate::utils::duration_to_nanos(duration);
        self.wait_until(deadline, predicate).await
    }

    /// Waits until `predicate` returns `true`, the bound clock reaches `deadline`, or the wait
    /// is cancelled.
    ///
    /// If the bound clock's `now()` is already at or past `deadline` when this is called, the
    /// predicate is still evaluated once before returning `TimedOut` — a task submitted with a
    /// past deadline must still be observed as "ready", per the scheduler's overrun semantics.
    pub async fn wait_until<F>(&self, deadline: Timestamp, mut predicate: F) -> WaitOutcome
    where
        F: FnMut() -> bool,
    {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return WaitOutcome::Cancelled;
            }
            if predicate() {
                return WaitOutcome::Satisfied;
            }
            if self.clock.now().await >= deadline {
                return WaitOutcome::TimedOut;
            }
            let notified = self.notify.notified();
            if self.cancelled.load(Ordering::Acquire) {
                return WaitOutcome::Cancelled;
            }
            if predicate() {
                return WaitOutcome::Satisfied;
            }
            tokio::select! {
                _ = notified => continue,
                _ = self.clock.idle_until(deadline) => {
                    if predicate() {
                        return WaitOutcome::Satisfied;
                    }
                    return WaitOutcome::TimedOut;
                }
            }
        }
    }

    /// Wakes exactly one task parked in a predicate wait, which will then re-check its
    /// predicate (it may go back to waiting if the predicate is still false).
    pub fn notify_one(&self) {
        self.notify.notify_one();
    }

    /// Wakes every task currently parked in a predicate wait.
    pub fn notify_all(&self) {
        self.notify.notify_waiters();
    }

    /// Forces every current and future predicate wait on this instance to return
    /// [`WaitOutcome::Cancelled`] until [`Waitable::clear_cancel`] is called.
    pub fn cancel_loop(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resets the cancellation flag set by [`Waitable::cancel_loop`], allowing the waitable to
    /// be reused.
    pub fn clear_cancel(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    /// `true` if [`Waitable::cancel_loop`] has been called and not yet cleared.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{AdvanceableClock, SteadyClock, VirtualClock};
    use std::sync::atomic::AtomicBool as StdAtomicBool;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_for_returns_immediately_on_virtual_clock_when_not_satisfied() {
        let clock = Arc::new(VirtualClock::from_epoch());
        let waitable = Waitable::new(clock);
        let before = tokio::time::Instant::now();
        let outcome = waitable.wait_for(Duration::from_secs(5), || false).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(before.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_satisfied_predicate_returns_immediately() {
        let clock = Arc::new(SteadyClock::new());
        let waitable = Waitable::new(clock);
        let outcome = waitable.wait(|| true).await;
        assert_eq!(outcome, WaitOutcome::Satisfied);
    }

    #[tokio::test]
    async fn cancel_loop_unblocks_pending_wait() {
        let clock = Arc::new(SteadyClock::new());
        let waitable = Arc::new(Waitable::new(clock));
        let w2 = waitable.clone();
        let handle = tokio::spawn(async move { w2.wait(|| false).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        waitable.cancel_loop();

        let outcome = tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("wait should unblock promptly")
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn wait_until_wakes_when_virtual_clock_advances_past_deadline() {
        let clock = Arc::new(VirtualClock::from_epoch());
        let waitable = Arc::new(Waitable::new(clock.clone()));
        let flag = Arc::new(StdAtomicBool::new(false));
        let flag2 = flag.clone();
        let w2 = waitable.clone();

        let handle = tokio::spawn(async move {
            let outcome = w2.wait_until(1_000_000_000, || flag2.load(Ordering::Acquire)).await;
            outcome
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        clock.advance_to(1_000_000_000).await;

        let outcome = tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }
}
