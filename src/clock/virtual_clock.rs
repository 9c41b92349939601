use crate::clock::{AdvanceableClock, Clock};
use crate::utils::Timestamp;
use async_trait::async_trait;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Notify;

/// A clock that never moves on its own; it only advances when [`AdvanceableClock::advance`] or
/// [`AdvanceableClock::advance_to`] is called explicitly.
///
/// [`crate::scheduler::Scheduler`] owns one of these internally when configured with
/// `no_delay(true)`: instead of really sleeping until a task's deadline, the scheduler jumps the
/// clock straight there, so a timeline scheduled over hours replays in milliseconds. Nothing
/// outside the owning scheduler should construct or advance one directly outside of tests.
///
/// # Example
/// ```ignore
/// use dataflow_rt::clock::{AdvanceableClock, Clock, VirtualClock};
///
/// # async fn run() {
/// let clock = VirtualClock::from_nanos(0);
/// assert_eq!(clock.now().await, 0);
/// clock.advance(std::time::Duration::from_secs(1)).await;
/// assert_eq!(clock.now().await, 1_000_000_000);
/// # }
/// ```
pub struct VirtualClock {
    current: AtomicI64,
    notify: Notify,
}

impl Debug for VirtualClock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualClock")
            .field("current_ns", &self.current.load(Ordering::Relaxed))
            .finish()
    }
}

impl VirtualClock {
    /// Creates a virtual clock starting at nanosecond `initial`.
    pub fn from_nanos(initial: Timestamp) -> Self {
        Self {
            current: AtomicI64::new(initial),
            notify: Notify::new(),
        }
    }

    /// Creates a virtual clock starting at nanosecond zero.
    pub fn from_epoch() -> Self {
        Self::from_nanos(0)
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::from_epoch()
    }
}

#[async_trait]
impl Clock for VirtualClock {
    async fn now(&self) -> Timestamp {
        self.current.load(Ordering::Acquire)
    }

    fn is_steady(&self) -> bool {
        true
    }

    async fn idle_until(&self, deadline: Timestamp) {
        loop {
            if self.current.load(Ordering::Acquire) >= deadline {
                return;
            }
            // Race window: an advance landing between the load above and this call is still
            // observed, because `notify_waiters` only wakes tasks already parked on `notified`
            // and a fresh `notified()` future immediately re-checks the predicate.
            let notified = self.notify.notified();
            if self.current.load(Ordering::Acquire) >= deadline {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl AdvanceableClock for VirtualClock {
    async fn advance_to(&self, to: Timestamp) {
        let mut current = self.current.load(Ordering::Acquire);
        while to > current {
            match self.current.compare_exchange_weak(
                current,
                to,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.notify.notify_waiters();
    }
}
