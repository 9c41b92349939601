pub mod steady_clock;
pub mod system_clock;
pub mod virtual_clock;

use crate::utils::Timestamp;
use async_trait::async_trait;
use std::fmt::Debug;
use std::ops::Deref;
use std::time::Duration;

pub use steady_clock::SteadyClock;
pub use system_clock::SystemClock;
pub use virtual_clock::VirtualClock;

/// [`Clock`] is the time source every [`crate::waitable::Waitable`], [`crate::worker::Worker`]
/// and [`crate::scheduler::Scheduler`] idles against. It hands out [`Timestamp`]s (signed
/// nanoseconds on that clock's own line) and knows how to park the calling task until one of
/// those timestamps is reached.
///
/// # Required Methods
/// Implementors supply [`Clock::now`] and [`Clock::idle_until`]; both are used throughout the
/// scheduling core instead of reaching for `tokio::time` or `SystemTime` directly, so that a
/// [`VirtualClock`] can be substituted transparently in tests.
///
/// # Implementations
/// - [`SystemClock`] — wall-clock time, can jump backward (NTP adjustment, manual clock set).
/// - [`SteadyClock`] — monotonic time from [`std::time::Instant`], the default for
///   [`crate::scheduler::Scheduler`].
/// - [`VirtualClock`] — simulated time that only moves when explicitly advanced; see
///   [`AdvanceableClock`].
///
/// # Object Safety
/// This trait is object safe and is always stored behind `Arc<dyn Clock>` in this crate.
#[async_trait]
pub trait Clock: Debug + Send + Sync {
    /// Returns the current time on this clock's own line, in nanoseconds.
    async fn now(&self) -> Timestamp;

    /// Returns `true` for clocks that are guaranteed never to move backward
    /// ([`SteadyClock`], [`VirtualClock`]); `false` for [`SystemClock`].
    fn is_steady(&self) -> bool;

    /// Idles the calling task until `deadline` is reached on this clock. If `deadline` is
    /// already at or before `now()`, returns immediately without suspending.
    async fn idle_until(&self, deadline: Timestamp);
}

#[async_trait]
impl<T> Clock for T
where
    T: Deref + Send + Sync + Debug,
    T::Target: Clock,
{
    async fn now(&self) -> Timestamp {
        self.deref().now().await
    }

    fn is_steady(&self) -> bool {
        self.deref().is_steady()
    }

    async fn idle_until(&self, deadline: Timestamp) {
        self.deref().idle_until(deadline).await
    }
}

/// Extension trait for clocks whose time can be moved by the program rather than the OS.
/// Only [`VirtualClock`] implements it; it is what lets a [`crate::scheduler::Scheduler`] in
/// no-delay mode jump straight to the next task's deadline instead of really sleeping.
#[async_trait]
pub trait AdvanceableClock: Clock {
    /// Moves the clock's current time forward by `duration`.
    async fn advance(&self, duration: Duration) {
        let now = self.now().await;
        self.advance_to(now + crate::utils::duration_to_nanos(duration)).await
    }

    /// Sets the clock's current time to exactly `to`. Implementations must wake any task
    /// parked in [`Clock::idle_until`] whose deadline has now been reached or passed.
    async fn advance_to(&self, to: Timestamp);
}

#[async_trait]
impl<T> AdvanceableClock for T
where
    T: Deref + Send + Sync + Debug,
    T::Target: AdvanceableClock,
{
    async fn advance(&self, duration: Duration) {
        self.deref().advance(duration).await
    }

    async fn advance_to(&self, to: Timestamp) {
        self.deref().advance_to(to).await
    }
}
