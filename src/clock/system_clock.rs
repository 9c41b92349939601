use crate::clock::Clock;
use crate::utils::{nanos_to_system_time, system_time_to_nanos};
use crate::utils::Timestamp;
use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// Wall-clock time via [`SystemTime::now`]. This is the clock a caller reaches for when they
/// want timestamps that mean something outside the process (logs, cross-process correlation),
/// at the cost of being able to jump backward if the OS clock is adjusted.
///
/// Prefer [`crate::clock::SteadyClock`] for anything that only cares about elapsed duration,
/// such as the default [`crate::scheduler::Scheduler`] clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    async fn now(&self) -> Timestamp {
        system_time_to_nanos(SystemTime::now())
    }

    fn is_steady(&self) -> bool {
        false
    }

    async fn idle_until(&self, deadline: Timestamp) {
        let target = nanos_to_system_time(deadline);
        match target.duration_since(SystemTime::now()) {
            Ok(remaining) => tokio::time::sleep(remaining).await,
            Err(_) => {
                // Already past, possibly because the wall clock jumped forward underneath us.
            }
        }
    }
}

impl SystemClock {
    /// Converts a duration from now into an absolute [`Timestamp`] on this clock.
    pub async fn deadline_in(&self, duration: Duration) -> Timestamp {
        self.now().await + crate::utils::duration_to_nanos(duration)
    }
}
