use crate::clock::Clock;
use crate::utils::Timestamp;
use async_trait::async_trait;
use std::time::Instant;

/// Monotonic time derived from [`std::time::Instant`]. Never goes backward within one
/// `SteadyClock` instance, which is why the default [`crate::scheduler::SchedulerConfig`]
/// builds its scheduler on this clock rather than [`crate::clock::SystemClock`].
///
/// Timestamps from two different `SteadyClock` instances are not comparable: each instance
/// anchors its own nanosecond line to the `Instant` it was constructed at.
#[derive(Debug, Clone)]
pub struct SteadyClock {
    epoch: Instant,
}

impl SteadyClock {
    /// Creates a new clock anchored at the current instant (nanosecond zero).
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for SteadyClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SteadyClock {
    async fn now(&self) -> Timestamp {
        crate::utils::duration_to_nanos(self.epoch.elapsed())
    }

    fn is_steady(&self) -> bool {
        true
    }

    async fn idle_until(&self, deadline: Timestamp) {
        let now = self.now().await;
        if deadline > now {
            tokio::time::sleep(std::time::Duration::from_nanos((deadline - now) as u64)).await;
        }
    }
}
