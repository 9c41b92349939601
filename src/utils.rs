use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since an unspecified epoch, monotonic per [`crate::clock::Clock`] instance.
///
/// Every clock in this crate hands out its own `Timestamp` line: comparing timestamps
/// produced by two different clocks is meaningless, comparing two timestamps from the
/// same clock instance is always well-defined.
pub type Timestamp = i64;

/// Converts a [`SystemTime`] to nanoseconds since the Unix epoch, saturating rather than
/// panicking on absurd (pre-1677 / post-2262) inputs.
pub(crate) fn system_time_to_nanos(t: SystemTime) -> Timestamp {
    match t.duration_since(UNIX_EPOCH) {
        Ok(dur) => dur.as_nanos().min(i64::MAX as u128) as i64,
        Err(e) => -(e.duration().as_nanos().min(i64::MAX as u128) as i64),
    }
}

/// Converts nanoseconds since the Unix epoch back to a [`SystemTime`].
pub(crate) fn nanos_to_system_time(nanos: Timestamp) -> SystemTime {
    if nanos >= 0 {
        UNIX_EPOCH + Duration::from_nanos(nanos as u64)
    } else {
        UNIX_EPOCH - Duration::from_nanos((-nanos) as u64)
    }
}

/// Converts a [`Duration`] to a signed nanosecond count, saturating at `i64::MAX`.
pub(crate) fn duration_to_nanos(d: Duration) -> i64 {
    d.as_nanos().min(i64::MAX as u128) as i64
}
