/// The importance of a [`crate::task::Task`], used by the scheduler's overrun accounting
/// and logging (a `CRITICAL` task lagging past `overrun_at` is logged at a higher level
/// than a `LOW` one) — priority never changes execution order within the deadline heap
/// itself; deadline order is always authoritative.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Must fire at its exact deadline; an overrun here is always worth surfacing.
    Critical,
    /// Time drifts are improbable but possible under extreme load.
    Important,
    /// Time drifts are rare and small under heavy load.
    High,
    /// The default: minor drift under heavier load is acceptable.
    #[default]
    Moderate,
    /// Background work; drift under load is expected and fine.
    Low,
}
