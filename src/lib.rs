//! A systems toolkit built around a real-time task scheduler and a typed
//! device/channel dataflow graph.
//!
//! The crate is organized bottom-up:
//! - [`clock`] and [`waitable`] provide the timing primitives everything else idles on.
//! - [`array`] is the typed, runtime-tagged buffer that flows through [`channel`]s.
//! - [`node`] gives every long-lived object a place in a named tree.
//! - [`service`] is the lifecycle state machine [`worker`], [`step_worker`] and
//!   [`scheduler`] all implement.
//! - [`task`] and [`scheduler`] are the scheduling core.
//! - [`channel`] and [`device`] compose into the dataflow graph that [`devfilter`]
//!   demonstrates end-to-end.
//! - [`poll`] and [`process`] are a small I/O-driven corner used by nothing else in
//!   the crate but kept independently testable.

#[allow(missing_docs)]
pub mod array;

#[allow(missing_docs)]
pub mod channel;

#[allow(missing_docs)]
pub mod clock;

#[allow(missing_docs)]
pub mod device;

#[allow(missing_docs)]
pub mod devfilter;

#[allow(missing_docs)]
pub mod errors;

#[allow(missing_docs)]
pub mod node;

#[allow(missing_docs)]
pub mod poll;

#[allow(missing_docs)]
pub mod process;

#[allow(missing_docs)]
pub mod scheduler;

#[allow(missing_docs)]
pub mod service;

#[allow(missing_docs)]
pub mod step_worker;

#[allow(missing_docs)]
pub mod task;

#[allow(missing_docs)]
pub(crate) mod utils;

#[allow(missing_docs)]
pub mod waitable;

#[allow(missing_docs)]
pub mod worker;

/// Re-exports the pieces most consumers need without chasing individual modules.
pub mod prelude {
    pub use crate::array::{Array, ArrayView, ElementType, Value};
    pub use crate::channel::{Channel, ChannelObserver, ObserverId};
    pub use crate::clock::{Clock, SteadyClock, SystemClock, VirtualClock};
    pub use crate::device::{Device, DeviceCore};
    pub use crate::devfilter::{DevFilter, MatchOp, Rule};
    pub use crate::errors::CoreError;
    pub use crate::node::Node;
    pub use crate::scheduler::{Scheduler, SchedulerConfig};
    pub use crate::service::{Service, ServiceState};
    pub use crate::step_worker::StepWorker;
    pub use crate::task::{Task, TaskFrame, TaskOutcome, TaskPriority};
    pub use crate::utils::Timestamp;
    pub use crate::waitable::{WaitOutcome, Waitable};
    pub use crate::worker::Worker;
}
