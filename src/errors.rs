use thiserror::Error;

/// Errors raised while building or evaluating a [`crate::array::Array`] /
/// [`crate::array::ArrayView`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArrayError {
    /// An index was requested that falls outside `0..size`.
    #[error("index {index} out of bounds for array of size {size}")]
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// The array's element count.
        size: usize,
    },

    /// A byte range does not land on an element boundary, or overruns the buffer.
    #[error("byte range [{offset}, {offset}+{len}) does not fit a buffer of {capacity} bytes")]
    ByteRangeOutOfBounds {
        /// Byte offset the write started at.
        offset: usize,
        /// Length in bytes of the attempted write.
        len: usize,
        /// Total buffer capacity in bytes.
        capacity: usize,
    },

    /// Two arrays/views were combined despite differing element types.
    #[error("type mismatch: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        /// The type the operation required.
        expected: crate::array::ElementType,
        /// The type that was actually supplied.
        actual: crate::array::ElementType,
    },
}

/// Errors raised by [`crate::waitable::Waitable`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitableError {
    /// The deadline passed to `wait_until` already lies in the past of the bound clock.
    #[error("deadline already elapsed")]
    DeadlineElapsed,
}

/// Errors raised by [`crate::node::Node`] tree operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    /// `add_child` was called with a name that already exists among the node's children.
    #[error("child named `{0}` already exists")]
    ChildAlreadyExists(String),

    /// A path lookup (plain name, `/`-delimited path, or symbolic link target) found nothing.
    #[error("no node found at path `{0}`")]
    PathNotFound(String),

    /// A symbolic link's target could not be resolved (dangling, or cyclic beyond the hop limit).
    #[error("symbolic link `{0}` could not be resolved: {1}")]
    UnresolvedLink(String, String),
}

/// Errors raised by the [`crate::service::Service`] lifecycle state machine.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    /// `start` was called while the service was not in `Initialised` or `Stopped`.
    #[error("cannot start a service in state {0:?}")]
    InvalidStartState(crate::service::ServiceState),

    /// `stop` was called while the service was not `Running`.
    #[error("cannot stop a service in state {0:?}")]
    InvalidStopState(crate::service::ServiceState),

    /// The background task failed to reach a ready state (it exited or panicked during setup).
    #[error("service failed to start")]
    StartFailed,

    /// `reset` was called while the service was not in a terminal state (`Stopped` or `Error`).
    #[error("cannot reset a service in state {0:?}")]
    InvalidResetState(crate::service::ServiceState),
}

/// Errors raised by [`crate::task::Task`] / [`crate::scheduler::Scheduler`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// A [`crate::task::TaskFrame`] returned an application-level failure.
    #[error("task `{label}` failed: {reason}")]
    FrameFailed {
        /// The task's debug label.
        label: String,
        /// A human-readable description of the failure.
        reason: String,
    },
}

/// Errors raised by [`crate::channel::Channel`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    /// The supplied bytes / view do not match the channel's element type or size.
    #[error(transparent)]
    Array(#[from] ArrayError),
}

/// Errors raised by [`crate::device::Device`] / [`crate::devfilter::DevFilter`] configuration
/// and startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// A channel with the given name was not found under the device's node.
    #[error("channel `{0}` not found")]
    ChannelNotFound(String),

    /// A channel with the given name already exists under the device's node.
    #[error("channel `{0}` already exists")]
    ChannelAlreadyExists(String),

    /// The lifecycle state machine rejected a transition.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Errors raised while parsing or validating a [`crate::devfilter::Rule`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// A required configuration key (`in`, `out`, `trigger`) was missing.
    #[error("rule is missing required key `{0}`")]
    MissingKey(&'static str),

    /// A key's value could not be parsed into the expected shape.
    #[error("cannot parse key `{key}` value `{value}`")]
    InvalidValue {
        /// The offending key.
        key: &'static str,
        /// The raw value that failed to parse.
        value: String,
    },

    /// Validation at `start` time rejected the rule (see the specific message).
    #[error("rule validation failed: {0}")]
    Invalid(String),

    /// The rule's input or output channel could not be resolved against the node tree.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors raised by [`crate::poll::Poll`].
#[derive(Error, Debug)]
pub enum PollError {
    /// The underlying OS polling mechanism returned an error.
    #[error("poll failed: {0}")]
    Io(#[from] std::io::Error),

    /// `register`/`deregister` referenced a token that isn't (or is already) registered.
    #[error("unknown poll token {0}")]
    UnknownToken(usize),
}

/// Errors raised by [`crate::process::Process`].
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Spawning or communicating with the child process failed at the OS level.
    #[error("process error: {0}")]
    Io(#[from] std::io::Error),

    /// A wait/stop operation was requested on a process that was never started.
    #[error("process was not started")]
    NotStarted,
}

/// The crate-wide error type; every module-specific error converts into this via `#[from]`,
/// so public APIs that span module boundaries (e.g. `Device::start` resolving channels and
/// touching the node tree) can return one error type instead of juggling several.
///
/// Not `Clone`/`PartialEq`, unlike its constituent error types: [`PollError`] and
/// [`ProcessError`] wrap a `std::io::Error`, which is neither.
#[derive(Error, Debug)]
pub enum CoreError {
    /// See [`ArrayError`].
    #[error(transparent)]
    Array(#[from] ArrayError),

    /// See [`WaitableError`].
    #[error(transparent)]
    Waitable(#[from] WaitableError),

    /// See [`NodeError`].
    #[error(transparent)]
    Node(#[from] NodeError),

    /// See [`ServiceError`].
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// See [`TaskError`].
    #[error(transparent)]
    Task(#[from] TaskError),

    /// See [`ChannelError`].
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// See [`DeviceError`].
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// See [`FilterError`].
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// See [`PollError`].
    #[error(transparent)]
    Poll(#[from] PollError),

    /// See [`ProcessError`].
    #[error(transparent)]
    Process(#[from] ProcessError),
}
