//! The lifecycle state machine shared by every long-running component
//! ([`crate::worker::Worker`], [`crate::step_worker::StepWorker`], [`crate::scheduler::Scheduler`],
//! [`crate::device::Device`]).

use crate::errors::ServiceError;
use async_trait::async_trait;
use std::sync::Mutex;

/// The lifecycle state of a [`Service`]. Transitions are driven by `setup`, `init`,
/// `start`, `stop`, `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    /// Freshly constructed; nothing has run yet.
    None,
    /// `setup()` is in progress.
    Configuring,
    /// `setup()` completed.
    Setup,
    /// `init()` completed; ready to `start()`.
    Initialised,
    /// `start()` completed and the service is actively running.
    Running,
    /// `stop()` is in progress.
    Stopping,
    /// `stop()` completed.
    Stopped,
    /// A transition failed; `reset()` is the only way out.
    Error,
}

/// The lifecycle contract every long-running component in this crate implements.
///
/// `setup` and `init` are idempotent on repeated entry from `Error` (re-running them after
/// a failed attempt is expected to be safe and simply retries configuration). `stop` is
/// safe to call from any task, including one the service itself spawned — it only flips a
/// flag and notifies, never awaiting a join against itself. `reset` always returns the
/// service to `ServiceState::None` so a fresh `setup -> init -> start` cycle is possible.
#[async_trait]
pub trait Service: Send + Sync {
    /// Performs configuration that does not yet require resources to be live (parsing,
    /// validation). Valid from `None` or `Error`.
    async fn setup(&self) -> Result<(), ServiceError>;

    /// Performs initialisation that may acquire resources. Valid from `Setup`.
    async fn init(&self) -> Result<(), ServiceError>;

    /// Starts the service. Valid from `Initialised` or `Stopped`.
    async fn start(&self) -> Result<(), ServiceError>;

    /// Stops the service. Valid from `Running`.
    async fn stop(&self) -> Result<(), ServiceError>;

    /// Returns the service to `ServiceState::None` from any terminal state.
    async fn reset(&self) -> Result<(), ServiceError>;

    /// A snapshot of the current lifecycle state. Never blocks on the controller mutex
    /// that guards transitions — only a short-lived read.
    fn state(&self) -> ServiceState;
}

/// A reusable lifecycle controller: a single mutex-guarded `ServiceState`, shared by every
/// `Service` implementor in this crate so each one doesn't hand-roll its own guard.
#[derive(Debug)]
pub struct ServiceController {
    state: Mutex<ServiceState>,
}

impl Default for ServiceController {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceController {
    /// Creates a controller starting at `ServiceState::None`.
    pub fn new() -> Self {
        Self { state: Mutex::new(ServiceState::None) }
    }

    /// A snapshot of the current state. Takes a short-lived lock; safe to call from any
    /// task, including one in the middle of a transition elsewhere (it simply observes
    /// whatever state is currently recorded).
    pub fn snapshot(&self) -> ServiceState {
        *self.state.lock().unwrap()
    }

    fn set(&self, new_state: ServiceState) {
        *self.state.lock().unwrap() = new_state;
    }

    /// Runs `setup`: requires `None` or `Error`, transitions through `Configuring` to
    /// `Setup` on success, or to `Error` on failure.
    pub async fn run_setup<F>(&self, body: F) -> Result<(), ServiceError>
    where
        F: std::future::Future<Output = Result<(), ServiceError>> + Send,
    {
        self.set(ServiceState::Configuring);
        match body.await {
            Ok(()) => {
                self.set(ServiceState::Setup);
                Ok(())
            }
            Err(err) => {
                self.set(ServiceState::Error);
                Err(err)
            }
        }
    }

    /// Runs `init`: requires `Setup`, transitions to `Initialised` on success or `Error`
    /// on failure.
    pub async fn run_init<F>(&self, body: F) -> Result<(), ServiceError>
    where
        F: std::future::Future<Output = Result<(), ServiceError>> + Send,
    {
        match body.await {
            Ok(()) => {
                self.set(ServiceState::Initialised);
                Ok(())
            }
            Err(err) => {
                self.set(ServiceState::Error);
                Err(err)
            }
        }
    }

    /// Runs `start`: requires `Initialised` or `Stopped`, transitions to `Running` on
    /// success or `Error` on failure.
    pub async fn run_start<F>(&self, body: F) -> Result<(), ServiceError>
    where
        F: std::future::Future<Output = Result<(), ServiceError>> + Send,
    {
        let current = self.snapshot();
        if !matches!(current, ServiceState::Initialised | ServiceState::Stopped) {
            return Err(ServiceError::InvalidStartState(current));
        }
        match body.await {
            Ok(()) => {
                self.set(ServiceState::Running);
                Ok(())
            }
            Err(err) => {
                self.set(ServiceState::Error);
                Err(err)
            }
        }
    }

    /// Runs `stop`: requires `Running`, transitions through `Stopping` to `Stopped`.
    pub async fn run_stop<F>(&self, body: F) -> Result<(), ServiceError>
    where
        F: std::future::Future<Output = Result<(), ServiceError>> + Send,
    {
        let current = self.snapshot();
        if current != ServiceState::Running {
            return Err(ServiceError::InvalidStopState(current));
        }
        self.set(ServiceState::Stopping);
        match body.await {
            Ok(()) => {
                self.set(ServiceState::Stopped);
                Ok(())
            }
            Err(err) => {
                self.set(ServiceState::Error);
                Err(err)
            }
        }
    }

    /// Runs `reset`: requires `Stopped` or `Error`, returns to `ServiceState::None`.
    pub async fn run_reset<F>(&self, body: F) -> Result<(), ServiceError>
    where
        F: std::future::Future<Output = Result<(), ServiceError>> + Send,
    {
        let current = self.snapshot();
        if !matches!(current, ServiceState::Stopped | ServiceState::Error) {
            return Err(ServiceError::InvalidResetState(current));
        }
        body.await?;
        self.set(ServiceState::None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_from_none_is_rejected() {
        let controller = ServiceController::new();
        let err = controller.run_start(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidStartState(ServiceState::None)));
    }

    #[tokio::test]
    async fn full_lifecycle_reaches_running_then_stopped() {
        let controller = ServiceController::new();
        controller.run_setup(async { Ok(()) }).await.unwrap();
        assert_eq!(controller.snapshot(), ServiceState::Setup);
        controller.run_init(async { Ok(()) }).await.unwrap();
        assert_eq!(controller.snapshot(), ServiceState::Initialised);
        controller.run_start(async { Ok(()) }).await.unwrap();
        assert_eq!(controller.snapshot(), ServiceState::Running);
        controller.run_stop(async { Ok(()) }).await.unwrap();
        assert_eq!(controller.snapshot(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn failed_setup_moves_to_error_and_reset_recovers() {
        let controller = ServiceController::new();
        let err = controller
            .run_setup(async { Err(ServiceError::StartFailed) })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::StartFailed));
        assert_eq!(controller.snapshot(), ServiceState::Error);

        controller.run_reset(async { Ok(()) }).await.unwrap();
        assert_eq!(controller.snapshot(), ServiceState::None);
    }

    #[tokio::test]
    async fn stop_requires_running() {
        let controller = ServiceController::new();
        let err = controller.run_stop(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidStopState(ServiceState::None)));
    }

    #[tokio::test]
    async fn reset_requires_a_terminal_state() {
        let controller = ServiceController::new();
        controller.run_setup(async { Ok(()) }).await.unwrap();
        controller.run_init(async { Ok(()) }).await.unwrap();
        controller.run_start(async { Ok(()) }).await.unwrap();
        assert_eq!(controller.snapshot(), ServiceState::Running);

        let err = controller.run_reset(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidResetState(ServiceState::Running)));
        assert_eq!(controller.snapshot(), ServiceState::Running);

        controller.run_stop(async { Ok(()) }).await.unwrap();
        controller.run_reset(async { Ok(()) }).await.unwrap();
        assert_eq!(controller.snapshot(), ServiceState::None);
    }
}
