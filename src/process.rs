//! A thin wrapper over a piped child process: non-blocking reads from its stdout/stderr are
//! multiplexed through a [`crate::poll::Poll`] and handed to caller-supplied sinks, the way
//! the original process launcher drove its pipe reads off its own poller.

use crate::clock::SteadyClock;
use crate::errors::{ProcessError, ServiceError};
use crate::poll::{Poll, Token};
use crate::service::{Service, ServiceController, ServiceState};
use crate::waitable::Waitable;
use crate::worker::{Runnable, Worker};
use async_trait::async_trait;
use std::io::Read;
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::Interest;

const STDOUT_TOKEN: Token = 0;
const STDERR_TOKEN: Token = 1;
const READ_CHUNK: usize = 2048;

/// A callback invoked with each chunk of bytes read from a child's stdout/stderr.
pub type OutputSink = Box<dyn FnMut(&[u8]) + Send>;

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

struct ProcessCore {
    child: Mutex<Option<Child>>,
    stdout: Mutex<Option<std::process::ChildStdout>>,
    stderr: Mutex<Option<std::process::ChildStderr>>,
    stdout_sink: Mutex<Option<OutputSink>>,
    stderr_sink: Mutex<Option<OutputSink>>,
    poll: Poll,
    exit_status: Mutex<Option<ExitStatus>>,
    waitable: Waitable,
}

impl ProcessCore {
    fn drain_fd(
        reader: &mut (impl Read + ?Sized),
        sink: &mut Option<OutputSink>,
    ) -> std::io::Result<bool> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    if let Some(sink) = sink {
                        sink(&buf[..n]);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_event(&self, token: Token) {
        match token {
            STDOUT_TOKEN => {
                let mut stdout = self.stdout.lock().unwrap();
                let mut sink = self.stdout_sink.lock().unwrap();
                if let Some(reader) = stdout.as_mut() {
                    match Self::drain_fd(reader, &mut sink) {
                        Ok(true) => {}
                        Ok(false) | Err(_) => {
                            let _ = self.poll.deregister(STDOUT_TOKEN);
                            *stdout = None;
                        }
                    }
                }
            }
            STDERR_TOKEN => {
                let mut stderr = self.stderr.lock().unwrap();
                let mut sink = self.stderr_sink.lock().unwrap();
                if let Some(reader) = stderr.as_mut() {
                    match Self::drain_fd(reader, &mut sink) {
                        Ok(true) => {}
                        Ok(false) | Err(_) => {
                            let _ = self.poll.deregister(STDERR_TOKEN);
                            *stderr = None;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn try_reap(&self) -> Option<ExitStatus> {
        let mut child = self.child.lock().unwrap();
        let status = child.as_mut().and_then(|c| c.try_wait().ok().flatten());
        if let Some(status) = status {
            *self.exit_status.lock().unwrap() = Some(status);
            self.waitable.notify_all();
        }
        status
    }
}

struct ProcessRunnable {
    core: Arc<ProcessCore>,
}

#[async_trait]
impl Runnable for ProcessRunnable {
    async fn run(&self, should_stop: Arc<AtomicBool>) -> bool {
        loop {
            if should_stop.load(Ordering::Acquire) {
                return false;
            }
            if self.core.poll.is_empty() {
                if self.core.try_reap().is_some() {
                    return false;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                continue;
            }
            match self.core.poll.poll().await {
                Ok(events) => {
                    for event in events {
                        if event.readable {
                            self.core.handle_event(event.token);
                        }
                    }
                }
                Err(_) => return false,
            }
            if self.core.poll.is_empty() && self.core.try_reap().is_some() {
                return false;
            }
        }
    }
}

/// Spawns a command with piped stdio, streaming stdout/stderr to caller-supplied sinks via a
/// background polling task. See module docs.
pub struct Process {
    command: Mutex<Command>,
    core: Arc<ProcessCore>,
    worker: Worker,
    controller: ServiceController,
}

impl Process {
    /// Builds a process for `program`, not yet spawned.
    pub fn new(program: impl AsRef<std::ffi::OsStr>) -> Self {
        let core = Arc::new(ProcessCore {
            child: Mutex::new(None),
            stdout: Mutex::new(None),
            stderr: Mutex::new(None),
            stdout_sink: Mutex::new(None),
            stderr_sink: Mutex::new(None),
            poll: Poll::new(),
            exit_status: Mutex::new(None),
            waitable: Waitable::new(Arc::new(SteadyClock::new())),
        });
        let runnable: Arc<dyn Runnable> = Arc::new(ProcessRunnable { core: core.clone() });
        Self { command: Mutex::new(Command::new(program)), core, worker: Worker::new(runnable), controller: ServiceController::new() }
    }

    /// Appends an argument to the command line.
    pub fn arg(&self, arg: impl AsRef<std::ffi::OsStr>) -> &Self {
        self.command.lock().unwrap().arg(arg);
        self
    }

    /// Sets the child's working directory.
    pub fn current_dir(&self, dir: impl AsRef<std::path::Path>) -> &Self {
        self.command.lock().unwrap().current_dir(dir);
        self
    }

    /// Installs the sink invoked with each chunk read from the child's stdout.
    pub fn stdout_to(&self, sink: impl FnMut(&[u8]) + Send + 'static) -> &Self {
        *self.core.stdout_sink.lock().unwrap() = Some(Box::new(sink));
        self
    }

    /// Installs the sink invoked with each chunk read from the child's stderr.
    pub fn stderr_to(&self, sink: impl FnMut(&[u8]) + Send + 'static) -> &Self {
        *self.core.stderr_sink.lock().unwrap() = Some(Box::new(sink));
        self
    }

    /// `true` while the child has been spawned and not yet reaped.
    pub fn is_running(&self) -> bool {
        self.core.exit_status.lock().unwrap().is_none() && self.core.child.lock().unwrap().is_some()
    }

    /// The child's exit status, once it has terminated and been reaped.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.core.exit_status.lock().unwrap()
    }

    /// Waits (cooperatively, without blocking the runtime) until the child exits or
    /// `timeout` elapses.
    pub async fn wait_exit(&self, timeout: std::time::Duration) -> bool {
        self.core
            .waitable
            .wait_for(timeout, || self.core.exit_status.lock().unwrap().is_some())
            .await;
        self.core.exit_status.lock().unwrap().is_some()
    }

    /// Sends `SIGTERM` (or `signal` if given) to the child, if still running.
    #[cfg(unix)]
    pub fn kill(&self, signal: Option<i32>) -> Result<(), ProcessError> {
        let child = self.core.child.lock().unwrap();
        let Some(child) = child.as_ref() else { return Err(ProcessError::NotStarted) };
        let sig = signal.unwrap_or(libc::SIGTERM);
        let ret = unsafe { libc::kill(child.id() as i32, sig) };
        if ret != 0 {
            return Err(ProcessError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

#[async_trait]
impl Service for Process {
    async fn setup(&self) -> Result<(), ServiceError> {
        self.controller.run_setup(async { Ok(()) }).await
    }

    async fn init(&self) -> Result<(), ServiceError> {
        self.controller.run_init(async { Ok(()) }).await
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.controller
            .run_start(async {
                let mut command = self.command.lock().unwrap();
                command.stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());
                let mut child = command.spawn().map_err(|_| ServiceError::StartFailed)?;

                let stdout = child.stdout.take().ok_or(ServiceError::StartFailed)?;
                let stderr = child.stderr.take().ok_or(ServiceError::StartFailed)?;
                set_nonblocking(stdout.as_raw_fd()).map_err(|_| ServiceError::StartFailed)?;
                set_nonblocking(stderr.as_raw_fd()).map_err(|_| ServiceError::StartFailed)?;

                self.core
                    .poll
                    .register(STDOUT_TOKEN, stdout.as_raw_fd(), Interest::READABLE)
                    .map_err(|_| ServiceError::StartFailed)?;
                self.core
                    .poll
                    .register(STDERR_TOKEN, stderr.as_raw_fd(), Interest::READABLE)
                    .map_err(|_| ServiceError::StartFailed)?;

                *self.core.stdout.lock().unwrap() = Some(stdout);
                *self.core.stderr.lock().unwrap() = Some(stderr);
                *self.core.child.lock().unwrap() = Some(child);
                *self.core.exit_status.lock().unwrap() = None;

                self.worker.start("process");
                Ok(())
            })
            .await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.controller
            .run_stop(async {
                if let Some(child) = self.core.child.lock().unwrap().as_mut() {
                    let _ = child.kill();
                }
                self.worker.stop();
                self.worker.join().await;
                Ok(())
            })
            .await
    }

    async fn reset(&self) -> Result<(), ServiceError> {
        self.controller
            .run_reset(async {
                *self.core.child.lock().unwrap() = None;
                *self.core.stdout.lock().unwrap() = None;
                *self.core.stderr.lock().unwrap() = None;
                *self.core.exit_status.lock().unwrap() = None;
                Ok(())
            })
            .await
    }

    fn state(&self) -> ServiceState {
        self.controller.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn captures_stdout_from_echo() {
        let process = Process::new("echo");
        process.arg("hello-from-child");
        let lines = Arc::new(Mutex::new(Vec::new()));
        let lines_clone = lines.clone();
        process.stdout_to(move |bytes: &[u8]| {
            lines_clone.lock().unwrap().extend_from_slice(bytes);
        });

        process.setup().await.unwrap();
        process.init().await.unwrap();
        process.start().await.unwrap();

        let exited = process.wait_exit(Duration::from_secs(2)).await;
        assert!(exited);
        process.stop().await.unwrap();

        let collected = String::from_utf8(lines.lock().unwrap().clone()).unwrap();
        assert!(collected.contains("hello-from-child"));
    }

    #[tokio::test]
    async fn reports_exit_status_of_false() {
        let process = Process::new("false");
        process.setup().await.unwrap();
        process.init().await.unwrap();
        process.start().await.unwrap();
        process.wait_exit(Duration::from_secs(2)).await;
        process.stop().await.unwrap();

        let status = process.exit_status().unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn not_running_before_start() {
        let process = Process::new("true");
        assert!(!process.is_running());
        let _ = AtomicUsize::new(0);
    }
}
