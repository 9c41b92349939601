//! A readiness multiplexer over raw file descriptors, built on [`tokio::io::unix::AsyncFd`]
//! rather than a standalone `mio` poller — this crate already drives everything through a
//! Tokio reactor, so [`Poll`] rides the same one instead of running a second event loop.

use crate::errors::PollError;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// Identifies a registered file descriptor across [`Poll::register`]/[`Poll::deregister`]/
/// [`Poll::poll`] calls. Caller-assigned, so it can double as an index into the caller's own
/// bookkeeping (a file-descriptor enum variant, a vector index, ...).
pub type Token = usize;

/// Which readiness was observed for a [`Token`] on a [`Poll::poll`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

struct Registration {
    async_fd: AsyncFd<RawFd>,
    interest: Interest,
}

/// Multiplexes readiness across a set of registered raw file descriptors. `poll()` waits for
/// the first one or more to become ready, or for the configured timeout to elapse.
pub struct Poll {
    registrations: Mutex<HashMap<Token, Arc<Registration>>>,
    timeout: Mutex<Duration>,
}

impl Default for Poll {
    fn default() -> Self {
        Self::new()
    }
}

impl Poll {
    /// Creates an empty poller with a 5 second default timeout (matching the blocking
    /// multiplexer this replaces).
    pub fn new() -> Self {
        Self { registrations: Mutex::new(HashMap::new()), timeout: Mutex::new(Duration::from_secs(5)) }
    }

    /// Overrides the wait duration used by [`Poll::poll`] when nothing is ready.
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock().unwrap() = timeout;
    }

    /// Registers `fd` under `token`, watching for `interest`. Replaces any prior
    /// registration under the same token.
    pub fn register(&self, token: Token, fd: RawFd, interest: Interest) -> Result<(), PollError> {
        let async_fd = AsyncFd::with_interest(fd, interest)?;
        self.registrations.lock().unwrap().insert(token, Arc::new(Registration { async_fd, interest }));
        Ok(())
    }

    /// Stops watching `token`. The underlying fd is not closed — the caller still owns it.
    pub fn deregister(&self, token: Token) -> Result<(), PollError> {
        match self.registrations.lock().unwrap().remove(&token) {
            Some(_) => Ok(()),
            None => Err(PollError::UnknownToken(token)),
        }
    }

    /// The number of currently registered tokens.
    pub fn len(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.lock().unwrap().is_empty()
    }

    /// Waits until at least one registered fd is ready, or the configured timeout elapses.
    /// Returns an empty vector on timeout. Every fd whose readiness future resolves before
    /// the timeout is included, not just the first.
    pub async fn poll(&self) -> Result<Vec<ReadinessEvent>, PollError> {
        let timeout = *self.timeout.lock().unwrap();
        let snapshot: Vec<(Token, Arc<Registration>)> = {
            let registrations = self.registrations.lock().unwrap();
            registrations.iter().map(|(&token, reg)| (token, reg.clone())).collect()
        };
        if snapshot.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(Vec::new());
        }

        let mut pending = FuturesUnordered::new();
        for (token, registration) in snapshot {
            pending.push(wait_one(token, registration));
        }

        let mut events = Vec::new();
        let _ = tokio::time::timeout(timeout, async {
            while let Some(event) = pending.next().await {
                events.push(event);
            }
        })
        .await;
        Ok(events)
    }
}

async fn wait_one(token: Token, registration: Arc<Registration>) -> ReadinessEvent {
    let readable = registration.interest.is_readable() && registration.async_fd.readable().await.is_ok();
    let writable = registration.interest.is_writable() && registration.async_fd.writable().await.is_ok();
    ReadinessEvent { token, readable, writable }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::{AsRawFd, FromRawFd};

    fn make_pipe() -> (std::fs::File, std::fs::File) {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        unsafe { (std::fs::File::from_raw_fd(fds[0]), std::fs::File::from_raw_fd(fds[1])) }
    }

    #[tokio::test]
    async fn poll_times_out_with_no_registrations() {
        let poll = Poll::new();
        poll.set_timeout(Duration::from_millis(20));
        let events = poll.poll().await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn register_and_deregister_track_token_count() {
        let (read_end, _write_end) = make_pipe();
        let poll = Poll::new();
        poll.register(1, read_end.as_raw_fd(), Interest::READABLE).unwrap();
        assert_eq!(poll.len(), 1);
        poll.deregister(1).unwrap();
        assert!(poll.is_empty());
        std::mem::forget(read_end);
    }

    #[tokio::test]
    async fn deregister_unknown_token_is_reported() {
        let poll = Poll::new();
        let err = poll.deregister(99).unwrap_err();
        assert!(matches!(err, PollError::UnknownToken(99)));
    }

    #[tokio::test]
    async fn poll_reports_readable_fd_once_written() {
        let (read_end, write_end) = make_pipe();
        let poll = Poll::new();
        poll.set_timeout(Duration::from_millis(500));
        poll.register(7, read_end.as_raw_fd(), Interest::READABLE).unwrap();

        use std::io::Write;
        let mut write_file = write_end;
        write_file.write_all(b"x").unwrap();

        let events = poll.poll().await.unwrap();
        assert!(events.iter().any(|e| e.token == 7 && e.readable));
        std::mem::forget(read_end);
    }
}
