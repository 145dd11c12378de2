use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, ChildStdin, ChildStdout, ExitStatus};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::error::{Direction, ExitKind, ProcessError, Result};
use crate::launcher::{launch, ChildCommand, ChildHandle};
use crate::traits::ChildIo;

/// Default interval between cancellation/liveness checks while waiting.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Default size of the host-side read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Transport tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Upper bound on how long a wait goes without checking the cancel token.
    pub poll_timeout: Duration,
    /// Bytes fetched from the child per `read(2)`.
    pub read_buffer_size: usize,
    /// How many times to re-check for exit after `SIGTERM`.
    pub terminate_retries: u32,
    /// Sleep between those re-checks.
    pub terminate_retry_interval: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            terminate_retries: 50,
            terminate_retry_interval: Duration::from_millis(10),
        }
    }
}

impl ProcessConfig {
    fn poll_timeout_ms(&self) -> libc::c_int {
        self.poll_timeout
            .as_millis()
            .clamp(1, libc::c_int::MAX as u128) as libc::c_int
    }
}

/// A running child with its stdin and stdout owned by the host.
///
/// Every blocking wait polls in bounded slices so that cancellation and child
/// death are noticed promptly. Any failure terminates the child before the
/// error is returned. Dropping the value terminates the child as well.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    pid: u32,
    alive: bool,
    config: ProcessConfig,
    cancel: CancelToken,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_end: usize,
}

impl ChildProcess {
    /// Launch `command` and wrap it.
    pub fn spawn(command: &ChildCommand, config: ProcessConfig, cancel: CancelToken) -> Result<Self> {
        launch(command).map(|handle| Self::from_handle(handle, config, cancel))
    }

    pub fn from_handle(handle: ChildHandle, config: ProcessConfig, cancel: CancelToken) -> Self {
        let ChildHandle {
            child,
            stdin,
            stdout,
        } = handle;
        let pid = child.id();
        Self {
            child,
            stdin: Some(stdin),
            stdout: Some(stdout),
            pid,
            alive: true,
            read_buf: vec![0u8; config.read_buffer_size.max(1)],
            read_pos: 0,
            read_end: 0,
            config,
            cancel,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Close both pipes and make sure the child is gone.
    ///
    /// Sends `SIGTERM`, waits a bounded time, then escalates to `SIGKILL` and
    /// reaps. A child that has already exited is only reaped, never
    /// signalled. Idempotent.
    pub fn terminate(&mut self) {
        if !self.alive {
            return;
        }
        self.alive = false;
        self.stdin = None;
        self.stdout = None;
        self.read_pos = 0;
        self.read_end = 0;

        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = self.pid, %status, "child already exited");
                return;
            }
            Ok(None) => {}
            Err(err) => {
                // Already reaped elsewhere; signalling could hit a recycled pid.
                warn!(pid = self.pid, error = %err, "could not query child status");
                return;
            }
        }

        // SAFETY: the pid belongs to our own child, which has not been reaped.
        unsafe {
            libc::kill(self.pid as libc::pid_t, libc::SIGTERM);
        }
        for _ in 0..self.config.terminate_retries {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = self.pid, %status, "child exited after SIGTERM");
                    return;
                }
                Ok(None) => thread::sleep(self.config.terminate_retry_interval),
                Err(err) => {
                    warn!(pid = self.pid, error = %err, "could not query child status");
                    break;
                }
            }
        }

        warn!(
            pid = self.pid,
            "child ignored SIGTERM; sending SIGKILL and waiting indefinitely"
        );
        if let Err(err) = self.child.kill() {
            warn!(pid = self.pid, error = %err, "SIGKILL failed");
        }
        match self.child.wait() {
            Ok(status) => debug!(pid = self.pid, %status, "child reaped"),
            Err(err) => warn!(pid = self.pid, error = %err, "failed to reap child"),
        }
    }

    fn raw_fd(&self, direction: Direction) -> Option<RawFd> {
        match direction {
            Direction::Read => self.stdout.as_ref().map(AsRawFd::as_raw_fd),
            Direction::Write => self.stdin.as_ref().map(AsRawFd::as_raw_fd),
        }
    }

    fn fail(&mut self, err: ProcessError) -> ProcessError {
        warn!(pid = self.pid, error = %err, "terminating child");
        self.terminate();
        err
    }

    fn died(&mut self, direction: Direction, status: ExitStatus) -> ProcessError {
        let kind = match status.code() {
            Some(code) => ExitKind::Regular(code),
            None => ExitKind::Error,
        };
        self.fail(ProcessError::ChildDied { direction, kind })
    }

    /// Block until the pipe for `direction` is ready.
    fn wait_ready(&mut self, direction: Direction, check_liveness: bool) -> Result<()> {
        let (verb, events) = match direction {
            Direction::Read => ("read from", libc::POLLIN),
            Direction::Write => ("write to", libc::POLLOUT),
        };
        let fd = self.raw_fd(direction).ok_or(ProcessError::NotAlive(verb))?;
        let timeout = self.config.poll_timeout_ms();

        loop {
            if self.cancel.is_cancelled() {
                debug!(pid = self.pid, "cancelled while {direction}");
                self.terminate();
                return Err(ProcessError::Cancelled);
            }

            if check_liveness {
                match self.child.try_wait() {
                    Ok(Some(status)) => return Err(self.died(direction, status)),
                    Ok(None) => {}
                    Err(err) => return Err(self.fail(ProcessError::Io(err))),
                }
            }

            let mut pfd = libc::pollfd {
                fd,
                events,
                revents: 0,
            };
            // SAFETY: `pfd` is a single valid pollfd for the duration of the call.
            let rc = unsafe { libc::poll(&mut pfd, 1, timeout) };
            if rc > 0 {
                return Ok(());
            }
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(self.fail(ProcessError::Poll {
                    direction,
                    source: err,
                }));
            }
        }
    }

    /// Refill the internal buffer with at least one byte.
    fn fill(&mut self, check_liveness: bool) -> Result<()> {
        loop {
            self.wait_ready(Direction::Read, check_liveness)?;
            let read = match self.stdout.as_mut() {
                Some(stdout) => stdout.read(&mut self.read_buf),
                None => return Err(ProcessError::NotAlive("read from")),
            };
            match read {
                Ok(0) => {
                    return Err(self.fail(ProcessError::Read(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "child closed its output",
                    ))))
                }
                Ok(n) => {
                    trace!(pid = self.pid, bytes = n, "read from child");
                    self.read_pos = 0;
                    self.read_end = n;
                    return Ok(());
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(self.fail(ProcessError::Read(err))),
            }
        }
    }
}

impl ChildIo for ChildProcess {
    fn soft_read(&mut self, buf: &mut [u8], check_liveness: bool) -> Result<usize> {
        if !self.alive {
            return Err(ProcessError::NotAlive("read from"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if self.read_pos == self.read_end {
            self.fill(check_liveness)?;
        }
        let n = buf.len().min(self.read_end - self.read_pos);
        buf[..n].copy_from_slice(&self.read_buf[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        Ok(n)
    }

    fn hard_write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.alive {
            return Err(ProcessError::NotAlive("write to"));
        }
        let mut written = 0usize;
        while written < buf.len() {
            self.wait_ready(Direction::Write, true)?;
            let result = match self.stdin.as_mut() {
                Some(stdin) => stdin.write(&buf[written..]),
                None => return Err(ProcessError::NotAlive("write to")),
            };
            match result {
                Ok(0) => {
                    return Err(self.fail(ProcessError::Write(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "child accepted no bytes",
                    ))))
                }
                Ok(n) => written += n,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(err) => return Err(self.fail(ProcessError::Write(err))),
            }
        }
        trace!(pid = self.pid, bytes = buf.len(), "wrote to child");
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}
