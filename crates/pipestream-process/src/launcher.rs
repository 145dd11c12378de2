use std::ffi::OsString;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::{debug, warn};

use crate::error::{ProcessError, Result};
use crate::limits::{close_inherited_fds, inherited_fd_ceiling, ResourceLimits};

/// Shell used for [`Invocation::Shell`] commands.
pub const SHELL: &str = "/bin/sh";

/// How the child program is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// `/bin/sh -c <command>`.
    Shell(String),
    /// Direct exec of `argv[0]` (looked up on `PATH`) with the given arguments.
    Argv(Vec<OsString>),
}

/// Everything needed to start a child.
#[derive(Debug, Clone)]
pub struct ChildCommand {
    invocation: Invocation,
    env: Option<Vec<(OsString, OsString)>>,
    limits: Option<ResourceLimits>,
    nonblocking: bool,
}

impl ChildCommand {
    /// Run `command` through `/bin/sh -c`.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::from_invocation(Invocation::Shell(command.into()))
    }

    /// Exec `args[0]` directly.
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self::from_invocation(Invocation::Argv(args.into_iter().map(Into::into).collect()))
    }

    fn from_invocation(invocation: Invocation) -> Self {
        Self {
            invocation,
            env: None,
            limits: None,
            nonblocking: true,
        }
    }

    /// Add a variable to an explicit environment. The first call replaces the
    /// inherited environment entirely.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    /// Install resource limits in the child before it execs.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = if limits.is_empty() {
            None
        } else {
            Some(limits)
        };
        self
    }

    /// Leave the host-side descriptors in blocking mode.
    pub fn blocking(mut self) -> Self {
        self.nonblocking = false;
        self
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn resource_limits(&self) -> Option<&ResourceLimits> {
        self.limits.as_ref()
    }

    /// Human-readable command line for logs and errors.
    pub fn display(&self) -> String {
        match &self.invocation {
            Invocation::Shell(command) => command.clone(),
            Invocation::Argv(args) => args
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    fn launch_error(&self, source: io::Error) -> ProcessError {
        ProcessError::Launch {
            command: self.display(),
            source,
        }
    }
}

/// A freshly launched child with both pipe ends owned by the host.
#[derive(Debug)]
pub struct ChildHandle {
    pub(crate) child: Child,
    pub(crate) stdin: ChildStdin,
    pub(crate) stdout: ChildStdout,
}

impl ChildHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// Launch a child with stdin/stdout wired to fresh pipes.
///
/// In the child, every inherited descriptor above stderr is closed and the
/// resource limits are applied before exec; a failure there surfaces as
/// [`ProcessError::Launch`] with the child already reaped. stderr is
/// inherited.
pub fn launch(command: &ChildCommand) -> Result<ChildHandle> {
    let mut cmd = match &command.invocation {
        Invocation::Shell(line) => {
            let mut cmd = Command::new(SHELL);
            cmd.arg("-c").arg(line);
            cmd
        }
        Invocation::Argv(args) => {
            let (program, rest) = args.split_first().ok_or_else(|| {
                command.launch_error(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "empty argument vector",
                ))
            })?;
            let mut cmd = Command::new(program);
            cmd.args(rest);
            cmd
        }
    };

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    if let Some(env) = &command.env {
        cmd.env_clear();
        cmd.envs(env.iter().map(|(k, v)| (k, v)));
    }

    let limits = command.limits;
    let ceiling = inherited_fd_ceiling();
    // SAFETY: the hook only calls async-signal-safe libc functions
    // (fcntl, close, setrlimit) and does not allocate.
    unsafe {
        cmd.pre_exec(move || {
            close_inherited_fds(ceiling);
            if let Some(limits) = &limits {
                limits.apply()?;
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(|e| command.launch_error(e))?;
    let pid = child.id();

    let pipes = child.stdin.take().zip(child.stdout.take());
    let Some((stdin, stdout)) = pipes else {
        reap(&mut child);
        return Err(command.launch_error(io::Error::other("child pipes unavailable")));
    };

    if command.nonblocking {
        let nonblocking =
            set_nonblocking(stdin.as_raw_fd()).and_then(|()| set_nonblocking(stdout.as_raw_fd()));
        if let Err(err) = nonblocking {
            warn!(pid, error = %err, "failed to make child pipes non-blocking");
            drop(stdin);
            drop(stdout);
            reap(&mut child);
            return Err(command.launch_error(err));
        }
    }

    debug!(pid, command = %command.display(), limits = ?command.limits, "launched child");
    Ok(ChildHandle {
        child,
        stdin,
        stdout,
    })
}

fn set_nonblocking(fd: std::os::fd::RawFd) -> io::Result<()> {
    // SAFETY: `fd` is an open pipe descriptor owned by this process.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above; only the status flags are changed.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
