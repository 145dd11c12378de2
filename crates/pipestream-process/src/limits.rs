//! Resource limits applied to a child before it execs its command.
//!
//! Limits are always installed from inside the forked child (a `pre_exec`
//! hook), so they are in force before the replacement program runs.

use std::io;

/// Lowest `nofile_floor` accepted. The transport itself needs stdin, stdout
/// and stderr plus a couple of descriptors for the shell.
pub const NOFILE_FLOOR_MIN: u64 = 5;

/// Default floor for the open-file limit.
pub const DEFAULT_NOFILE_FLOOR: u64 = 8;

/// Highest descriptor number scanned when closing inherited descriptors.
pub const FD_SCAN_CEILING: u64 = 65_536;

/// Optional per-process limits for a child.
///
/// Unset fields leave the inherited limit untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Virtual address space, in bytes (`RLIMIT_AS`).
    pub address_space: Option<u64>,
    /// Data segment size, in bytes (`RLIMIT_DATA`).
    pub data: Option<u64>,
    /// Stack size, in bytes (`RLIMIT_STACK`).
    pub stack: Option<u64>,
    /// CPU time, in seconds (`RLIMIT_CPU`).
    pub cpu_seconds: Option<u64>,
    /// Processes/threads for the child's user (`RLIMIT_NPROC`).
    pub max_processes: Option<u64>,
    /// Open file descriptors (`RLIMIT_NOFILE`), raised to `nofile_floor`.
    pub max_open_files: Option<u64>,
    /// Minimum value `max_open_files` is silently raised to.
    pub nofile_floor: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            address_space: None,
            data: None,
            stack: None,
            cpu_seconds: None,
            max_processes: None,
            max_open_files: None,
            nofile_floor: DEFAULT_NOFILE_FLOOR,
        }
    }
}

impl ResourceLimits {
    /// Set the floor for the open-file limit. Values below
    /// [`NOFILE_FLOOR_MIN`] are raised to it.
    pub fn with_nofile_floor(mut self, floor: u64) -> Self {
        self.nofile_floor = floor.max(NOFILE_FLOOR_MIN);
        self
    }

    /// The open-file limit that will actually be installed.
    pub fn effective_open_files(&self) -> Option<u64> {
        self.max_open_files
            .map(|n| n.max(self.nofile_floor.max(NOFILE_FLOOR_MIN)))
    }

    /// True if no limit is configured.
    pub fn is_empty(&self) -> bool {
        self.address_space.is_none()
            && self.data.is_none()
            && self.stack.is_none()
            && self.cpu_seconds.is_none()
            && self.max_processes.is_none()
            && self.max_open_files.is_none()
    }

    /// Install the limits on the calling process.
    ///
    /// Only async-signal-safe calls are made here: this runs in the forked
    /// child between `fork` and `exec`.
    #[cfg(unix)]
    pub fn apply(&self) -> io::Result<()> {
        macro_rules! set_limit {
            ($resource:expr, $value:expr) => {
                if let Some(value) = $value {
                    let lim = libc::rlimit {
                        rlim_cur: value as libc::rlim_t,
                        rlim_max: value as libc::rlim_t,
                    };
                    // SAFETY: `lim` is a valid rlimit for the duration of the call.
                    if unsafe { libc::setrlimit($resource, &lim) } != 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
            };
        }

        set_limit!(libc::RLIMIT_AS, self.address_space);
        set_limit!(libc::RLIMIT_DATA, self.data);
        set_limit!(libc::RLIMIT_STACK, self.stack);
        set_limit!(libc::RLIMIT_CPU, self.cpu_seconds);
        set_limit!(libc::RLIMIT_NPROC, self.max_processes);
        set_limit!(libc::RLIMIT_NOFILE, self.effective_open_files());
        Ok(())
    }
}

/// Upper bound (exclusive) for the descriptor scan in the child, taken from
/// the current hard open-file limit and capped at [`FD_SCAN_CEILING`].
#[cfg(unix)]
pub(crate) fn inherited_fd_ceiling() -> libc::c_int {
    let mut lim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `lim` is a valid writable rlimit.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) };
    let ceiling = if rc != 0 || lim.rlim_max == libc::RLIM_INFINITY {
        FD_SCAN_CEILING
    } else {
        (lim.rlim_max as u64).min(FD_SCAN_CEILING)
    };
    ceiling as libc::c_int
}

/// Close every descriptor above stderr that would survive `exec`.
///
/// Descriptors already marked close-on-exec are left alone; they vanish at
/// `exec` anyway and one of them carries exec errors back to the parent.
/// Async-signal-safe.
#[cfg(unix)]
pub(crate) fn close_inherited_fds(ceiling: libc::c_int) {
    for fd in 3..ceiling {
        // SAFETY: F_GETFD on an arbitrary integer is harmless; EBADF is ignored.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags >= 0 && flags & libc::FD_CLOEXEC == 0 {
            // SAFETY: `fd` is open in this (child) process and not otherwise used.
            unsafe {
                libc::close(fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_files_raised_to_floor() {
        let limits = ResourceLimits {
            max_open_files: Some(2),
            ..ResourceLimits::default()
        };
        assert_eq!(limits.effective_open_files(), Some(DEFAULT_NOFILE_FLOOR));

        let limits = limits.with_nofile_floor(5);
        assert_eq!(limits.effective_open_files(), Some(5));
    }

    #[test]
    fn floor_never_drops_below_minimum() {
        let limits = ResourceLimits {
            max_open_files: Some(1),
            ..ResourceLimits::default()
        }
        .with_nofile_floor(0);
        assert_eq!(limits.nofile_floor, NOFILE_FLOOR_MIN);
        assert_eq!(limits.effective_open_files(), Some(NOFILE_FLOOR_MIN));
    }

    #[test]
    fn generous_open_files_untouched() {
        let limits = ResourceLimits {
            max_open_files: Some(64),
            ..ResourceLimits::default()
        };
        assert_eq!(limits.effective_open_files(), Some(64));
    }

    #[test]
    fn default_is_empty() {
        assert!(ResourceLimits::default().is_empty());
        assert!(!ResourceLimits {
            cpu_seconds: Some(10),
            ..ResourceLimits::default()
        }
        .is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn fd_ceiling_is_bounded() {
        let ceiling = inherited_fd_ceiling();
        assert!(ceiling > 2);
        assert!(ceiling as u64 <= FD_SCAN_CEILING);
    }
}
