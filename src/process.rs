//! Process and thread identity, and signalling other processes.

use crate::error::{FtError, Result};

pub fn current_pid() -> i32 {
    std::process::id() as i32
}

/// Kernel thread id of the calling thread.
#[cfg(target_os = "linux")]
pub fn current_tid() -> i32 {
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// Kernel thread id of the calling thread.
#[cfg(target_os = "macos")]
pub fn current_tid() -> i32 {
    let mut tid: u64 = 0;
    unsafe {
        libc::pthread_threadid_np(0, &mut tid);
    }
    tid as i32
}

/// Process-unique id of the calling thread.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn current_tid() -> i32 {
    use std::sync::atomic::{AtomicI32, Ordering};

    static NEXT: AtomicI32 = AtomicI32::new(1);
    thread_local! {
        static TID: i32 = NEXT.fetch_add(1, Ordering::Relaxed);
    }
    TID.with(|tid| *tid)
}

/// Delivers termination requests to other processes.
///
/// The dispatcher uses this exactly once per recovery: when a restarted
/// primary supersedes a replica that is still running.
pub trait ProcessControl: Send + Sync {
    fn terminate(&self, pid: i32) -> Result<()>;
}

/// Sends a fixed signal with `kill(2)`.
#[derive(Debug, Clone, Copy)]
pub struct Signaller {
    signal: libc::c_int,
}

impl Signaller {
    pub fn new(signal: libc::c_int) -> Self {
        Self { signal }
    }

    pub fn signal(&self) -> libc::c_int {
        self.signal
    }
}

impl Default for Signaller {
    fn default() -> Self {
        Self::new(libc::SIGINT)
    }
}

impl ProcessControl for Signaller {
    fn terminate(&self, pid: i32) -> Result<()> {
        // pid 0 and negative pids address process groups, never a single job.
        if pid <= 0 {
            return Err(FtError::Signal {
                pid,
                source: std::io::Error::from_raw_os_error(libc::ESRCH),
            });
        }
        if unsafe { libc::kill(pid, self.signal) } == -1 {
            return Err(FtError::Signal {
                pid,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}
