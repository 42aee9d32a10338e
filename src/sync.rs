//! Cross-process synchronization primitives that live inside shared records.
//!
//! Both types are plain `#[repr(C)]` data so they can be placed in a
//! mapped region and used by every process that maps it.

use crossbeam_utils::Backoff;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

fn check(rc: libc::c_int) -> std::io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::from_raw_os_error(rc))
    }
}

/// A process-shared pthread mutex guarding a value of type `T`.
///
/// The mutex must be initialized with [`ShmMutex::init`] by whichever
/// process creates the enclosing region, before that region is published.
/// On Linux the mutex is robust: if an owner dies while holding it, the
/// next locker recovers it instead of blocking forever.
#[repr(C)]
pub struct ShmMutex<T> {
    raw: UnsafeCell<libc::pthread_mutex_t>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for ShmMutex<T> {}
unsafe impl<T: Send> Sync for ShmMutex<T> {}

impl<T> ShmMutex<T> {
    /// Initializes the raw mutex as `PTHREAD_PROCESS_SHARED`.
    ///
    /// # Safety
    ///
    /// Must be called exactly once on zeroed memory, before any other thread
    /// or process can reach this mutex.
    pub(crate) unsafe fn init(&self) -> std::io::Result<()> {
        unsafe {
            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            check(libc::pthread_mutexattr_init(&mut attr))?;
            let res = (|| {
                check(libc::pthread_mutexattr_setpshared(
                    &mut attr,
                    libc::PTHREAD_PROCESS_SHARED,
                ))?;
                #[cfg(target_os = "linux")]
                check(libc::pthread_mutexattr_setrobust(
                    &mut attr,
                    libc::PTHREAD_MUTEX_ROBUST,
                ))?;
                check(libc::pthread_mutex_init(self.raw.get(), &attr))
            })();
            libc::pthread_mutexattr_destroy(&mut attr);
            res
        }
    }

    /// Blocks until the mutex is acquired.
    pub fn lock(&self) -> std::io::Result<ShmMutexGuard<'_, T>> {
        match unsafe { libc::pthread_mutex_lock(self.raw.get()) } {
            0 => {}
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => {
                tracing::warn!("previous owner died holding a shared mutex, recovering it");
                check(unsafe { libc::pthread_mutex_consistent(self.raw.get()) })?;
            }
            rc => return Err(std::io::Error::from_raw_os_error(rc)),
        }
        Ok(ShmMutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }
}

/// RAII guard returned by [`ShmMutex::lock`]; unlocks on drop.
///
/// Not `Send`: a pthread mutex must be unlocked by the thread that locked it.
pub struct ShmMutexGuard<'a, T> {
    mutex: &'a ShmMutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for ShmMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for ShmMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for ShmMutexGuard<'_, T> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.raw.get());
        }
    }
}

const PENDING: u32 = 0;
const CLAIMED: u32 = 1;
const POSTED: u32 = 2;

/// One-shot, single-writer wake-up rendezvous.
///
/// A signal starts `PENDING` (all-zero memory). Exactly one writer may
/// claim it, publish whatever the waiter should read, and post it. The
/// waiter observes `POSTED` with acquire ordering, so everything written
/// between claim and post is visible once [`WakeSignal::wait`] returns.
///
/// ```text
/// PENDING --claim--> CLAIMED --post--> POSTED
/// ```
///
/// There is nothing to destroy: the signal dies with the record it lives in.
#[repr(C)]
#[derive(Debug, Default)]
pub struct WakeSignal(AtomicU32);

impl WakeSignal {
    /// Claims the signal, runs `publish`, then posts.
    ///
    /// Returns `false` without running `publish` if the signal was already
    /// claimed by someone else.
    pub fn post_with(&self, publish: impl FnOnce()) -> bool {
        if self
            .0
            .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        publish();
        self.0.store(POSTED, Ordering::Release);
        true
    }

    /// Whether a writer has claimed (and possibly already posted) the signal.
    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire) != PENDING
    }

    pub fn is_posted(&self) -> bool {
        self.0.load(Ordering::Acquire) == POSTED
    }

    /// Waits without a deadline.
    ///
    /// Spins and yields first, then falls back to sleeping `poll` between
    /// checks so a long wait does not burn a core.
    pub fn wait(&self, poll: Duration) {
        let backoff = Backoff::new();
        while !self.is_posted() {
            if backoff.is_completed() {
                std::thread::sleep(poll);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Like [`WakeSignal::wait`] but gives up after `timeout`.
    ///
    /// Returns whether the signal was posted.
    pub fn wait_timeout(&self, poll: Duration, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        while !self.is_posted() {
            if Instant::now() >= deadline {
                return false;
            }
            if backoff.is_completed() {
                std::thread::sleep(poll);
            } else {
                backoff.snooze();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn wake_signal_posts_once() {
        let signal = WakeSignal::default();
        assert!(!signal.is_claimed());
        assert!(!signal.is_posted());

        let mut runs = 0;
        assert!(signal.post_with(|| runs += 1));
        assert!(signal.is_posted());

        // A second writer loses and its publish step never runs.
        assert!(!signal.post_with(|| runs += 1));
        assert_eq!(runs, 1, "publish must run exactly once");
    }

    #[test]
    fn wake_signal_publishes_before_waiter_returns() {
        let signal = Arc::new(WakeSignal::default());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let signal = Arc::clone(&signal);
            let flag = Arc::clone(&flag);
            std::thread::spawn(move || {
                signal.wait(Duration::from_micros(50));
                flag.load(Ordering::Relaxed)
            })
        };

        std::thread::sleep(Duration::from_millis(5));
        signal.post_with(|| flag.store(true, Ordering::Relaxed));

        assert!(
            waiter.join().unwrap(),
            "waiter must observe data published before the post"
        );
    }

    #[test]
    fn wake_signal_wait_timeout_expires() {
        let signal = WakeSignal::default();
        let posted = signal.wait_timeout(Duration::from_micros(100), Duration::from_millis(5));
        assert!(!posted);
    }

    #[test]
    fn shm_mutex_guards_data_across_threads() {
        let mutex: Arc<ShmMutex<u64>> = Arc::new(unsafe { std::mem::zeroed() });
        unsafe { mutex.init().unwrap() };

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        *mutex.lock().unwrap() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*mutex.lock().unwrap(), 4000);
    }
}
