/// Returns timestamp in ns
#[cfg(unix)]
#[inline(never)]
pub fn mono_time_ns() -> u64 {
    use libc::{CLOCK_MONOTONIC, clock_gettime, timespec};
    unsafe {
        let mut ts = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        clock_gettime(CLOCK_MONOTONIC, &mut ts);
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
}

/// Sleeps away the rest of a fixed cadence.
///
/// Each [`Pacer::wait`] sleeps for `interval` minus the time spent since the
/// previous call returned, so the loop body's own cost does not stretch the
/// period. An overrunning body yields instead of sleeping.
#[derive(Debug)]
pub(crate) struct Pacer {
    interval_ns: u64,
    started: u64,
}

impl Pacer {
    pub(crate) fn new(interval: std::time::Duration) -> Self {
        Self {
            interval_ns: interval.as_nanos().min(u64::MAX as u128) as u64,
            started: mono_time_ns(),
        }
    }

    pub(crate) fn wait(&mut self) {
        let elapsed = mono_time_ns().saturating_sub(self.started);
        if elapsed < self.interval_ns {
            std::thread::sleep(std::time::Duration::from_nanos(self.interval_ns - elapsed));
        } else {
            std::thread::yield_now();
        }
        self.started = mono_time_ns();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn mono_time_ns_advances_across_a_sleep() {
        let t1 = mono_time_ns();
        std::thread::sleep(Duration::from_millis(2));
        let t2 = mono_time_ns();
        assert!(t1 > 0);
        assert!(t2 > t1, "monotonic clock went from {t1} to {t2}");
    }

    #[test]
    fn pacer_keeps_the_cadence() {
        let mut pacer = Pacer::new(Duration::from_millis(2));
        let start = Instant::now();
        for _ in 0..5 {
            pacer.wait();
        }
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(10),
            "five 2ms ticks finished in {elapsed:?}"
        );
    }
}
