//! Heartbeat channel and the client-side emitter.
//!
//! The channel is a fixed array of counters in shared memory, one per slot.
//! An admitted job bumps its slot's counter every emitter tick; the
//! server's monitor for that slot only checks whether the value changed, so
//! the wrap-around bound carries no meaning beyond "keeps moving".
//!
//! Counters are written without locks. Each slot has a single writer, and
//! a lost or torn update is harmless because only staleness matters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::FtConfig;
use crate::error::{FtError, Result};
use crate::layout::{HeartbeatRecord, MAX_SLOTS};
use crate::mmap::Region;
use crate::utils::Pacer;

/// Shared per-slot liveness counters.
#[derive(Debug)]
pub struct HeartbeatChannel {
    region: Region<HeartbeatRecord>,
}

impl HeartbeatChannel {
    /// Opens the channel named by `config`, creating it if needed.
    pub fn open(config: &FtConfig) -> Result<Self> {
        let (region, _) = Region::open_or_create(
            &config.heartbeat_region(),
            config.attach_timeout,
            |_| Ok(()),
        )?;
        Ok(Self { region })
    }

    /// An in-process channel, not visible to other processes.
    pub fn local() -> Self {
        let region = Region::<HeartbeatRecord>::local();
        region.publish();
        Self { region }
    }

    fn check(slot: usize) -> Result<()> {
        if slot >= MAX_SLOTS {
            return Err(FtError::SlotOutOfRange {
                slot,
                slots: MAX_SLOTS,
            });
        }
        Ok(())
    }

    /// Zeroes a slot's counter. Called once by the slot's monitor.
    pub fn claim(&self, slot: usize) -> Result<()> {
        Self::check(slot)?;
        self.region.beats[slot].store(0, Ordering::Release);
        Ok(())
    }

    pub fn load(&self, slot: usize) -> Result<u64> {
        Self::check(slot)?;
        Ok(self.region.beats[slot].load(Ordering::Acquire))
    }

    /// Advances a slot's counter, resetting it once it exceeds `wrap`.
    ///
    /// Returns the value written.
    pub fn beat(&self, slot: usize, wrap: u64) -> Result<u64> {
        Self::check(slot)?;
        Ok(self.beat_unchecked(slot, wrap))
    }

    /// `slot` must already be range-checked.
    fn beat_unchecked(&self, slot: usize, wrap: u64) -> u64 {
        let cell = &self.region.beats[slot];
        let current = cell.load(Ordering::Relaxed);
        let next = if current > wrap { 0 } else { current + 1 };
        cell.store(next, Ordering::Release);
        next
    }

    pub fn region_name(&self) -> Option<&str> {
        self.region.name()
    }
}

/// Handle to a running emitter thread.
///
/// Dropping the handle leaves the thread running: an admitted job keeps
/// heartbeating for the rest of its process's life. [`HeartbeatEmitter::stop`]
/// exists for callers that want to go silent deliberately.
#[derive(Debug)]
pub struct HeartbeatEmitter {
    slot: usize,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatEmitter {
    /// Starts bumping `slot` every `config.emitter_interval`.
    pub fn spawn(channel: Arc<HeartbeatChannel>, slot: usize, config: &FtConfig) -> Result<Self> {
        HeartbeatChannel::check(slot)?;
        let stop = Arc::new(AtomicBool::new(false));
        let interval = config.emitter_interval;
        let wrap = config.heartbeat_wrap;

        let handle = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name(format!("ft-heartbeat-{slot}"))
                .spawn(move || emit(&channel, slot, interval, wrap, &stop))
                .map_err(FtError::Spawn)?
        };
        tracing::info!(slot, ?interval, "heartbeat emitter started");

        Ok(Self {
            slot,
            stop,
            handle: Some(handle),
        })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(slot = self.slot, "heartbeat emitter panicked");
            }
        }
        tracing::info!(slot = self.slot, "heartbeat emitter stopped");
    }

    /// Lets the thread run for the rest of the process.
    pub fn detach(mut self) {
        self.handle.take();
    }
}

fn emit(channel: &HeartbeatChannel, slot: usize, interval: Duration, wrap: u64, stop: &AtomicBool) {
    let mut pacer = Pacer::new(interval);
    while !stop.load(Ordering::Acquire) {
        // The slot was range-checked before the thread started.
        channel.beat_unchecked(slot, wrap);
        pacer.wait();
    }
}
