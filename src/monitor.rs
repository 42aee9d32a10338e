//! Per-slot heartbeat monitors.
//!
//! A monitor only knows whether its slot's counter moved since the last
//! tick. A counter that has not moved for `stale_threshold` ticks, and has
//! moved at least once since the channel was claimed, means the slot's
//! executor died: the sleeping replica, if one is parked, is woken and
//! promoted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::FtConfig;
use crate::dispatcher::Action;
use crate::error::Result;
use crate::heartbeat::HeartbeatChannel;
use crate::table::JobTable;
use crate::utils::Pacer;

/// Counts consecutive observations of an unchanged value.
#[derive(Debug, Clone)]
pub struct Staleness {
    previous: u64,
    stale_ticks: u32,
    threshold: u32,
    /// Whether any reading ever differed from the claimed zero.
    moved: bool,
}

impl Staleness {
    pub fn new(threshold: u32) -> Self {
        Self {
            previous: 0,
            stale_ticks: 0,
            threshold,
            moved: false,
        }
    }

    /// Records one reading and reports whether the writer is considered dead.
    ///
    /// A counter that never moved never counts as dead: nobody has written
    /// it yet. Once it has moved, a freeze at any value counts, including
    /// zero right after a wrap.
    pub fn observe(&mut self, value: u64) -> bool {
        if value == self.previous {
            self.stale_ticks = self.stale_ticks.saturating_add(1);
        } else {
            self.previous = value;
            self.stale_ticks = 0;
            self.moved = true;
        }
        self.stale_ticks >= self.threshold && self.moved
    }

    pub fn reset(&mut self) {
        self.stale_ticks = 0;
    }

    pub fn stale_ticks(&self) -> u32 {
        self.stale_ticks
    }
}

pub struct HeartbeatMonitor {
    slot: usize,
    channel: Arc<HeartbeatChannel>,
    table: Arc<JobTable>,
    staleness: Staleness,
    interval: Duration,
}

impl HeartbeatMonitor {
    /// Creates the monitor and zeroes the slot's counter.
    pub fn new(
        slot: usize,
        channel: Arc<HeartbeatChannel>,
        table: Arc<JobTable>,
        config: &FtConfig,
    ) -> Result<Self> {
        channel.claim(slot)?;
        Ok(Self {
            slot,
            channel,
            table,
            staleness: Staleness::new(config.stale_threshold),
            interval: config.monitor_interval,
        })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Reads the counter once and promotes the replica if the primary died.
    pub fn tick(&mut self) -> Result<Option<Action>> {
        let value = self.channel.load(self.slot)?;
        if !self.staleness.observe(value) {
            return Ok(None);
        }
        if self.staleness.stale_ticks() == self.staleness.threshold {
            tracing::warn!(slot = self.slot, heartbeat = value, "heartbeat stalled");
        }

        let mut sets = self.table.lock();
        let Some((replica, displaced)) = sets.promote(self.slot) else {
            return Ok(None);
        };
        replica.trigger();
        drop(sets);

        if let Some(old) = displaced {
            tracing::warn!(slot = self.slot, job = old.name(), "promotion displaced a running replica");
        }
        tracing::info!(
            slot = self.slot,
            job = replica.name(),
            stale_ticks = self.staleness.stale_ticks(),
            "replica promoted"
        );
        self.staleness.reset();
        Ok(Some(Action::Promoted {
            slot: self.slot,
            replica: replica.name().to_string(),
        }))
    }

    /// Ticks every `monitor_interval` until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) {
        tracing::debug!(slot = self.slot, "heartbeat monitor started");
        let mut pacer = Pacer::new(self.interval);
        while !stop.load(Ordering::Acquire) {
            if let Err(err) = self.tick() {
                tracing::error!(slot = self.slot, error = %err, "heartbeat monitor tick failed");
            }
            pacer.wait();
        }
        tracing::debug!(slot = self.slot, "heartbeat monitor stopped");
    }
}
