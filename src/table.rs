//! Server-side bookkeeping of which descriptors hold which slot.
//!
//! The dispatcher and every monitor share one [`JobTable`]. All reads and
//! writes go through a single mutex so a failover decision always sees both
//! roles of a slot at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::job::{JobDescriptor, Role};

/// `"{role}_{slot}"`, the key of both sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub role: Role,
    pub slot: usize,
}

impl SlotKey {
    pub fn new(role: Role, slot: usize) -> Self {
        Self { role, slot }
    }

    pub fn primary(slot: usize) -> Self {
        Self::new(Role::Primary, slot)
    }

    pub fn replica(slot: usize) -> Self {
        Self::new(Role::Replica, slot)
    }

    pub fn of(job: &JobDescriptor) -> Self {
        Self::new(job.role(), job.slot())
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.role.label(), self.slot)
    }
}

/// The running and sleeping sets. Only reachable through [`JobTable::lock`].
#[derive(Debug, Default)]
pub struct JobSets {
    running: HashMap<SlotKey, Arc<JobDescriptor>>,
    sleeping: HashMap<SlotKey, Arc<JobDescriptor>>,
}

impl JobSets {
    /// Files a freshly submitted descriptor: primaries run, replicas sleep.
    ///
    /// Returns the descriptor it replaced under the same key, if any.
    pub fn classify(&mut self, job: Arc<JobDescriptor>) -> Option<Arc<JobDescriptor>> {
        let key = SlotKey::of(&job);
        match key.role {
            Role::Primary => self.running.insert(key, job),
            Role::Replica => self.sleeping.insert(key, job),
        }
    }

    pub fn running(&self, key: SlotKey) -> Option<&Arc<JobDescriptor>> {
        self.running.get(&key)
    }

    pub fn sleeping(&self, key: SlotKey) -> Option<&Arc<JobDescriptor>> {
        self.sleeping.get(&key)
    }

    pub fn remove_running(&mut self, key: SlotKey) -> Option<Arc<JobDescriptor>> {
        self.running.remove(&key)
    }

    /// Moves the slot's sleeping replica into the running set.
    ///
    /// Returns the promoted replica and whatever running replica it
    /// displaced.
    pub fn promote(
        &mut self,
        slot: usize,
    ) -> Option<(Arc<JobDescriptor>, Option<Arc<JobDescriptor>>)> {
        let key = SlotKey::replica(slot);
        let replica = self.sleeping.remove(&key)?;
        let displaced = self.running.insert(key, Arc::clone(&replica));
        Some((replica, displaced))
    }

    /// Empties both sets, returning every descriptor that was never woken.
    pub fn drain_unwoken(&mut self) -> Vec<Arc<JobDescriptor>> {
        self.running
            .drain()
            .chain(self.sleeping.drain())
            .map(|(_, job)| job)
            .filter(|job| !job.is_woken())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty() && self.sleeping.is_empty()
    }
}

/// The shared table.
#[derive(Debug, Default)]
pub struct JobTable {
    sets: Mutex<JobSets>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the table.
    ///
    /// A thread that panicked while holding the lock leaves the sets as they
    /// were; every mutation is a single map operation, so the data is still
    /// usable and the poison is ignored.
    pub fn lock(&self) -> MutexGuard<'_, JobSets> {
        self.sets.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> TableSnapshot {
        let sets = self.lock();
        let entries = |map: &HashMap<SlotKey, Arc<JobDescriptor>>| {
            let mut entries: Vec<JobEntry> = map
                .iter()
                .map(|(key, job)| JobEntry {
                    key: *key,
                    name: job.name().to_string(),
                    pid: job.pid(),
                    executed: job.is_executed(),
                    woken: job.is_woken(),
                })
                .collect();
            entries.sort_by_key(|entry| entry.key);
            entries
        };
        TableSnapshot {
            running: entries(&sets.running),
            sleeping: entries(&sets.sleeping),
        }
    }
}

/// One descriptor as seen in a [`TableSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEntry {
    pub key: SlotKey,
    pub name: String,
    pub pid: i32,
    pub executed: bool,
    pub woken: bool,
}

/// A point-in-time copy of the table, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    pub running: Vec<JobEntry>,
    pub sleeping: Vec<JobEntry>,
}

impl TableSnapshot {
    pub fn running(&self, key: SlotKey) -> Option<&JobEntry> {
        self.running.iter().find(|entry| entry.key == key)
    }

    pub fn sleeping(&self, key: SlotKey) -> Option<&JobEntry> {
        self.sleeping.iter().find(|entry| entry.key == key)
    }
}
