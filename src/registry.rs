//! The job registry: a bounded queue of submitted descriptor names.
//!
//! Clients append under the shared mutex; the dispatcher drains the whole
//! queue in one critical section and processes the names afterwards.

use std::sync::atomic::Ordering;

use crate::config::FtConfig;
use crate::error::{FtError, Result};
use crate::layout::{MAX_PENDING, PendingNames, RegistryRecord, decode_name, encode_name};
use crate::mmap::{Attach, Region};
use crate::sync::ShmMutexGuard;

const LOCAL_NAME: &str = "<local registry>";

#[derive(Debug)]
pub struct JobRegistry {
    region: Region<RegistryRecord>,
}

impl JobRegistry {
    /// Attaches to the registry named by `config`, creating it if needed.
    pub fn open(config: &FtConfig) -> Result<Self> {
        let name = config.registry_region();
        let (region, attach) =
            Region::<RegistryRecord>::open_or_create(&name, config.attach_timeout, |record| {
                // The zeroed record is not yet visible to anyone else.
                let res = unsafe { record.pending.init() };
                res.map_err(|err| FtError::shm(&name, err))
            })?;
        if attach == Attach::Created {
            tracing::info!(region = %name, capacity = MAX_PENDING, "job registry created");
        }
        Ok(Self { region })
    }

    /// Attaches as the server and marks the registry active.
    pub fn activate(config: &FtConfig) -> Result<Self> {
        let registry = Self::open(config)?;
        registry.region.active.store(1, Ordering::Release);
        Ok(registry)
    }

    /// An in-process registry, already active.
    pub fn local() -> Result<Self> {
        let region = Region::<RegistryRecord>::local();
        let res = unsafe { region.pending.init() };
        res.map_err(|err| FtError::shm(LOCAL_NAME, err))?;
        region.active.store(1, Ordering::Release);
        region.publish();
        Ok(Self { region })
    }

    /// Whether a server has attached to this registry.
    pub fn is_active(&self) -> bool {
        self.region.active.load(Ordering::Acquire) != 0
    }

    fn lock(&self) -> Result<ShmMutexGuard<'_, PendingNames>> {
        self.region.pending.lock().map_err(|err| {
            FtError::shm(self.region.name().unwrap_or(LOCAL_NAME), err)
        })
    }

    /// Appends `name` to the pending queue.
    ///
    /// Returns the queue length after the append. A full queue is an error;
    /// the name is not stored.
    pub fn submit(&self, name: &str) -> Result<usize> {
        let encoded = encode_name(name)?;
        let mut pending = self.lock()?;
        let count = pending.count as usize;
        if count >= MAX_PENDING {
            return Err(FtError::CapacityExceeded {
                capacity: MAX_PENDING,
            });
        }
        pending.names[count] = encoded;
        pending.count += 1;
        pending.submitted += 1;
        Ok(count + 1)
    }

    /// Takes every pending name, oldest first, and empties the queue.
    pub fn drain(&self) -> Result<Vec<String>> {
        let mut pending = self.lock()?;
        let count = pending.count as usize;
        let names = pending.names[..count].iter().map(decode_name).collect();
        pending.count = 0;
        Ok(names)
    }

    /// Number of names currently queued.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock()?.count as usize)
    }

    /// Submissions accepted since the registry was created.
    pub fn submitted_total(&self) -> Result<u64> {
        Ok(self.lock()?.submitted)
    }

    pub fn region_name(&self) -> Option<&str> {
        self.region.name()
    }
}
