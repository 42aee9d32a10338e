//! `#[repr(C)]` records that live in shared memory.
//!
//! Every record starts with a [`RegionHeader`] carrying a per-record magic,
//! the layout version and the record size. The creator of a region fills
//! the record in and publishes the header last; openers wait for the header
//! and refuse to use a region whose header does not match their own build.
//!
//! Records hold no pointers or references: a region is mapped at a
//! different address in every process.

use crossbeam_utils::{Backoff, CachePadded};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{FtError, Result};
use crate::sync::{ShmMutex, WakeSignal};

/// Maximum number of slots, and the number of heartbeat counters.
pub const MAX_SLOTS: usize = 100;

/// Capacity of the job registry queue.
pub const MAX_PENDING: usize = 100;

/// Size of a job-name field, including the terminating NUL.
pub const MAX_NAME_LEN: usize = 100;

/// Bumped whenever any record below changes shape.
pub const LAYOUT_VERSION: u32 = 1;

/// Header at offset 0 of every region. 16 bytes, no implicit padding.
#[repr(C)]
#[derive(Debug, Default)]
pub struct RegionHeader {
    magic: AtomicU64,
    version: AtomicU32,
    record_size: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<RegionHeader>() == 16);

impl RegionHeader {
    /// Marks the enclosing record as fully initialized.
    pub(crate) fn publish(&self, magic: u64, record_size: usize) {
        self.version.store(LAYOUT_VERSION, Ordering::Relaxed);
        self.record_size.store(record_size as u32, Ordering::Relaxed);
        self.magic.store(magic, Ordering::Release);
    }

    /// Clears the magic so openers treat the record as uninitialized.
    pub(crate) fn retract(&self) {
        self.magic.store(0, Ordering::Release);
    }

    pub(crate) fn is_published(&self) -> bool {
        self.magic.load(Ordering::Acquire) != 0
    }

    /// Checks a published header against this build's layout.
    pub(crate) fn validate(&self, name: &str, magic: u64, record_size: usize) -> Result<()> {
        let found = self.magic.load(Ordering::Acquire);
        if found == 0 {
            return Err(FtError::NotInitialized {
                name: name.to_string(),
            });
        }
        if found != magic {
            return Err(FtError::layout(
                name,
                format!("magic {found:#018x}, expected {magic:#018x}"),
            ));
        }
        let version = self.version.load(Ordering::Relaxed);
        if version != LAYOUT_VERSION {
            return Err(FtError::layout(
                name,
                format!("layout version {version}, expected {LAYOUT_VERSION}"),
            ));
        }
        let size = self.record_size.load(Ordering::Relaxed) as usize;
        if size != record_size {
            return Err(FtError::layout(
                name,
                format!("record size {size}, expected {record_size}"),
            ));
        }
        Ok(())
    }

    /// Waits up to `timeout` for the creator to publish, then validates.
    pub(crate) fn wait_published(
        &self,
        name: &str,
        magic: u64,
        record_size: usize,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        while !self.is_published() && Instant::now() < deadline {
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(100));
            } else {
                backoff.snooze();
            }
        }
        self.validate(name, magic, record_size)
    }
}

/// A type that may be overlaid on a shared-memory region.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, valid when every byte is zero (a
/// freshly truncated region), contain no pointers, and begin with a
/// [`RegionHeader`].
pub unsafe trait ShmRecord: Sized + Send + Sync {
    /// Identifies the record kind in [`RegionHeader`].
    const MAGIC: u64;

    fn header(&self) -> &RegionHeader;
}

/// The heartbeat channel: one liveness counter per slot.
///
/// Counters are single-writer (the slot's emitter) and single-reader (the
/// slot's monitor). Each sits on its own cache line.
#[repr(C)]
pub struct HeartbeatRecord {
    pub(crate) header: RegionHeader,
    pub(crate) beats: [CachePadded<portable_atomic::AtomicU64>; MAX_SLOTS],
}

unsafe impl ShmRecord for HeartbeatRecord {
    const MAGIC: u64 = u64::from_le_bytes(*b"FTBEAT01");

    fn header(&self) -> &RegionHeader {
        &self.header
    }
}

/// Names waiting for the dispatcher, guarded by the registry mutex.
#[repr(C)]
pub struct PendingNames {
    /// Number of valid entries at the front of `names`.
    pub(crate) count: u32,
    pub(crate) _reserved: u32,
    /// Total submissions ever accepted.
    pub(crate) submitted: u64,
    pub(crate) names: [[u8; MAX_NAME_LEN]; MAX_PENDING],
}

/// The job registry singleton.
#[repr(C)]
pub struct RegistryRecord {
    pub(crate) header: RegionHeader,
    /// Non-zero once a server has attached.
    pub(crate) active: AtomicU32,
    pub(crate) _reserved: u32,
    pub(crate) pending: ShmMutex<PendingNames>,
}

unsafe impl ShmRecord for RegistryRecord {
    const MAGIC: u64 = u64::from_le_bytes(*b"FTJOBS01");

    fn header(&self) -> &RegionHeader {
        &self.header
    }
}

/// One job attempt.
///
/// Identity fields are written by the client before the record is
/// published and never change afterwards. The server only touches
/// `executed`, `exec_allowed` and `wake`.
#[repr(C)]
pub struct JobRecord {
    pub(crate) header: RegionHeader, // 0..16
    pub(crate) pid: i32,             // 16..20
    pub(crate) tid: i32,             // 20..24
    pub(crate) role: u32,            // 24..28
    pub(crate) slot: u32,            // 28..32
    pub(crate) name: [u8; MAX_NAME_LEN], // 32..132
    pub(crate) executed: AtomicU32,  // 132..136
    pub(crate) exec_allowed: AtomicU32, // 136..140
    pub(crate) wake: WakeSignal,     // 140..144
}

const _: () = assert!(std::mem::size_of::<JobRecord>() == 144);

unsafe impl ShmRecord for JobRecord {
    const MAGIC: u64 = u64::from_le_bytes(*b"FTDESC01");

    fn header(&self) -> &RegionHeader {
        &self.header
    }
}

/// Copies `name` into a NUL-padded fixed field.
pub(crate) fn encode_name(name: &str) -> Result<[u8; MAX_NAME_LEN]> {
    let bytes = name.as_bytes();
    if bytes.len() >= MAX_NAME_LEN || bytes.contains(&0) {
        return Err(FtError::NameTooLong {
            name: name.to_string(),
            max: MAX_NAME_LEN - 1,
        });
    }
    let mut field = [0u8; MAX_NAME_LEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

/// Reads a NUL-padded fixed field back into a string.
pub(crate) fn decode_name(field: &[u8; MAX_NAME_LEN]) -> String {
    let len = field.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
    String::from_utf8_lossy(&field[..len]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_validates_only_after_publish() {
        let header = RegionHeader::default();
        assert!(matches!(
            header.validate("/t", 7, 64),
            Err(FtError::NotInitialized { .. })
        ));

        header.publish(7, 64);
        assert!(header.validate("/t", 7, 64).is_ok());
        assert!(matches!(
            header.validate("/t", 8, 64),
            Err(FtError::LayoutMismatch { .. })
        ));
        assert!(matches!(
            header.validate("/t", 7, 65),
            Err(FtError::LayoutMismatch { .. })
        ));

        header.retract();
        assert!(!header.is_published());
    }

    #[test]
    fn wait_published_times_out_on_unpublished_header() {
        let header = RegionHeader::default();
        let res = header.wait_published("/t", 7, 64, Duration::from_millis(2));
        assert!(matches!(res, Err(FtError::NotInitialized { .. })));
    }

    #[test]
    fn names_fit_the_fixed_field() {
        let field = encode_name("replica_4242").unwrap();
        assert_eq!(decode_name(&field), "replica_4242");

        let longest = "x".repeat(MAX_NAME_LEN - 1);
        assert_eq!(decode_name(&encode_name(&longest).unwrap()), longest);

        let too_long = "x".repeat(MAX_NAME_LEN);
        assert!(matches!(
            encode_name(&too_long),
            Err(FtError::NameTooLong { .. })
        ));
    }

    #[test]
    fn record_magics_are_distinct() {
        let magics = [
            HeartbeatRecord::MAGIC,
            RegistryRecord::MAGIC,
            JobRecord::MAGIC,
        ];
        assert_ne!(magics[0], magics[1]);
        assert_ne!(magics[1], magics[2]);
        assert_ne!(magics[0], magics[2]);
    }
}
