//! Job descriptors: one shared record per job attempt.
//!
//! A client creates the descriptor, submits its name to the registry and
//! waits on the descriptor's wake signal. The server opens the same record
//! by name, marks it executed and wakes the client with a decision.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::config::FtConfig;
use crate::error::{FtError, Result};
use crate::layout::{JobRecord, MAX_SLOTS, decode_name, encode_name};
use crate::mmap::Region;
use crate::sync::WakeSignal;

/// Which side of a slot a job attempt plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Role {
    Primary = 0,
    Replica = 1,
}

impl Role {
    pub const PRIMARY_LABEL: &'static str = "main";
    pub const REPLICA_LABEL: &'static str = "replica";

    /// Parses a role label; only `"main"` and `"replica"` are accepted.
    pub fn from_label(label: &str) -> Result<Self> {
        match label {
            Self::PRIMARY_LABEL => Ok(Role::Primary),
            Self::REPLICA_LABEL => Ok(Role::Replica),
            other => Err(FtError::InvalidRole(other.to_string())),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Primary => Self::PRIMARY_LABEL,
            Role::Replica => Self::REPLICA_LABEL,
        }
    }

    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Role::Primary),
            1 => Some(Role::Replica),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Role {
    type Err = FtError;

    fn from_str(s: &str) -> Result<Self> {
        Role::from_label(s)
    }
}

/// Handle to one job attempt's shared record.
#[derive(Debug)]
pub struct JobDescriptor {
    region: Region<JobRecord>,
    name: String,
    role: Role,
    slot: usize,
    pid: i32,
    tid: i32,
}

impl JobDescriptor {
    /// Name of the descriptor for `role` on thread `tid`.
    pub fn job_name(role: Role, tid: i32) -> String {
        format!("{}_{}", role.label(), tid)
    }

    /// Creates and publishes a fresh descriptor. Client side.
    ///
    /// A leftover object with the same name (a recycled thread id) is
    /// overwritten: the server never looks at a descriptor before its name
    /// has been submitted.
    pub fn create(config: &FtConfig, pid: i32, tid: i32, role: Role, slot: usize) -> Result<Self> {
        let name = Self::job_name(role, tid);
        let (region, _) = Region::attach(&config.job_region(&name), true)?;
        Self::init(region, name, pid, tid, role, slot)
    }

    /// A descriptor on the heap, for in-process use.
    pub fn local(pid: i32, tid: i32, role: Role, slot: usize) -> Result<Self> {
        Self::init(
            Region::local(),
            Self::job_name(role, tid),
            pid,
            tid,
            role,
            slot,
        )
    }

    fn init(
        mut region: Region<JobRecord>,
        name: String,
        pid: i32,
        tid: i32,
        role: Role,
        slot: usize,
    ) -> Result<Self> {
        if slot >= MAX_SLOTS {
            return Err(FtError::SlotOutOfRange {
                slot,
                slots: MAX_SLOTS,
            });
        }
        let encoded = encode_name(&name)?;

        region.header.retract();
        let record = region.get_mut();
        record.pid = pid;
        record.tid = tid;
        record.role = role as u32;
        record.slot = slot as u32;
        record.name = encoded;
        record.executed.store(0, Ordering::Relaxed);
        // Optimistic default; the server overwrites it before waking.
        record.exec_allowed.store(1, Ordering::Relaxed);
        record.wake = WakeSignal::default();
        region.publish();

        Ok(Self {
            region,
            name,
            role,
            slot,
            pid,
            tid,
        })
    }

    /// Opens a submitted descriptor by name. Server side.
    ///
    /// The name is unlinked once mapped: the client keeps its own mapping
    /// and nobody else needs to find the record again.
    pub fn open(config: &FtConfig, name: &str) -> Result<Self> {
        let region_name = config.job_region(name);
        let region = Region::<JobRecord>::open(&region_name, config.attach_timeout)?;

        let role = Role::from_raw(region.role).ok_or_else(|| {
            FtError::layout(&region_name, format!("unknown role tag {}", region.role))
        })?;
        let slot = region.slot as usize;
        if slot >= MAX_SLOTS {
            return Err(FtError::layout(
                &region_name,
                format!("slot {slot} exceeds {MAX_SLOTS}"),
            ));
        }
        let stored = decode_name(&region.name);
        if stored != name {
            return Err(FtError::layout(
                &region_name,
                format!("record is named {stored:?}"),
            ));
        }

        if let Err(err) = region.unlink() {
            tracing::debug!(job = name, error = %err, "could not unlink descriptor name");
        }

        Ok(Self {
            pid: region.pid,
            tid: region.tid,
            name: stored,
            role,
            slot,
            region,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn tid(&self) -> i32 {
        self.tid
    }

    /// Whether the server has already issued a run decision.
    pub fn is_executed(&self) -> bool {
        self.region.executed.load(Ordering::Acquire) != 0
    }

    /// Records that a run decision was issued. Never reverts.
    pub fn mark_executed(&self) {
        self.region.executed.store(1, Ordering::Release);
    }

    pub fn exec_allowed(&self) -> bool {
        self.region.exec_allowed.load(Ordering::Acquire) != 0
    }

    /// Wakes the client with `allowed` as its decision.
    ///
    /// Only the first call has any effect; later calls return `false`.
    pub fn wake(&self, allowed: bool) -> bool {
        self.region.wake.post_with(|| {
            self.region
                .exec_allowed
                .store(allowed as u32, Ordering::Relaxed)
        })
    }

    /// Wakes the client and lets it run.
    pub fn trigger(&self) -> bool {
        self.wake(true)
    }

    /// Wakes the client and tells it to abort.
    pub fn reject(&self) -> bool {
        self.wake(false)
    }

    /// Whether a decision has been (or is being) delivered.
    pub fn is_woken(&self) -> bool {
        self.region.wake.is_claimed()
    }

    /// Blocks until woken and returns the decision. Client side.
    ///
    /// There is no timeout: a server that never classifies this job keeps
    /// the caller waiting.
    pub fn wait(&self, poll: Duration) -> bool {
        self.region.wake.wait(poll);
        self.exec_allowed()
    }

    /// Like [`JobDescriptor::wait`], giving up after `timeout`.
    pub fn wait_timeout(&self, poll: Duration, timeout: Duration) -> Option<bool> {
        self.region
            .wake
            .wait_timeout(poll, timeout)
            .then(|| self.exec_allowed())
    }

    /// Removes the descriptor's name, if it still has one.
    pub fn unlink(&self) -> Result<()> {
        self.region.unlink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_labels_round_trip() {
        assert_eq!(Role::from_label("main").unwrap(), Role::Primary);
        assert_eq!(Role::from_label("replica").unwrap(), Role::Replica);
        assert_eq!("replica".parse::<Role>().unwrap(), Role::Replica);
        assert_eq!(Role::Primary.to_string(), "main");
        assert_eq!(Role::Replica.label(), "replica");
    }

    #[test]
    fn unknown_role_label_is_rejected() {
        for label in ["Main", "primary", "", "replica "] {
            assert!(
                matches!(Role::from_label(label), Err(FtError::InvalidRole(_))),
                "label {label:?} must be rejected"
            );
        }
    }

    #[test]
    fn new_descriptor_defaults() {
        let job = JobDescriptor::local(10, 20, Role::Replica, 3).unwrap();
        assert_eq!(job.name(), "replica_20");
        assert_eq!(job.role(), Role::Replica);
        assert_eq!(job.slot(), 3);
        assert_eq!(job.pid(), 10);
        assert_eq!(job.tid(), 20);
        assert!(!job.is_executed());
        assert!(job.exec_allowed(), "exec_allowed starts optimistic");
        assert!(!job.is_woken());
    }

    #[test]
    fn wake_is_one_shot() {
        let job = JobDescriptor::local(1, 2, Role::Primary, 0).unwrap();
        assert!(job.reject());
        assert!(!job.trigger(), "a second wake must be ignored");
        assert_eq!(
            job.wait_timeout(Duration::from_micros(10), Duration::from_millis(1)),
            Some(false)
        );
    }

    #[test]
    fn executed_is_monotonic() {
        let job = JobDescriptor::local(1, 2, Role::Primary, 0).unwrap();
        job.mark_executed();
        job.mark_executed();
        assert!(job.is_executed());
    }

    #[test]
    fn wait_times_out_without_a_wake() {
        let job = JobDescriptor::local(1, 2, Role::Primary, 0).unwrap();
        assert_eq!(
            job.wait_timeout(Duration::from_micros(10), Duration::from_millis(2)),
            None
        );
    }

    #[test]
    fn slot_out_of_range_is_rejected() {
        assert!(matches!(
            JobDescriptor::local(1, 2, Role::Primary, MAX_SLOTS),
            Err(FtError::SlotOutOfRange { .. })
        ));
    }

    #[test]
    fn server_sees_what_the_client_published() {
        let config = FtConfig::new(format!("ftjob{}", std::process::id()));
        let client = JobDescriptor::create(&config, 77, 4242, Role::Primary, 5).unwrap();

        let server = JobDescriptor::open(&config, "main_4242").unwrap();
        assert_eq!(server.pid(), 77);
        assert_eq!(server.slot(), 5);
        assert_eq!(server.role(), Role::Primary);

        // The server unlinked the name; a second open fails.
        assert!(JobDescriptor::open(&config, "main_4242").is_err());

        server.mark_executed();
        assert!(server.trigger());
        assert!(client.is_executed());
        assert!(client.wait(Duration::from_micros(10)));
    }
}
