//! Client side of the admission handshake.
//!
//! ```text
//! Created -> Submitted -> Waiting -> Admitted | Rejected -> Destroyed
//! ```
//!
//! The caller blocks in [`FtClient::request`] until the server decides. An
//! admitted caller gets a running [`HeartbeatEmitter`] for its slot.

use std::sync::Arc;

use crate::config::FtConfig;
use crate::error::{FtError, Result};
use crate::heartbeat::{HeartbeatChannel, HeartbeatEmitter};
use crate::job::{JobDescriptor, Role};
use crate::registry::JobRegistry;

/// Outcome of one handshake.
#[derive(Debug)]
pub enum Admission {
    /// The caller may run; its heartbeat is already being emitted.
    Admitted(HeartbeatEmitter),
    /// The caller must not run.
    Rejected,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    pub fn into_emitter(self) -> Option<HeartbeatEmitter> {
        match self {
            Admission::Admitted(emitter) => Some(emitter),
            Admission::Rejected => None,
        }
    }
}

/// Connection to a server's registry and heartbeat channel.
#[derive(Debug)]
pub struct FtClient {
    config: FtConfig,
    registry: JobRegistry,
    channel: Arc<HeartbeatChannel>,
}

impl FtClient {
    pub fn connect(config: FtConfig) -> Result<Self> {
        config.validate()?;
        let registry = JobRegistry::open(&config)?;
        let channel = Arc::new(HeartbeatChannel::open(&config)?);
        if !registry.is_active() {
            tracing::warn!(
                namespace = %config.namespace,
                "no server has attached yet, submissions will wait for one"
            );
        }
        Ok(Self {
            config,
            registry,
            channel,
        })
    }

    pub fn config(&self) -> &FtConfig {
        &self.config
    }

    /// Runs the handshake for one job attempt and blocks until decided.
    ///
    /// `label` and `slot` are checked before any shared state is touched.
    pub fn request(&self, pid: i32, tid: i32, label: &str, slot: usize) -> Result<Admission> {
        let role = Role::from_label(label)?;
        if slot >= self.config.slots {
            return Err(FtError::SlotOutOfRange {
                slot,
                slots: self.config.slots,
            });
        }

        let job = JobDescriptor::create(&self.config, pid, tid, role, slot)?;
        tracing::debug!(job = job.name(), slot, "descriptor created");

        let queued = match self.registry.submit(job.name()) {
            Ok(queued) => queued,
            Err(err) => {
                release(job);
                return Err(err);
            }
        };
        tracing::info!(job = job.name(), slot, queued, "submitted, waiting for a decision");

        let allowed = job.wait(self.config.wake_poll_interval);
        let name = job.name().to_string();
        // Normally already unlinked by the server.
        release(job);

        if !allowed {
            tracing::info!(job = %name, slot, "rejected");
            return Ok(Admission::Rejected);
        }
        tracing::info!(job = %name, slot, "admitted");
        let emitter = HeartbeatEmitter::spawn(Arc::clone(&self.channel), slot, &self.config)?;
        Ok(Admission::Admitted(emitter))
    }

    /// Like [`FtClient::request`], leaving the emitter running for the rest
    /// of the process. Returns whether the caller may run.
    pub fn begin(&self, pid: i32, tid: i32, label: &str, slot: usize) -> Result<bool> {
        Ok(match self.request(pid, tid, label, slot)? {
            Admission::Admitted(emitter) => {
                emitter.detach();
                true
            }
            Admission::Rejected => false,
        })
    }
}

/// Unlinks the descriptor's name, if still present, and unmaps it.
fn release(job: JobDescriptor) {
    if let Err(err) = job.unlink() {
        tracing::debug!(job = job.name(), error = %err, "could not unlink descriptor name");
    }
}

/// Runs the handshake against the default namespace.
///
/// Returns `Ok(true)` when the caller may run; its heartbeat emitter keeps
/// running in the background from then on.
pub fn begin(pid: i32, tid: i32, label: &str, slot: usize) -> Result<bool> {
    // Reject a bad label before attaching to anything.
    Role::from_label(label)?;
    FtClient::connect(FtConfig::default())?.begin(pid, tid, label, slot)
}
