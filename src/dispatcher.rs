//! The server's dispatch loop.
//!
//! Every tick drains the registry, files each submitted descriptor into the
//! job table and then walks every configured slot to apply the failover
//! policy:
//!
//! | running set            | replica executed | action                                  |
//! |------------------------|------------------|-----------------------------------------|
//! | nothing                |                  | none                                    |
//! | `main` only            |                  | trigger `main` once                     |
//! | `replica` only         | no               | record the promotion                    |
//! | `main` and `replica`   | no               | record the promotion, drop a dead `main`|
//! | `main` and `replica`   | yes              | signal the replica, trigger `main`      |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::FtConfig;
use crate::error::Result;
use crate::job::JobDescriptor;
use crate::process::ProcessControl;
use crate::registry::JobRegistry;
use crate::table::{JobTable, SlotKey};
use crate::utils::Pacer;

/// Something a server loop did during one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A primary was marked executed and woken with permission to run.
    Triggered { slot: usize, name: String },
    /// A promoted replica was recorded as the slot's executor.
    FailedOver {
        slot: usize,
        replica: String,
        primary_removed: bool,
    },
    /// A new primary took the slot back from a running replica.
    Recovered {
        slot: usize,
        primary: String,
        killed_pid: i32,
    },
    /// A monitor woke the slot's sleeping replica.
    Promoted { slot: usize, replica: String },
    /// A never-woken descriptor was replaced by a newer submission and rejected.
    Superseded { key: SlotKey, name: String },
    /// A descriptor outside the configured slots was rejected.
    Rejected { name: String, slot: usize },
}

pub struct Dispatcher {
    config: FtConfig,
    registry: Arc<JobRegistry>,
    table: Arc<JobTable>,
    control: Arc<dyn ProcessControl>,
}

impl Dispatcher {
    pub fn new(
        config: FtConfig,
        registry: Arc<JobRegistry>,
        table: Arc<JobTable>,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            config,
            registry,
            table,
            control,
        }
    }

    /// One drain, classification and failover pass.
    pub fn tick(&self) -> Result<Vec<Action>> {
        let names = self.registry.drain()?;
        let mut actions = Vec::new();
        if !names.is_empty() {
            tracing::debug!(count = names.len(), "drained job registry");
        }

        for name in names {
            match JobDescriptor::open(&self.config, &name) {
                Ok(job) => self.admit(Arc::new(job), &mut actions),
                // Without a mapping the client cannot be woken; it stays blocked.
                Err(err) => tracing::warn!(job = %name, error = %err, "cannot open submitted descriptor"),
            }
        }

        self.apply_failover(&mut actions);
        Ok(actions)
    }

    /// Files one descriptor into the table.
    pub fn admit(&self, job: Arc<JobDescriptor>, actions: &mut Vec<Action>) {
        if job.slot() >= self.config.slots {
            tracing::warn!(
                job = job.name(),
                slot = job.slot(),
                slots = self.config.slots,
                "descriptor outside the supervised slots, rejecting"
            );
            job.reject();
            actions.push(Action::Rejected {
                name: job.name().to_string(),
                slot: job.slot(),
            });
            return;
        }

        let key = SlotKey::of(&job);
        tracing::debug!(job = job.name(), %key, pid = job.pid(), "classified descriptor");
        let replaced = self.table.lock().classify(job);

        if let Some(old) = replaced {
            if old.reject() {
                tracing::info!(job = old.name(), %key, "superseded by a newer submission, rejected");
                actions.push(Action::Superseded {
                    key,
                    name: old.name().to_string(),
                });
            }
        }
    }

    /// Applies the failover policy to every configured slot.
    pub fn apply_failover(&self, actions: &mut Vec<Action>) {
        let mut sets = self.table.lock();

        for slot in 0..self.config.slots {
            let main_key = SlotKey::primary(slot);
            let replica_key = SlotKey::replica(slot);
            let main = sets.running(main_key).cloned();
            let replica = sets.running(replica_key).cloned();

            match (main, replica) {
                (None, None) => {}
                (Some(main), None) => {
                    if !main.is_executed() {
                        main.mark_executed();
                        main.trigger();
                        tracing::info!(slot, job = main.name(), "primary triggered");
                        actions.push(Action::Triggered {
                            slot,
                            name: main.name().to_string(),
                        });
                    }
                }
                (None, Some(replica)) => {
                    if !replica.is_executed() {
                        replica.mark_executed();
                        tracing::info!(slot, job = replica.name(), "failover recorded");
                        actions.push(Action::FailedOver {
                            slot,
                            replica: replica.name().to_string(),
                            primary_removed: false,
                        });
                    }
                }
                (Some(main), Some(replica)) if !replica.is_executed() => {
                    replica.mark_executed();
                    // A primary that never ran is a fresh submission: it
                    // recovers the slot on the next pass.
                    let primary_removed = main.is_executed();
                    if primary_removed {
                        sets.remove_running(main_key);
                    }
                    tracing::info!(
                        slot,
                        replica = replica.name(),
                        primary = main.name(),
                        primary_removed,
                        "failover recorded"
                    );
                    actions.push(Action::FailedOver {
                        slot,
                        replica: replica.name().to_string(),
                        primary_removed,
                    });
                }
                (Some(main), Some(replica)) => {
                    let killed_pid = replica.pid();
                    match self.control.terminate(killed_pid) {
                        Ok(()) => tracing::info!(slot, pid = killed_pid, job = replica.name(), "signalled superseded replica"),
                        Err(err) => tracing::warn!(slot, pid = killed_pid, error = %err, "could not signal superseded replica"),
                    }
                    sets.remove_running(replica_key);
                    main.mark_executed();
                    main.trigger();
                    tracing::info!(slot, job = main.name(), "primary recovered the slot");
                    actions.push(Action::Recovered {
                        slot,
                        primary: main.name().to_string(),
                        killed_pid,
                    });
                }
            }
        }
    }

    /// Ticks every `dispatch_interval` until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        tracing::info!(
            slots = self.config.slots,
            interval = ?self.config.dispatch_interval,
            "dispatcher started"
        );
        let mut pacer = Pacer::new(self.config.dispatch_interval);
        while !stop.load(Ordering::Acquire) {
            if let Err(err) = self.tick() {
                tracing::error!(error = %err, "dispatcher tick failed");
            }
            pacer.wait();
        }
        tracing::info!("dispatcher stopped");
    }
}
