//! # FT Coordinator
//!
//! A primary/replica fault-tolerance coordinator built on POSIX shared
//! memory.
//!
//! Every logical unit of work (a *slot*) has a primary job and a replica
//! job, each running in its own process. Before doing any work a job
//! performs an admission handshake with the coordinator server:
//!
//! 1. it creates a shared *job descriptor* named `"{role}_{tid}"`,
//! 2. submits that name to the shared *job registry*,
//! 3. and blocks until the server wakes it with a run/abort decision.
//!
//! Admitted jobs emit a heartbeat on their slot. The server runs one
//! dispatcher thread, which drains the registry and applies the failover
//! policy, and one heartbeat monitor per slot. When a primary's heartbeat
//! stops moving, the slot's sleeping replica is woken and takes over. When a
//! restarted primary shows up while the replica runs, the replica is
//! signalled and the primary gets the slot back.
//!
//! ## Polling
//!
//! All loops poll on fixed cadences ([`FtConfig`]): the dispatcher every
//! 50µs, monitors and emitters every millisecond. A waiting client spins
//! briefly and then sleeps between checks of its wake signal. Nothing here
//! parks on a kernel primitive except the registry's process-shared mutex.
//!
//! ## Shared memory
//!
//! Three kinds of region exist per namespace: the heartbeat channel
//! (`/{ns}_data`), the job registry (`/{ns}_jobs`) and one descriptor per
//! job attempt (`/{ns}_{role}_{tid}`). Each is a `#[repr(C)]` record with a
//! header carrying a magic, a layout version and the record size; openers
//! refuse regions written by an incompatible build.
//!
//! ## Modules
//!
//! - [`client`]: the handshake ([`FtClient`], [`begin`]).
//! - [`server`]: dispatcher and monitor threads ([`Server`]).
//! - [`dispatcher`], [`monitor`]: the two server loops.
//! - [`heartbeat`], [`registry`], [`job`]: the shared regions.
//!
//! ## License
//!
//! Licensed under the terms of the **GNU Lesser General Public License**,
//! version 3.0, or (at your option) any later version.
//!
//! See <https://www.gnu.org/licenses/lgpl-3.0.html> for details.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod job;
pub mod layout;
pub mod mmap;
pub mod monitor;
pub mod process;
pub mod registry;
pub mod server;
mod sync;
pub mod table;
mod utils;

pub use client::{Admission, FtClient, begin};
pub use config::FtConfig;
pub use dispatcher::{Action, Dispatcher};
pub use error::{FtError, Result};
pub use heartbeat::{HeartbeatChannel, HeartbeatEmitter};
pub use job::{JobDescriptor, Role};
pub use layout::{MAX_NAME_LEN, MAX_PENDING, MAX_SLOTS};
pub use mmap::{Attach, unlink_shared_memory};
pub use monitor::{HeartbeatMonitor, Staleness};
pub use process::{ProcessControl, Signaller, current_pid, current_tid};
pub use registry::JobRegistry;
pub use server::{Server, ServerHandle};
pub use table::{JobEntry, SlotKey, TableSnapshot};
pub use utils::mono_time_ns;
