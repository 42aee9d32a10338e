//! Server assembly: one dispatcher thread plus one monitor per slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crate::config::FtConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{FtError, Result};
use crate::heartbeat::HeartbeatChannel;
use crate::job::JobDescriptor;
use crate::monitor::HeartbeatMonitor;
use crate::process::{ProcessControl, Signaller};
use crate::registry::JobRegistry;
use crate::table::{JobTable, TableSnapshot};

pub struct Server {
    config: FtConfig,
    control: Arc<dyn ProcessControl>,
}

impl Server {
    pub fn new(config: FtConfig) -> Result<Self> {
        config.validate()?;
        let control = Arc::new(Signaller::new(config.kill_signal));
        Ok(Self { config, control })
    }

    /// Replaces the `kill(2)`-based process control.
    pub fn with_process_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = control;
        self
    }

    pub fn config(&self) -> &FtConfig {
        &self.config
    }

    /// Attaches to the shared regions and starts every loop.
    pub fn launch(self) -> Result<ServerHandle> {
        let registry = Arc::new(JobRegistry::activate(&self.config)?);
        let channel = Arc::new(HeartbeatChannel::open(&self.config)?);
        let table = Arc::new(JobTable::new());
        let stop = Arc::new(AtomicBool::new(false));

        // Monitors claim their counters before any loop runs.
        let monitors = (0..self.config.slots)
            .map(|slot| {
                HeartbeatMonitor::new(slot, Arc::clone(&channel), Arc::clone(&table), &self.config)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut handle = ServerHandle {
            config: self.config.clone(),
            registry: Arc::clone(&registry),
            channel,
            table: Arc::clone(&table),
            stop,
            threads: Vec::with_capacity(self.config.slots + 1),
        };

        let dispatcher = Dispatcher::new(self.config.clone(), registry, table, self.control);
        handle.spawn("ft-dispatcher".to_string(), move |stop| dispatcher.run(stop))?;
        for mut monitor in monitors {
            let name = format!("ft-monitor-{}", monitor.slot());
            handle.spawn(name, move |stop| monitor.run(stop))?;
        }

        tracing::info!(
            namespace = %self.config.namespace,
            slots = self.config.slots,
            registry = ?handle.registry.region_name(),
            heartbeat = ?handle.channel.region_name(),
            "server running"
        );
        Ok(handle)
    }
}

/// A running server.
///
/// Dropping the handle stops the loops the same way [`ServerHandle::shutdown`]
/// does.
pub struct ServerHandle {
    config: FtConfig,
    registry: Arc<JobRegistry>,
    channel: Arc<HeartbeatChannel>,
    table: Arc<JobTable>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    fn spawn(
        &mut self,
        name: String,
        body: impl FnOnce(&AtomicBool) + Send + 'static,
    ) -> Result<()> {
        let stop = Arc::clone(&self.stop);
        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || body(&stop))
            .map_err(FtError::Spawn)?;
        self.threads.push(thread);
        Ok(())
    }

    pub fn config(&self) -> &FtConfig {
        &self.config
    }

    /// A copy of the running and sleeping sets.
    pub fn snapshot(&self) -> TableSnapshot {
        self.table.snapshot()
    }

    /// Current heartbeat counter of `slot`.
    pub fn heartbeat(&self, slot: usize) -> Result<u64> {
        self.channel.load(slot)
    }

    /// Submissions accepted by the registry so far.
    pub fn submitted_total(&self) -> Result<u64> {
        self.registry.submitted_total()
    }

    /// Blocks until every loop has exited.
    pub fn wait(mut self) {
        self.join();
    }

    /// Stops every loop and rejects every client still waiting.
    ///
    /// Returns the number of clients rejected.
    pub fn shutdown(mut self) -> usize {
        self.stop_and_reject()
    }

    fn join(&mut self) {
        for thread in self.threads.drain(..) {
            let name = thread.thread().name().unwrap_or("ft-server").to_string();
            if thread.join().is_err() {
                tracing::error!(thread = %name, "server thread panicked");
            }
        }
    }

    fn stop_and_reject(&mut self) -> usize {
        self.stop.store(true, Ordering::Release);
        self.join();

        let mut rejected = 0;
        for job in self.table.lock().drain_unwoken() {
            if job.reject() {
                rejected += 1;
            }
        }

        // Submissions that arrived after the last drain.
        match self.registry.drain() {
            Ok(names) => {
                for name in names {
                    match JobDescriptor::open(&self.config, &name) {
                        Ok(job) => {
                            if job.reject() {
                                rejected += 1;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(job = %name, error = %err, "cannot reject pending descriptor")
                        }
                    }
                }
            }
            Err(err) => tracing::error!(error = %err, "cannot drain registry during shutdown"),
        }

        tracing::info!(rejected, "server stopped");
        rejected
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop_and_reject();
        }
    }
}
