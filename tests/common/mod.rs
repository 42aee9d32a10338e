#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ft_coordinator::{Admission, FtClient, FtConfig, ProcessControl, Result, unlink_shared_memory};

/// A namespace private to one test; its fixed regions are removed on drop.
pub struct Namespace {
    config: FtConfig,
}

impl Namespace {
    pub fn new(tag: &str) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        let mut config = FtConfig::new(format!("ft{tag}{}x{id}", std::process::id()))
            .with_slots(2)
            .with_dispatch_interval(Duration::from_micros(50))
            .with_monitor_interval(Duration::from_millis(1))
            .with_stale_threshold(20)
            .with_emitter_interval(Duration::from_micros(100));
        config.wake_poll_interval = Duration::from_micros(50);

        let ns = Self { config };
        ns.cleanup();
        ns
    }

    pub fn config(&self) -> FtConfig {
        self.config.clone()
    }

    fn cleanup(&self) {
        let _ = unlink_shared_memory(&self.config.registry_region());
        let _ = unlink_shared_memory(&self.config.heartbeat_region());
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Records termination requests instead of sending signals.
#[derive(Default)]
pub struct RecordingControl {
    killed: Mutex<Vec<i32>>,
}

impl RecordingControl {
    pub fn killed(&self) -> Vec<i32> {
        self.killed.lock().unwrap().clone()
    }
}

impl ProcessControl for RecordingControl {
    fn terminate(&self, pid: i32) -> Result<()> {
        self.killed.lock().unwrap().push(pid);
        Ok(())
    }
}

/// Runs a blocking handshake on its own thread.
pub fn spawn_request(
    client: &Arc<FtClient>,
    pid: i32,
    tid: i32,
    label: &'static str,
    slot: usize,
) -> JoinHandle<Result<Admission>> {
    let client = Arc::clone(client);
    std::thread::spawn(move || client.request(pid, tid, label, slot))
}

/// Polls `cond` until it holds or `timeout` expires.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    cond()
}

pub const PATIENCE: Duration = Duration::from_secs(5);
