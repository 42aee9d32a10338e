use std::time::Duration;

use crate::error::{FtError, Result};
use crate::layout::{MAX_NAME_LEN, MAX_SLOTS};

/// Tunables shared by the server loops and the client handshake.
///
/// Every process attaching to the same regions must use the same
/// `namespace`; the timing fields are local to each process.
#[derive(Debug, Clone)]
pub struct FtConfig {
    /// Prefix of every shared-memory object name, e.g. `"ft"` gives
    /// `/ft_data`, `/ft_jobs` and `/ft_main_4242`.
    pub namespace: String,
    /// Number of slots the server supervises, `1..=MAX_SLOTS`.
    pub slots: usize,
    /// Pause between dispatcher ticks.
    pub dispatch_interval: Duration,
    /// Pause between heartbeat monitor ticks.
    pub monitor_interval: Duration,
    /// Consecutive unchanged monitor ticks after which a primary is dead.
    pub stale_threshold: u32,
    /// Pause between heartbeat emitter increments.
    pub emitter_interval: Duration,
    /// The emitter resets its counter to zero once it exceeds this bound.
    pub heartbeat_wrap: u64,
    /// Sleep between polls once a waiting client stops spinning.
    pub wake_poll_interval: Duration,
    /// How long an opener waits for a region's creator to publish its header.
    pub attach_timeout: Duration,
    /// Signal sent to a running replica superseded by a recovered primary.
    pub kill_signal: libc::c_int,
}

impl Default for FtConfig {
    fn default() -> Self {
        Self {
            namespace: "ft".to_string(),
            slots: MAX_SLOTS,
            dispatch_interval: Duration::from_micros(50),
            monitor_interval: Duration::from_millis(1),
            stale_threshold: 50,
            emitter_interval: Duration::from_millis(1),
            heartbeat_wrap: 100,
            wake_poll_interval: Duration::from_micros(200),
            attach_timeout: Duration::from_secs(1),
            kill_signal: libc::SIGINT,
        }
    }
}

impl FtConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.slots = slots;
        self
    }

    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_stale_threshold(mut self, ticks: u32) -> Self {
        self.stale_threshold = ticks;
        self
    }

    pub fn with_emitter_interval(mut self, interval: Duration) -> Self {
        self.emitter_interval = interval;
        self
    }

    pub fn with_kill_signal(mut self, signal: libc::c_int) -> Self {
        self.kill_signal = signal;
        self
    }

    /// Name of the heartbeat channel region.
    pub fn heartbeat_region(&self) -> String {
        format!("/{}_data", self.namespace)
    }

    /// Name of the job registry region.
    pub fn registry_region(&self) -> String {
        format!("/{}_jobs", self.namespace)
    }

    /// Name of the region backing the descriptor called `job_name`.
    pub fn job_region(&self, job_name: &str) -> String {
        format!("/{}_{}", self.namespace, job_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() || self.namespace.contains('/') {
            return Err(FtError::Config(format!(
                "namespace {:?} must be non-empty and contain no '/'",
                self.namespace
            )));
        }
        // Region names carry the namespace plus a descriptor name.
        if self.namespace.len() + MAX_NAME_LEN + 2 > 255 {
            return Err(FtError::Config(format!(
                "namespace {:?} is too long",
                self.namespace
            )));
        }
        if self.slots == 0 || self.slots > MAX_SLOTS {
            return Err(FtError::Config(format!(
                "slots must be within 1..={MAX_SLOTS}, got {}",
                self.slots
            )));
        }
        if self.stale_threshold == 0 {
            return Err(FtError::Config("stale_threshold must be positive".into()));
        }
        if self.heartbeat_wrap == 0 {
            return Err(FtError::Config("heartbeat_wrap must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = FtConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slots, MAX_SLOTS);
        assert_eq!(config.stale_threshold, 50);
        assert_eq!(config.heartbeat_wrap, 100);
        assert_eq!(config.dispatch_interval, Duration::from_micros(50));
        assert_eq!(config.monitor_interval, Duration::from_millis(1));
    }

    #[test]
    fn region_names_share_the_namespace() {
        let config = FtConfig::new("unit");
        assert_eq!(config.heartbeat_region(), "/unit_data");
        assert_eq!(config.registry_region(), "/unit_jobs");
        assert_eq!(config.job_region("main_77"), "/unit_main_77");
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(FtConfig::new("").validate().is_err());
        assert!(FtConfig::new("a/b").validate().is_err());
        assert!(FtConfig::new("ok").with_slots(0).validate().is_err());
        assert!(
            FtConfig::new("ok")
                .with_slots(MAX_SLOTS + 1)
                .validate()
                .is_err()
        );
        assert!(
            FtConfig::new("ok")
                .with_stale_threshold(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn builders_override_defaults() {
        let config = FtConfig::new("b")
            .with_slots(4)
            .with_stale_threshold(5)
            .with_monitor_interval(Duration::from_micros(300))
            .with_kill_signal(libc::SIGTERM);
        assert_eq!(config.slots, 4);
        assert_eq!(config.stale_threshold, 5);
        assert_eq!(config.monitor_interval, Duration::from_micros(300));
        assert_eq!(config.kill_signal, libc::SIGTERM);
        assert_eq!(config.namespace, "b");
    }
}
