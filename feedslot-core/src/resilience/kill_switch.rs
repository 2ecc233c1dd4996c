//! Kill Switch - Graceful Shutdown Coordination
//!
//! Every periodic task holds a clone and selects on `stopped()` next to its
//! interval tick. A task that is inside an iteration when the switch flips
//! finishes that iteration, then exits on its next select.
//!
//! ## Usage
//!
//! ```no_run
//! use feedslot_core::resilience::KillSwitch;
//!
//! # async fn example() {
//! let kill_switch = KillSwitch::new();
//! let task_switch = kill_switch.clone();
//!
//! tokio::spawn(async move {
//!     let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
//!     loop {
//!         tokio::select! {
//!             _ = interval.tick() => { /* one iteration */ }
//!             _ = task_switch.stopped() => break,
//!         }
//!     }
//! });
//!
//! kill_switch.shutdown("operator request");
//! # }
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::{error, info};

/// Kill switch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KillSwitchState {
    /// Normal operation
    Running = 0,
    /// Shutting down gracefully
    ShuttingDown = 1,
    /// Emergency stop (immediate)
    EmergencyStop = 2,
}

impl From<u8> for KillSwitchState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::ShuttingDown,
            2 => Self::EmergencyStop,
            _ => Self::Running,
        }
    }
}

/// Shutdown coordinator shared by every task
///
/// Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct KillSwitch {
    /// Current state
    state: Arc<AtomicU8>,
    /// Shutdown reason (if set)
    shutdown_reason: Arc<Mutex<Option<String>>>,
    /// Timestamp when shutdown initiated
    shutdown_time: Arc<Mutex<Option<SystemTime>>>,
    /// Wakes tasks parked in `stopped()`
    notify: Arc<watch::Sender<bool>>,
}

impl KillSwitch {
    /// Create a new kill switch in Running state
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: Arc::new(AtomicU8::new(KillSwitchState::Running as u8)),
            shutdown_reason: Arc::new(Mutex::new(None)),
            shutdown_time: Arc::new(Mutex::new(None)),
            notify: Arc::new(tx),
        }
    }

    /// Check if tasks should stop
    #[inline]
    pub fn should_stop(&self) -> bool {
        !matches!(self.state(), KillSwitchState::Running)
    }

    #[inline]
    pub fn state(&self) -> KillSwitchState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Initiate graceful shutdown
    ///
    /// The first call records its reason; later calls only log.
    pub fn shutdown(&self, reason: &str) {
        self.trip(KillSwitchState::ShuttingDown, reason);
    }

    /// Initiate emergency stop
    pub fn emergency_stop(&self, reason: &str) {
        error!("EMERGENCY STOP: {}", reason);
        self.trip(KillSwitchState::EmergencyStop, reason);
    }

    fn trip(&self, target: KillSwitchState, reason: &str) {
        let previous: KillSwitchState = self.state.swap(target as u8, Ordering::AcqRel).into();

        if previous == KillSwitchState::Running {
            info!("Kill switch activated: {}", reason);
            *self.shutdown_reason.lock() = Some(reason.to_string());
            *self.shutdown_time.lock() = Some(SystemTime::now());
        }

        self.notify.send_replace(true);
    }

    /// Resolve once shutdown has been requested
    ///
    /// Returns immediately if the switch already flipped.
    pub async fn stopped(&self) {
        let mut rx = self.notify.subscribe();
        // Sender lives as long as self, so wait_for only fails if it is dropped
        let _ = rx.wait_for(|stop| *stop).await;
    }

    pub fn shutdown_reason(&self) -> Option<String> {
        self.shutdown_reason.lock().clone()
    }

    pub fn shutdown_time(&self) -> Option<SystemTime> {
        *self.shutdown_time.lock()
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_initial_state_running() {
        let ks = KillSwitch::new();
        assert_eq!(ks.state(), KillSwitchState::Running);
        assert!(!ks.should_stop());
        assert!(ks.shutdown_reason().is_none());
    }

    #[test]
    fn test_shutdown_records_first_reason() {
        let ks = KillSwitch::new();
        ks.shutdown("first");
        ks.shutdown("second");

        assert!(ks.should_stop());
        assert_eq!(ks.shutdown_reason().as_deref(), Some("first"));
        assert!(ks.shutdown_time().is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let ks = KillSwitch::new();
        let clone = ks.clone();
        clone.emergency_stop("test");
        assert_eq!(ks.state(), KillSwitchState::EmergencyStop);
    }

    #[tokio::test]
    async fn test_stopped_resolves_after_shutdown() {
        let ks = KillSwitch::new();
        let waiter = ks.clone();

        let handle = tokio::spawn(async move {
            waiter.stopped().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        ks.shutdown("test");

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stopped() should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_resolves_if_already_tripped() {
        let ks = KillSwitch::new();
        ks.shutdown("early");
        tokio::time::timeout(Duration::from_millis(100), ks.stopped())
            .await
            .expect("stopped() should resolve immediately");
    }
}
