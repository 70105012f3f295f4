//! Tick settings and per-run bookkeeping for the reconciliation loop.

use std::time::Duration;

use crate::config::ReconcileConfig;
use crate::domain::OutstandingSet;

/// Configuration for the reconciliation loop
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Delay between recovering a pass and re-reading the outstanding set
    pub poll_interval: Duration,
    /// Keep polling even when there is no work left
    pub daemon_mode: bool,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            daemon_mode: false,
        }
    }
}

impl TickConfig {
    /// Create a new tick config
    pub fn new(poll_interval: Duration, daemon_mode: bool) -> Self {
        Self {
            poll_interval,
            daemon_mode,
        }
    }

    /// Set daemon mode
    pub fn with_daemon_mode(mut self, daemon_mode: bool) -> Self {
        self.daemon_mode = daemon_mode;
        self
    }
}

impl From<&ReconcileConfig> for TickConfig {
    fn from(config: &ReconcileConfig) -> Self {
        Self::new(Duration::from_millis(config.poll_interval_ms), config.daemon_mode)
    }
}

/// Process-wide loop state: the latest outstanding snapshot and the run flag
#[derive(Debug, Clone)]
pub struct ControlLoopState {
    pub outstanding: OutstandingSet,
    pub running: bool,
}

impl ControlLoopState {
    /// Create the state at loop start
    pub fn new() -> Self {
        Self {
            outstanding: OutstandingSet::default(),
            running: true,
        }
    }

    /// Replace the snapshot with a newer one
    pub fn replace(&mut self, outstanding: OutstandingSet) {
        self.outstanding = outstanding;
    }

    /// Mark the loop as finished
    pub fn stop(&mut self) {
        self.running = false;
    }
}

impl Default for ControlLoopState {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters accumulated over one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Number of Poll phases entered
    pub polls: u64,
    /// Number of completed reconciliation passes
    pub passes: u64,
    /// Successful recover calls
    pub recovered: u64,
    /// Recover calls that failed and were skipped
    pub recovery_failures: u64,
    /// Calls to submit ready work
    pub submissions: u64,
    /// Launches created by those calls
    pub launches_submitted: u64,
}

impl LoopStats {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a poll
    pub fn poll(&mut self) {
        self.polls += 1;
    }

    /// Record one recover call
    pub fn recovery(&mut self, ok: bool) {
        if ok {
            self.recovered += 1;
        } else {
            self.recovery_failures += 1;
        }
    }

    /// Record a submission and how many launches it created
    pub fn submitted(&mut self, launches: usize) {
        self.submissions += 1;
        self.launches_submitted += launches as u64;
    }

    /// Record a finished pass
    pub fn pass(&mut self) {
        self.passes += 1;
    }
}
