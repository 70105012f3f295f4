//! Reconciliation loop - recovers offline launches and resubmits on change.
//!
//! Each iteration:
//! 1. Polls: continue while a launch is incomplete, work is active, or in daemon mode
//! 2. Recovers every outstanding launch in ascending launch id order
//! 3. Sleeps one poll interval, then re-reads the outstanding set
//! 4. Resubmits ready work only if the outstanding set changed

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::tick::{ControlLoopState, LoopStats, TickConfig};
use crate::domain::OutstandingSet;
use crate::error::AthenaError;
use crate::queue::{LauncherArgs, QueueSubmitter};
use crate::recovery::Recoverer;
use crate::store::JobStore;

/// Loop phase, used to label fatal errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Poll,
    Reconcile,
    Evaluate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Start => "start",
            Phase::Poll => "poll",
            Phase::Reconcile => "reconcile",
            Phase::Evaluate => "evaluate",
        };
        f.write_str(name)
    }
}

/// A fatal error, tagged with the phase it happened in
#[derive(Debug, Error)]
#[error("{phase} phase failed: {source}")]
pub struct ReconcileError {
    pub phase: Phase,
    #[source]
    pub source: AthenaError,
}

impl ReconcileError {
    fn at(phase: Phase) -> impl FnOnce(AthenaError) -> Self {
        move |source| Self { phase, source }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// No outstanding launches, no active work, not a daemon
    Idle,
    /// Interrupted through the cancellation token
    Cancelled,
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: LoopOutcome,
    pub stats: LoopStats,
    /// Last outstanding set observed before exit
    pub outstanding: OutstandingSet,
}

/// Drives recovery and resubmission of offline launches.
pub struct ReconcileLoop {
    store: Arc<dyn JobStore>,
    recoverer: Arc<dyn Recoverer>,
    submitter: Arc<dyn QueueSubmitter>,
    args: LauncherArgs,
    config: TickConfig,
    cancel: CancellationToken,
}

impl ReconcileLoop {
    /// Create a loop over the given collaborators with default settings.
    pub fn new(
        store: Arc<dyn JobStore>,
        recoverer: Arc<dyn Recoverer>,
        submitter: Arc<dyn QueueSubmitter>,
        args: LauncherArgs,
    ) -> Self {
        Self {
            store,
            recoverer,
            submitter,
            args,
            config: TickConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Use custom tick settings.
    pub fn with_config(mut self, config: TickConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe an externally owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn finish(
        &self,
        outcome: LoopOutcome,
        state: ControlLoopState,
        stats: LoopStats,
    ) -> RunSummary {
        match outcome {
            LoopOutcome::Idle => info!("No jobs to run after {} polls", stats.polls),
            LoopOutcome::Cancelled => warn!("Reconciliation cancelled after {} polls", stats.polls),
        }
        RunSummary {
            outcome,
            stats,
            outstanding: state.outstanding,
        }
    }

    async fn submit(&self, phase: Phase, stats: &mut LoopStats) -> Result<(), ReconcileError> {
        let batch = self
            .submitter
            .submit_ready_work(&self.args)
            .await
            .map_err(ReconcileError::at(phase))?;
        stats.submitted(batch.len());
        if !batch.is_empty() {
            info!("Submitted {} launches: {:?}", batch.len(), batch.launch_ids());
        }
        Ok(())
    }

    async fn outstanding(&self) -> Result<OutstandingSet, ReconcileError> {
        let records = self
            .store
            .find_all_incomplete()
            .await
            .map_err(ReconcileError::at(Phase::Reconcile))?;
        Ok(OutstandingSet::from_records(&records))
    }

    /// Poll predicate; `has_active_run` is only asked when no launch is incomplete.
    async fn should_continue(&self) -> Result<bool, ReconcileError> {
        let first = self
            .store
            .find_first_incomplete()
            .await
            .map_err(ReconcileError::at(Phase::Poll))?;
        if first.is_some() {
            return Ok(true);
        }
        if self.cancel.is_cancelled() {
            return Ok(true);
        }
        let active = self
            .store
            .has_active_run()
            .await
            .map_err(ReconcileError::at(Phase::Poll))?;
        Ok(active || self.config.daemon_mode)
    }

    /// Run until no work is left (never, in daemon mode) or until cancelled.
    pub async fn run(&self) -> Result<RunSummary, ReconcileError> {
        let mut state = ControlLoopState::new();
        let mut stats = LoopStats::new();
        let mut outcome = LoopOutcome::Cancelled;

        if self.cancel.is_cancelled() {
            state.stop();
        } else {
            self.submit(Phase::Start, &mut stats).await?;
        }

        while state.running {
            if let Some(done) = self.step(&mut state, &mut stats).await? {
                outcome = done;
                state.stop();
            }
        }
        Ok(self.finish(outcome, state, stats))
    }

    /// One Poll, Reconcile and Evaluate round. Returns the outcome once the loop
    /// has to stop.
    async fn step(
        &self,
        state: &mut ControlLoopState,
        stats: &mut LoopStats,
    ) -> Result<Option<LoopOutcome>, ReconcileError> {
        if self.cancel.is_cancelled() {
            return Ok(Some(LoopOutcome::Cancelled));
        }

        // Poll
        stats.poll();
        if !self.should_continue().await? {
            return Ok(Some(LoopOutcome::Idle));
        }

        // Reconcile
        if self.cancel.is_cancelled() {
            return Ok(Some(LoopOutcome::Cancelled));
        }
        let current = self.outstanding().await?;
        debug!("Outstanding launches: {}", current);
        state.replace(current.clone());

        for launch_id in current.iter() {
            if self.cancel.is_cancelled() {
                return Ok(Some(LoopOutcome::Cancelled));
            }
            match self.recoverer.recover(launch_id).await {
                Ok(()) => stats.recovery(true),
                Err(e) => {
                    warn!("Skipping launch {}: {}", launch_id, e);
                    stats.recovery(false);
                }
            }
        }

        // Slow down the hits to the store
        tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Some(LoopOutcome::Cancelled)),
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }

        let remaining = self.outstanding().await?;
        stats.pass();

        // Evaluate
        let changed = current != remaining;
        state.replace(remaining);
        if changed {
            if self.cancel.is_cancelled() {
                return Ok(Some(LoopOutcome::Cancelled));
            }
            debug!("Outstanding set changed {} -> {}", current, state.outstanding);
            self.submit(Phase::Evaluate, stats).await?;
        }
        Ok(None)
    }
}
