//! Repeating flush timer
//!
//! `Idle -> Armed -> Running -> Armed -> ... -> Cancelled`. The state lives
//! in a watch channel so the loop notices cancellation while it waits. A
//! flush is never raced against cancellation: once `Running`, it finishes.

use super::FlushTarget;
use crate::config::{parse_duration_or_default, DEFAULT_SYNC_FREQUENCY};
use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    /// Waiting for the next tick
    Armed,
    /// A flush is in progress
    Running,
    Cancelled,
}

/// Cancellable repeating timer that flushes on every tick
pub struct SyncScheduler {
    target: Arc<dyn FlushTarget>,
    state: Arc<watch::Sender<SchedulerState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(target: Arc<dyn FlushTarget>) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            target,
            state: Arc::new(state),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Flush once, then flush every `frequency` until cancelled
    ///
    /// An unparsable frequency falls back to five minutes. The first flush
    /// completes before this returns. Returns the frequency in effect.
    pub async fn start(&self, frequency: &str) -> Result<Duration> {
        if !transition(&self.state, SchedulerState::Idle, SchedulerState::Running) {
            bail!("scheduler cannot start from state {:?}", self.state());
        }

        let frequency =
            parse_duration_or_default(frequency, DEFAULT_SYNC_FREQUENCY, "sync_frequency");
        info!(frequency_secs = frequency.as_secs_f64(), "Starting sync scheduler");

        if let Err(e) = self.target.flush().await {
            debug!(error = %e, "Initial flush failed");
        }

        if !transition(&self.state, SchedulerState::Running, SchedulerState::Armed) {
            info!("Sync scheduler cancelled during initial flush");
            return Ok(frequency);
        }

        let task = tokio::spawn(run(
            Arc::clone(&self.target),
            Arc::clone(&self.state),
            frequency,
        ));
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(task);
        }

        Ok(frequency)
    }

    /// Stop scheduling; a flush already running is left to finish
    pub fn cancel(&self) {
        let previous = self.state.send_replace(SchedulerState::Cancelled);
        if previous != SchedulerState::Cancelled {
            info!(previous = ?previous, "Sync scheduler cancelled");
        }
    }

    /// Cancel and wait for the loop, including any in-flight flush, to end
    pub async fn cancel_and_wait(&self) {
        self.cancel();
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.state.send_replace(SchedulerState::Cancelled);
    }
}

async fn run(
    target: Arc<dyn FlushTarget>,
    state: Arc<watch::Sender<SchedulerState>>,
    frequency: Duration,
) {
    let mut rx = state.subscribe();

    loop {
        // The wait starts after the previous flush, so slow flushes delay
        // the next tick instead of stacking up
        tokio::select! {
            _ = tokio::time::sleep(frequency) => {}
            _ = cancelled(&mut rx) => break,
        }

        if !transition(&state, SchedulerState::Armed, SchedulerState::Running) {
            break;
        }

        if let Err(e) = target.flush().await {
            debug!(error = %e, "Scheduled flush failed");
        }

        if !transition(&state, SchedulerState::Running, SchedulerState::Armed) {
            break;
        }
    }

    debug!("Sync scheduler loop stopped");
}

async fn cancelled(rx: &mut watch::Receiver<SchedulerState>) {
    // An error means the sender is gone, which also ends the loop
    let _ = rx.wait_for(|s| *s == SchedulerState::Cancelled).await;
}

/// Move from `from` to `to`; false if the state was something else
fn transition(
    state: &watch::Sender<SchedulerState>,
    from: SchedulerState,
    to: SchedulerState,
) -> bool {
    state.send_if_modified(|current| {
        if *current == from {
            *current = to;
            true
        } else {
            false
        }
    })
}
