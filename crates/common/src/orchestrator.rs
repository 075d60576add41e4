//! Fixture orchestrator: lock, truncate, reseed, release, settle
//!
//! Run before every test. When `reset` returns `Ok`, the target table holds
//! exactly the snapshot's records and the settle delay has elapsed. The settle
//! delay is part of that contract: the store exposes no completion signal
//! beyond the commit itself.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::lock::{FixtureLock, DEFAULT_LOCK_TIMEOUT};
use crate::snapshot::FixtureSnapshot;
use crate::store::FixtureStore;
use crate::{Error, Result};

/// Pause after releasing the lock so the application under test observes
/// the new seed before the test body starts
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// What to do when the lock cannot be obtained in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Log and reset without the lock
    #[default]
    BestEffort,
    /// Fail the reset with `LockTimeout`
    Abort,
}

/// Outcome of one reset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetReport {
    pub table: String,
    pub deleted: usize,
    pub inserted: usize,
    /// Whether the reset ran under the lock
    pub lock_held: bool,
    pub duration_ms: u64,
}

/// Resets a shared store to a snapshot under the fixture lock
pub struct FixtureOrchestrator<S: FixtureStore> {
    store: S,
    lock: FixtureLock,
    snapshot: FixtureSnapshot,
    lock_timeout: Duration,
    lock_policy: LockPolicy,
    settle_delay: Duration,
}

impl<S: FixtureStore> FixtureOrchestrator<S> {
    pub fn new(store: S, lock: FixtureLock) -> Self {
        Self {
            store,
            lock,
            snapshot: FixtureSnapshot::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_policy: LockPolicy::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Snapshot used by [`reset`](Self::reset)
    pub fn with_snapshot(mut self, snapshot: FixtureSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn lock(&self) -> &FixtureLock {
        &self.lock
    }

    pub fn snapshot(&self) -> &FixtureSnapshot {
        &self.snapshot
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Reset to the default snapshot
    pub fn reset(&self) -> Result<ResetReport> {
        self.reset_to(&self.snapshot)
    }

    /// Reset the snapshot's table so it holds exactly the snapshot's records
    pub fn reset_to(&self, snapshot: &FixtureSnapshot) -> Result<ResetReport> {
        let start = Instant::now();

        let guard = match self.lock.acquire(self.lock_timeout) {
            Ok(guard) => Some(guard),
            Err(e @ Error::LockTimeout { .. }) => match self.lock_policy {
                LockPolicy::BestEffort => {
                    warn!("{}; resetting {} without the lock", e, snapshot.table);
                    None
                }
                LockPolicy::Abort => return Err(e),
            },
            Err(e) => return Err(e),
        };
        let lock_held = guard.is_some();

        let outcome = self.replace_contents(snapshot);

        if let Some(guard) = guard {
            if let Err(e) = guard.release() {
                warn!("Failed to release fixture lock after reset: {}", e);
            }
        }

        let (deleted, inserted) = outcome?;

        std::thread::sleep(self.settle_delay);

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Reset {}: {} deleted, {} inserted ({} ms)",
            snapshot.table, deleted, inserted, duration_ms
        );

        Ok(ResetReport {
            table: snapshot.table.clone(),
            deleted,
            inserted,
            lock_held,
            duration_ms,
        })
    }

    fn replace_contents(&self, snapshot: &FixtureSnapshot) -> Result<(usize, usize)> {
        let table = snapshot.table.as_str();
        self.store.begin().map_err(|e| Error::reset(table, e))?;

        match self.delete_and_seed(snapshot) {
            Ok(counts) => Ok(counts),
            Err(e) => {
                if let Err(rollback) = self.store.rollback() {
                    warn!("Rollback of {} failed: {}", table, rollback);
                }
                Err(Error::reset(table, e))
            }
        }
    }

    fn delete_and_seed(&self, snapshot: &FixtureSnapshot) -> Result<(usize, usize)> {
        let deleted = self.store.delete_all(&snapshot.table)?;
        let inserted = self.store.insert_many(&snapshot.table, &snapshot.records)?;
        self.store.commit()?;
        Ok((deleted, inserted))
    }
}
