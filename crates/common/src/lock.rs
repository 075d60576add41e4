//! Fixture lock guarding the shared store during reset
//!
//! The lock token is a binary flag: `absent` means the store is free,
//! `present` means some holder is resetting it. Backends implement
//! [`MutualExclusion`]; [`FileLock`] makes the token visible to every process
//! on the host, [`LocalLock`] keeps it in memory for single-process runners.
//!
//! Each acquisition stamps the token with a fresh [`HolderId`]. A token older
//! than the configured stale bound is swept by waiting acquirers, so a runner
//! that crashed mid-reset cannot wedge the suite. Release only clears a token
//! that still names the releasing holder.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Error, Result};

/// Interval between re-checks while the token is present
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default bound on lock acquisition
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Tokens older than this are considered abandoned
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

/// Identity of one lock acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(Uuid);

impl HolderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HolderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contents of a present lock token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub holder: HolderId,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl TokenRecord {
    fn for_holder(holder: HolderId) -> Self {
        Self {
            holder,
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// Snapshot of a present token, for diagnostics
#[derive(Debug, Clone)]
pub struct TokenInfo {
    /// `None` when the token exists but carries no readable record
    pub record: Option<TokenRecord>,

    /// Time since the token was written
    pub age: Duration,
}

/// A mutual-exclusion capability over a single token
pub trait MutualExclusion: Send + Sync {
    /// Attempt the `absent -> present` transition. Returns `false` if the
    /// token is already present.
    fn try_acquire(&self, holder: HolderId) -> Result<bool>;

    /// Clear the token if it is held by `holder`.
    fn release(&self, holder: HolderId) -> Result<()>;

    /// Clear the token if it is older than `max_age`. Returns whether a
    /// token was removed.
    fn sweep_stale(&self, max_age: Duration) -> Result<bool>;

    /// Describe the present token, if any.
    fn inspect(&self) -> Result<Option<TokenInfo>>;

    /// Remove the token unconditionally. Returns whether one existed.
    fn clear(&self) -> Result<bool>;

    /// Human-readable name of the guarded resource
    fn describe(&self) -> String;
}

// ============================================================================
// File-backed token
// ============================================================================

#[derive(PartialEq)]
enum TokenState {
    Absent,
    Held(TokenRecord),
    Unreadable,
}

/// Lock token stored as a file created with exclusive-create semantics
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_token(&self) -> Result<TokenState> {
        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<TokenRecord>(&content) {
                Ok(record) => Ok(TokenState::Held(record)),
                Err(_) => Ok(TokenState::Unreadable),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(TokenState::Absent),
            Err(e) => Err(e.into()),
        }
    }

    fn age(&self) -> Result<Option<Duration>> {
        match fs::metadata(&self.path) {
            Ok(meta) => {
                let modified = meta.modified()?;
                Ok(Some(
                    SystemTime::now()
                        .duration_since(modified)
                        .unwrap_or_default(),
                ))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn sidecar(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".stale-{}", Uuid::new_v4()));
        self.path.with_file_name(name)
    }

    /// Age and contents of the token when it is older than `max_age`
    fn observe_stale(&self, max_age: Duration) -> Result<Option<(Duration, TokenState)>> {
        match self.age()? {
            Some(age) if age > max_age => match self.read_token()? {
                TokenState::Absent => Ok(None),
                state => Ok(Some((age, state))),
            },
            _ => Ok(None),
        }
    }

    /// Remove the token only if it is still the one judged stale.
    ///
    /// The token is first renamed to a private sidecar so no other sweeper
    /// can act on it. A token that turns out to be fresh, or to name another
    /// holder, is linked back into place.
    fn remove_observed(&self, observed: &TokenState, max_age: Duration) -> Result<bool> {
        let sidecar = self.sidecar();
        match fs::rename(&self.path, &sidecar) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let aside = FileLock::new(&sidecar);
        let unchanged = match (aside.age(), aside.read_token()) {
            (Ok(Some(age)), Ok(state)) => age > max_age && state == *observed,
            _ => false,
        };
        if unchanged {
            aside.remove()?;
            return Ok(true);
        }

        match fs::hard_link(&sidecar, &self.path) {
            Ok(()) => debug!("Lock token {} was retaken; restored it", self.path.display()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => warn!(
                "Lock token {} was retaken twice during a sweep; dropping the displaced token",
                self.path.display()
            ),
            Err(e) => {
                let _ = aside.remove();
                return Err(e.into());
            }
        }
        aside.remove()?;
        Ok(false)
    }
}

fn write_record(file: &mut File, record: &TokenRecord) -> Result<()> {
    serde_json::to_writer(&mut *file, record)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

impl MutualExclusion for FileLock {
    fn try_acquire(&self, holder: HolderId) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = write_record(&mut file, &TokenRecord::for_holder(holder)) {
            // Leave no half-written token behind
            let _ = self.remove();
            return Err(e);
        }

        Ok(true)
    }

    fn release(&self, holder: HolderId) -> Result<()> {
        match self.read_token()? {
            TokenState::Absent => {
                debug!("Lock token {} already absent at release", self.path.display());
            }
            TokenState::Held(record) if record.holder == holder => {
                self.remove()?;
            }
            TokenState::Held(record) => {
                warn!(
                    "Lock token {} now belongs to {} (pid {}); leaving it in place",
                    self.path.display(),
                    record.holder,
                    record.pid
                );
            }
            TokenState::Unreadable => {
                warn!(
                    "Lock token {} has no readable holder; leaving it in place",
                    self.path.display()
                );
            }
        }
        Ok(())
    }

    fn sweep_stale(&self, max_age: Duration) -> Result<bool> {
        let Some((age, observed)) = self.observe_stale(max_age)? else {
            return Ok(false);
        };
        warn!(
            "Sweeping stale lock token {} (age {:?} > {:?})",
            self.path.display(),
            age,
            max_age
        );
        self.remove_observed(&observed, max_age)
    }

    fn inspect(&self) -> Result<Option<TokenInfo>> {
        let Some(age) = self.age()? else {
            return Ok(None);
        };
        let record = match self.read_token()? {
            TokenState::Absent => return Ok(None),
            TokenState::Held(record) => Some(record),
            TokenState::Unreadable => None,
        };
        Ok(Some(TokenInfo { record, age }))
    }

    fn clear(&self) -> Result<bool> {
        self.remove()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// In-process token
// ============================================================================

struct LocalHold {
    record: TokenRecord,
    since: Instant,
}

/// Lock token held in memory, shared by cloning the owning [`FixtureLock`]
#[derive(Default)]
pub struct LocalLock {
    state: Mutex<Option<LocalHold>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MutualExclusion for LocalLock {
    fn try_acquire(&self, holder: HolderId) -> Result<bool> {
        let mut state = self.state.lock();
        if state.is_some() {
            return Ok(false);
        }
        *state = Some(LocalHold {
            record: TokenRecord::for_holder(holder),
            since: Instant::now(),
        });
        Ok(true)
    }

    fn release(&self, holder: HolderId) -> Result<()> {
        let mut state = self.state.lock();
        match state.as_ref() {
            Some(hold) if hold.record.holder == holder => *state = None,
            Some(hold) => warn!(
                "In-process lock now belongs to {}; leaving it in place",
                hold.record.holder
            ),
            None => debug!("In-process lock already absent at release"),
        }
        Ok(())
    }

    fn sweep_stale(&self, max_age: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        match state.as_ref() {
            Some(hold) if hold.since.elapsed() > max_age => {
                warn!(
                    "Sweeping stale in-process lock held by {}",
                    hold.record.holder
                );
                *state = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn inspect(&self) -> Result<Option<TokenInfo>> {
        Ok(self.state.lock().as_ref().map(|hold| TokenInfo {
            record: Some(hold.record.clone()),
            age: hold.since.elapsed(),
        }))
    }

    fn clear(&self) -> Result<bool> {
        Ok(self.state.lock().take().is_some())
    }

    fn describe(&self) -> String {
        "in-process fixture lock".to_string()
    }
}

// ============================================================================
// Acquisition protocol
// ============================================================================

/// Bounded, polling acquisition over a [`MutualExclusion`] backend
#[derive(Clone)]
pub struct FixtureLock {
    backend: Arc<dyn MutualExclusion>,
    poll_interval: Duration,
    stale_after: Option<Duration>,
}

impl FixtureLock {
    pub fn new(backend: Arc<dyn MutualExclusion>) -> Self {
        Self {
            backend,
            poll_interval: LOCK_POLL_INTERVAL,
            stale_after: Some(DEFAULT_STALE_AFTER),
        }
    }

    /// Lock backed by a token file at `path`
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileLock::new(path)))
    }

    /// Lock shared only by clones within this process
    pub fn local() -> Self {
        Self::new(Arc::new(LocalLock::new()))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the age after which a present token is swept. `None` disables
    /// sweeping and leaves abandoned tokens for manual cleanup.
    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// Acquire the token, polling until it is free or `timeout` elapses.
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard> {
        let holder = HolderId::new();
        let start = Instant::now();
        let deadline = start + timeout;

        loop {
            if self.backend.try_acquire(holder)? {
                info!(
                    "Acquired fixture lock {} as {} after {:?}",
                    self.backend.describe(),
                    holder,
                    start.elapsed()
                );
                return Ok(LockGuard {
                    backend: self.backend.clone(),
                    holder,
                    acquired: Instant::now(),
                    released: false,
                });
            }

            if let Some(max_age) = self.stale_after {
                if self.backend.sweep_stale(max_age)? {
                    continue;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::LockTimeout {
                    resource: self.backend.describe(),
                    waited: timeout,
                });
            }

            debug!("Fixture lock {} is present; waiting", self.backend.describe());
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Release a guard explicitly. Equivalent to dropping it.
    pub fn release(guard: LockGuard) -> Result<()> {
        guard.release()
    }

    pub fn inspect(&self) -> Result<Option<TokenInfo>> {
        self.backend.inspect()
    }

    /// Remove the token regardless of holder
    pub fn clear(&self) -> Result<bool> {
        self.backend.clear()
    }

    /// Remove the token if it is older than the configured stale bound
    pub fn sweep(&self) -> Result<bool> {
        match self.stale_after {
            Some(max_age) => self.backend.sweep_stale(max_age),
            None => Ok(false),
        }
    }
}

/// Scoped ownership of the lock token; releases on drop
pub struct LockGuard {
    backend: Arc<dyn MutualExclusion>,
    holder: HolderId,
    acquired: Instant,
    released: bool,
}

impl LockGuard {
    pub fn holder(&self) -> HolderId {
        self.holder
    }

    pub fn held_for(&self) -> Duration {
        self.acquired.elapsed()
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.backend.release(self.holder)?;
        debug!(
            "Released fixture lock {} held by {} after {:?}",
            self.backend.describe(),
            self.holder,
            self.held_for()
        );
        Ok(())
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.backend.describe())
            .field("holder", &self.holder)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.backend.release(self.holder) {
            warn!("Failed to release fixture lock {}: {}", self.backend.describe(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn exclusive_section(lock: FixtureLock, inside: Arc<AtomicUsize>, overlaps: Arc<AtomicUsize>) {
        for _ in 0..5 {
            let guard = lock.acquire(Duration::from_secs(20)).unwrap();
            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(2));
            inside.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
        }
    }

    #[test]
    fn test_file_lock_acquire_release() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        let lock = FixtureLock::file(&path);

        let guard = lock.acquire(Duration::from_secs(1)).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let record: TokenRecord = serde_json::from_str(&content).unwrap();
        assert_eq!(record.holder, guard.holder());
        assert_eq!(record.pid, std::process::id());

        guard.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_guard_drop_releases() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join(".db_lock");
        let lock = FixtureLock::file(&path);

        {
            let _guard = lock.acquire(Duration::from_secs(1)).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquirer_times_out_while_held() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        let holder_a = FixtureLock::file(&path);
        let holder_b = FixtureLock::file(&path);

        let _guard = holder_a.acquire(Duration::from_secs(1)).unwrap();

        let start = Instant::now();
        let err = holder_b.acquire(Duration::from_millis(300)).err().unwrap();
        let elapsed = start.elapsed();

        assert!(err.is_lock_timeout());
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(300) + LOCK_POLL_INTERVAL);
        assert!(path.exists());
    }

    #[test]
    fn test_waiter_acquires_after_release() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        let holder_a = FixtureLock::file(&path);
        let holder_b = FixtureLock::file(&path).with_poll_interval(Duration::from_millis(20));

        let guard = holder_a.acquire(Duration::from_secs(1)).unwrap();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            drop(guard);
        });

        let start = Instant::now();
        let guard_b = holder_b.acquire(Duration::from_secs(2)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));
        releaser.join().unwrap();
        drop(guard_b);
        assert!(!path.exists());
    }

    #[test]
    fn test_file_lock_is_exclusive_across_instances() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                // Separate instances model separate worker processes
                let lock = FixtureLock::file(&path).with_poll_interval(Duration::from_millis(1));
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                std::thread::spawn(move || exclusive_section(lock, inside, overlaps))
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_local_lock_is_exclusive_across_threads() {
        let lock = FixtureLock::local().with_poll_interval(Duration::from_millis(1));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                let inside = inside.clone();
                let overlaps = overlaps.clone();
                std::thread::spawn(move || exclusive_section(lock, inside, overlaps))
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(lock.inspect().unwrap().is_none());
    }

    #[test]
    fn test_stale_token_is_swept() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        fs::write(&path, "locked").unwrap();

        let lock = FixtureLock::file(&path)
            .with_poll_interval(Duration::from_millis(20))
            .with_stale_after(Some(Duration::from_millis(50)));

        std::thread::sleep(Duration::from_millis(100));
        let guard = lock.acquire(Duration::from_secs(1)).unwrap();
        let info = lock.inspect().unwrap().unwrap();
        assert_eq!(info.record.unwrap().holder, guard.holder());
    }

    #[test]
    fn test_sweep_spares_token_retaken_after_observation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        let lock = FileLock::new(&path);

        assert!(lock.try_acquire(HolderId::new()).unwrap());
        std::thread::sleep(Duration::from_millis(20));

        // A second waiter judges the abandoned token stale but is slow to act
        let (_, seen_by_slow_waiter) = lock.observe_stale(Duration::ZERO).unwrap().unwrap();

        let fast = HolderId::new();
        assert!(lock.sweep_stale(Duration::ZERO).unwrap());
        assert!(lock.try_acquire(fast).unwrap());
        std::thread::sleep(Duration::from_millis(20));

        assert!(!lock.remove_observed(&seen_by_slow_waiter, Duration::ZERO).unwrap());
        assert_eq!(lock.inspect().unwrap().unwrap().record.unwrap().holder, fast);
        assert!(!lock.try_acquire(HolderId::new()).unwrap());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_sweep_spares_fresh_token() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        let lock = FileLock::new(&path);

        fs::write(&path, "locked").unwrap();
        std::thread::sleep(Duration::from_millis(40));
        let (_, observed) = lock.observe_stale(Duration::from_millis(15)).unwrap().unwrap();

        // Replaced by an equally unreadable but brand new token
        fs::remove_file(&path).unwrap();
        fs::write(&path, "locked").unwrap();

        assert!(!lock.remove_observed(&observed, Duration::from_millis(15)).unwrap());
        assert!(path.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_stale_sweep_disabled_keeps_token() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        fs::write(&path, "locked").unwrap();

        let lock = FixtureLock::file(&path)
            .with_poll_interval(Duration::from_millis(10))
            .with_stale_after(None);

        assert!(lock.acquire(Duration::from_millis(50)).unwrap_err().is_lock_timeout());
        assert!(!lock.sweep().unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_release_leaves_foreign_token() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        let lock = FixtureLock::file(&path);

        let guard = lock.acquire(Duration::from_secs(1)).unwrap();

        // Simulate the token being swept and re-taken by another holder
        let other = TokenRecord::for_holder(HolderId::new());
        fs::write(&path, serde_json::to_string(&other).unwrap()).unwrap();

        guard.release().unwrap();
        assert!(path.exists());

        let info = lock.inspect().unwrap().unwrap();
        assert_eq!(info.record.unwrap().holder, other.holder);
    }

    #[test]
    fn test_clear_removes_unconditionally() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".db_lock");
        fs::write(&path, "locked").unwrap();

        let lock = FixtureLock::file(&path);
        let info = lock.inspect().unwrap().unwrap();
        assert!(info.record.is_none());

        assert!(lock.clear().unwrap());
        assert!(!lock.clear().unwrap());
        assert!(lock.inspect().unwrap().is_none());
    }

    #[test]
    fn test_local_lock_release_by_other_holder_is_ignored() {
        let local = LocalLock::new();
        let a = HolderId::new();
        let b = HolderId::new();

        assert!(local.try_acquire(a).unwrap());
        assert!(!local.try_acquire(b).unwrap());

        local.release(b).unwrap();
        assert!(!local.try_acquire(b).unwrap());

        local.release(a).unwrap();
        assert!(local.try_acquire(b).unwrap());
    }
}
