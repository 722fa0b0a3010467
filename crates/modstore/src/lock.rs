//! Cross-process module lock backed by a sentinel file.
//!
//! The sentinel is created with create-new semantics and holds a small JSON
//! marker naming its owner and acquisition time. Holding the file is
//! holding the lock; any process sharing the storage root sees it.
//!
//! Staleness: the age of a sentinel is measured from the newer of its
//! marker timestamp and its mtime. Once that age reaches
//! [`LockPolicy::stale_after`] the holder is presumed dead and the next
//! acquirer breaks the lock. Live holders doing long work call
//! [`ModuleLock::touch`] to stay fresh.
//!
//! The guard releases on drop, so every exit path of the critical section
//! releases the lock. Release only deletes a sentinel that still carries
//! this guard's owner id; if the lock was broken and taken by someone else
//! in the meantime, their sentinel is left alone.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Suffix inserted between the sentinel name and a random id when breaking a stale lock.
pub const TOMBSTONE_MARKER: &str = ".stale-";

/// Suffix of the side file that admits one breaker at a time.
pub const BREAKER_SUFFIX: &str = ".breaking";

const CONTENTION_WARNING_AFTER: Duration = Duration::from_millis(500);

/// How long to wait for a lock and when to consider one abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub timeout: Duration,
    pub stale_after: Duration,
    pub poll_interval: Duration,
}

impl LockPolicy {
    pub fn new(timeout: Duration, stale_after: Duration) -> Self {
        Self {
            timeout,
            stale_after,
            poll_interval: Duration::from_millis(25),
        }
    }
}

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for lock {path}")]
    Timeout { path: PathBuf, waited: Duration },

    #[error("deadline passed while waiting for lock {0}")]
    DeadlineExceeded(PathBuf),

    #[error("lock I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Contents of a sentinel file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockMarker {
    owner: String,
    pid: u32,
    acquired_at_ms: u64,
}

impl LockMarker {
    fn owned_by(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            pid: std::process::id(),
            acquired_at_ms: now_ms(),
        }
    }
}

/// A held module lock. Released on drop.
#[derive(Debug)]
pub struct ModuleLock {
    path: PathBuf,
    owner: String,
    acquired_at: Instant,
    released: bool,
}

impl ModuleLock {
    /// Acquire the lock at `path`, waiting up to `policy.timeout`.
    pub fn acquire(path: &Path, policy: &LockPolicy) -> Result<Self, LockError> {
        Self::acquire_until(path, policy, None)
    }

    /// Acquire the lock, giving up at the earlier of the policy timeout and `deadline`.
    pub fn acquire_until(
        path: &Path,
        policy: &LockPolicy,
        deadline: Option<Instant>,
    ) -> Result<Self, LockError> {
        let io_err = |source: io::Error| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        let start = Instant::now();
        let timeout_at = start + policy.timeout;
        let (give_up_at, by_deadline) = match deadline {
            Some(d) if d < timeout_at => (d, true),
            _ => (timeout_at, false),
        };

        let owner = Uuid::new_v4().simple().to_string();
        let mut warned = false;

        loop {
            if try_create(path, &owner).map_err(io_err)? {
                if warned {
                    debug!(
                        lock = %path.display(),
                        waited_ms = start.elapsed().as_millis() as u64,
                        "lock acquired after contention"
                    );
                }
                return Ok(Self {
                    path: path.to_path_buf(),
                    owner,
                    acquired_at: Instant::now(),
                    released: false,
                });
            }

            if let Some((age, observed)) = lock_age(path).map_err(io_err)? {
                if age >= policy.stale_after {
                    warn!(
                        lock = %path.display(),
                        age_ms = age.as_millis() as u64,
                        holder_pid = observed.as_ref().map(|m| m.pid),
                        "breaking stale lock"
                    );
                    if break_stale(path, observed.as_ref(), policy.stale_after).map_err(io_err)? {
                        continue;
                    }
                }
            }

            let now = Instant::now();
            if now >= give_up_at {
                return Err(if by_deadline {
                    LockError::DeadlineExceeded(path.to_path_buf())
                } else {
                    LockError::Timeout {
                        path: path.to_path_buf(),
                        waited: now - start,
                    }
                });
            }

            if !warned && now - start > CONTENTION_WARNING_AFTER {
                warn!(lock = %path.display(), "lock contention, waiting");
                warned = true;
            }

            thread::sleep(policy.poll_interval.min(give_up_at - now));
        }
    }

    /// Path of the sentinel file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Owner id written into the sentinel.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Time since this guard acquired the lock.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Refresh the sentinel's mtime so long-running holders are not considered stale.
    pub fn touch(&self) -> io::Result<()> {
        OpenOptions::new()
            .write(true)
            .open(&self.path)?
            .set_modified(SystemTime::now())
    }

    /// Release the lock now, surfacing any error. Dropping the guard does the same silently.
    pub fn release(mut self) -> Result<(), LockError> {
        self.release_inner().map_err(|source| LockError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn release_inner(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        match read_marker(&self.path) {
            Some(marker) if marker.owner == self.owner => match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            },
            Some(_) => {
                warn!(
                    lock = %self.path.display(),
                    "lock was broken while held; leaving the new holder's sentinel"
                );
            }
            None => {}
        }
        Ok(())
    }
}

impl Drop for ModuleLock {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(lock = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

/// Run `body` while holding the lock at `path`.
pub fn with_lock<T, E>(
    path: &Path,
    policy: &LockPolicy,
    body: impl FnOnce(&ModuleLock) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<LockError>,
{
    let lock = ModuleLock::acquire(path, policy)?;
    let result = body(&lock);
    drop(lock);
    result
}

/// Whether a live (non-stale) sentinel exists at `path`.
pub fn is_held(path: &Path, stale_after: Duration) -> io::Result<bool> {
    Ok(matches!(lock_age(path)?, Some((age, _)) if age < stale_after))
}

/// Whether a file name is a tombstone left behind while breaking a stale
/// lock (or a stale breaker file).
pub fn is_tombstone(file_name: &str, lock_file_name: &str) -> bool {
    file_name
        .strip_prefix(lock_file_name)
        .is_some_and(|rest| rest.contains(TOMBSTONE_MARKER))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns `Ok(false)` when someone else holds the sentinel.
fn try_create(path: &Path, owner: &str) -> io::Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e),
    };

    let marker = LockMarker::owned_by(owner);

    let written = serde_json::to_vec(&marker)
        .map_err(io::Error::other)
        .and_then(|json| file.write_all(&json))
        .and_then(|()| file.sync_all());

    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(e);
    }
    Ok(true)
}

fn read_marker(path: &Path) -> Option<LockMarker> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Age of the sentinel and its marker, or `None` if there is no sentinel.
fn lock_age(path: &Path) -> io::Result<Option<(Duration, Option<LockMarker>)>> {
    let modified = match fs::metadata(path) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let marker = read_marker(path);
    let marked = marker
        .as_ref()
        .map(|m| UNIX_EPOCH + Duration::from_millis(m.acquired_at_ms))
        .unwrap_or(UNIX_EPOCH);

    let newest = modified.max(marked);
    let age = SystemTime::now()
        .duration_since(newest)
        .unwrap_or(Duration::ZERO);

    Ok(Some((age, marker)))
}

fn breaker_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(BREAKER_SUFFIX);
    path.with_file_name(name)
}

fn same_owner(a: Option<&LockMarker>, b: Option<&LockMarker>) -> bool {
    a.map(|m| &m.owner) == b.map(|m| &m.owner)
}

/// Break the stale sentinel `observed` at `path`. Returns whether it is gone.
///
/// Breakers are admitted one at a time through a create-new side file.
/// Inside, the sentinel is re-read and only retired if it is still the
/// stale one that was observed, so a lock taken by another acquirer in the
/// meantime is never touched. A side file left by a crashed breaker is
/// itself broken once it ages past `stale_after`.
fn break_stale(
    path: &Path,
    observed: Option<&LockMarker>,
    stale_after: Duration,
) -> io::Result<bool> {
    let breaker = breaker_path(path);
    let breaker_owner = Uuid::new_v4().simple().to_string();

    if !try_create(&breaker, &breaker_owner)? {
        if let Some((age, abandoned)) = lock_age(&breaker)? {
            if age >= stale_after {
                warn!(breaker = %breaker.display(), "removing abandoned lock breaker");
                retire(&breaker, abandoned.as_ref())?;
            }
        }
        return Ok(false);
    }

    let broken = match lock_age(path) {
        Ok(Some((age, current))) if age >= stale_after && same_owner(current.as_ref(), observed) => {
            retire(path, current.as_ref())
        }
        Ok(Some(_)) => Ok(false),
        Ok(None) => Ok(true),
        Err(e) => Err(e),
    };

    if let Err(e) = retire(&breaker, Some(&LockMarker::owned_by(&breaker_owner))) {
        warn!(breaker = %breaker.display(), error = %e, "failed to remove lock breaker");
    }
    broken
}

/// Remove the file at `path` if it still carries `expected`'s owner.
///
/// The file is renamed to a unique tombstone first, which only one caller
/// can do. If the tombstone turns out to belong to someone else, it is
/// linked back into place.
fn retire(path: &Path, expected: Option<&LockMarker>) -> io::Result<bool> {
    let mut tombstone_name = path.file_name().unwrap_or_default().to_os_string();
    tombstone_name.push(format!("{}{}", TOMBSTONE_MARKER, Uuid::new_v4().simple()));
    let tombstone = path.with_file_name(tombstone_name);

    match fs::rename(path, &tombstone) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    }

    let taken = read_marker(&tombstone);
    let retired = same_owner(taken.as_ref(), expected);

    if !retired {
        match fs::hard_link(&tombstone, path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }

    match fs::remove_file(&tombstone) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    Ok(retired)
}

/// Write a sentinel as if a holder acquired it `age` ago and then vanished.
#[cfg(test)]
pub(crate) fn plant_abandoned_lock(path: &Path, age: Duration) -> io::Result<()> {
    let then = SystemTime::now() - age;
    let marker = LockMarker {
        owner: "crashed-writer".to_string(),
        pid: u32::MAX,
        acquired_at_ms: then
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
    };
    let file = fs::File::create(path)?;
    serde_json::to_writer(&file, &marker).map_err(io::Error::other)?;
    file.set_modified(then)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn policy(timeout_ms: u64, stale_ms: u64) -> LockPolicy {
        LockPolicy {
            poll_interval: Duration::from_millis(5),
            ..LockPolicy::new(
                Duration::from_millis(timeout_ms),
                Duration::from_millis(stale_ms),
            )
        }
    }

    #[test]
    fn test_acquire_writes_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");

        let lock = ModuleLock::acquire(&path, &policy(1000, 60_000)).unwrap();
        assert!(path.exists());

        let marker = read_marker(&path).expect("marker should parse");
        assert_eq!(marker.owner, lock.owner());
        assert_eq!(marker.pid, std::process::id());

        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");

        {
            let _lock = ModuleLock::acquire(&path, &policy(1000, 60_000)).unwrap();
            assert!(path.exists());
        }

        assert!(!path.exists());
        let _again = ModuleLock::acquire(&path, &policy(100, 60_000)).unwrap();
    }

    #[test]
    fn test_contention_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");

        let _held = ModuleLock::acquire(&path, &policy(1000, 60_000)).unwrap();

        let started = Instant::now();
        let err = ModuleLock::acquire(&path, &policy(100, 60_000)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_contention_across_threads() {
        use std::sync::mpsc;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        let held = ModuleLock::acquire(&path, &policy(1000, 60_000)).unwrap();

        let (tx, rx) = mpsc::channel();
        let path2 = path.clone();
        let handle = thread::spawn(move || {
            let lock = ModuleLock::acquire(&path2, &policy(5_000, 60_000)).unwrap();
            tx.send(lock.owner().to_string()).unwrap();
        });

        // The waiter cannot get in while we hold it.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        let first_owner = held.owner().to_string();
        drop(held);

        let second_owner = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(first_owner, second_owner);
        handle.join().unwrap();
    }

    #[test]
    fn test_deadline_shorter_than_timeout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        let _held = ModuleLock::acquire(&path, &policy(1000, 60_000)).unwrap();

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = ModuleLock::acquire_until(&path, &policy(10_000, 60_000), Some(deadline))
            .unwrap_err();
        assert!(matches!(err, LockError::DeadlineExceeded(_)));
    }

    #[test]
    fn test_stale_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        plant_abandoned_lock(&path, Duration::from_secs(600)).unwrap();

        let lock = ModuleLock::acquire(&path, &policy(200, 1_000)).unwrap();
        let marker = read_marker(&path).unwrap();
        assert_eq!(marker.owner, lock.owner());

        // No tombstones left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_tombstone(&e.file_name().to_string_lossy(), "module.lock"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_concurrent_breakers_admit_one_holder() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::{Arc, Barrier};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        plant_abandoned_lock(&path, Duration::from_secs(600)).unwrap();

        let contenders = 6;
        let barrier = Arc::new(Barrier::new(contenders));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..contenders)
            .map(|_| {
                let (path, barrier) = (path.clone(), barrier.clone());
                let (active, peak) = (active.clone(), peak.clone());
                thread::spawn(move || {
                    barrier.wait();
                    let lock = ModuleLock::acquire(&path, &policy(5_000, 2_000)).unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                    lock.release().unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
    }

    #[test]
    fn test_break_skips_sentinel_that_changed_owner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        plant_abandoned_lock(&path, Duration::from_secs(600)).unwrap();

        let seen_earlier = LockMarker::owned_by("previous-holder");
        let broken = break_stale(&path, Some(&seen_earlier), Duration::from_secs(1)).unwrap();
        assert!(!broken);
        assert_eq!(read_marker(&path).unwrap().owner, "crashed-writer");
        assert!(!breaker_path(&path).exists());
    }

    #[test]
    fn test_busy_breaker_blocks_breaking() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        plant_abandoned_lock(&path, Duration::from_secs(600)).unwrap();
        fs::write(breaker_path(&path), b"").unwrap();

        let err = ModuleLock::acquire(&path, &policy(100, 1_000)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert_eq!(read_marker(&path).unwrap().owner, "crashed-writer");
    }

    #[test]
    fn test_abandoned_breaker_is_cleared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        plant_abandoned_lock(&path, Duration::from_secs(600)).unwrap();
        plant_abandoned_lock(&breaker_path(&path), Duration::from_secs(600)).unwrap();

        let lock = ModuleLock::acquire(&path, &policy(1_000, 1_000)).unwrap();
        assert_eq!(read_marker(&path).unwrap().owner, lock.owner());
        assert!(!breaker_path(&path).exists());
    }

    #[test]
    fn test_fresh_foreign_lock_is_not_broken() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        plant_abandoned_lock(&path, Duration::from_millis(0)).unwrap();

        let err = ModuleLock::acquire(&path, &policy(100, 60_000)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
        assert!(path.exists());
    }

    #[test]
    fn test_empty_sentinel_ages_by_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");

        // A holder that crashed between creating the file and writing its marker.
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(600))
            .unwrap();
        drop(file);

        let _lock = ModuleLock::acquire(&path, &policy(200, 1_000)).unwrap();
    }

    #[test]
    fn test_touch_keeps_lock_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        let lock = ModuleLock::acquire(&path, &policy(1000, 60_000)).unwrap();

        // Backdate the sentinel, then refresh it.
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(600))
            .unwrap();
        lock.touch().unwrap();

        assert!(is_held(&path, Duration::from_secs(60)).unwrap());
        let err = ModuleLock::acquire(&path, &policy(50, 60_000)).unwrap_err();
        assert!(matches!(err, LockError::Timeout { .. }));
    }

    #[test]
    fn test_release_leaves_foreign_sentinel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        let lock = ModuleLock::acquire(&path, &policy(1000, 60_000)).unwrap();

        // Someone broke our lock and took it.
        fs::remove_file(&path).unwrap();
        plant_abandoned_lock(&path, Duration::ZERO).unwrap();

        lock.release().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_is_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");
        assert!(!is_held(&path, Duration::from_secs(60)).unwrap());

        plant_abandoned_lock(&path, Duration::from_secs(600)).unwrap();
        assert!(!is_held(&path, Duration::from_secs(60)).unwrap());

        fs::remove_file(&path).unwrap();
        let _lock = ModuleLock::acquire(&path, &policy(100, 60_000)).unwrap();
        assert!(is_held(&path, Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn test_with_lock_releases_on_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("module.lock");

        let result: Result<(), LockError> = with_lock(&path, &policy(100, 60_000), |lock| {
            assert!(lock.path().exists());
            Err(LockError::DeadlineExceeded(lock.path().to_path_buf()))
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_is_tombstone() {
        assert!(is_tombstone("module.lock.stale-abc", "module.lock"));
        assert!(is_tombstone("module.lock.breaking.stale-abc", "module.lock"));
        assert!(!is_tombstone("module.lock.breaking", "module.lock"));
        assert!(!is_tombstone("module.lock", "module.lock"));
        assert!(!is_tombstone("module.zip", "module.lock"));
    }
}
