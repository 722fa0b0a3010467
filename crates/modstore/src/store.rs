//! FileModuleStore: per-module directories of archive + hash sidecar.
//!
//! Implements the ModuleStore trait on a local filesystem.
//!
//! Layout:
//! ```text
//! {base_path}/
//! ├── audio.mixer/
//! │   ├── module.zip          # current artifact
//! │   ├── module.hash         # 32 hex chars, no newline
//! │   └── module.lock         # present while a writer holds the module
//! └── ui.theme/
//!     ├── module.zip
//!     └── module.hash
//! ```
//!
//! Commit order for a put, with the module lock held:
//!
//! 1. stream the upload into `.staging-{id}.zip`, hashing as it goes; fsync
//! 2. write `.staging-{id}.hash`; fsync
//! 3. remove the old `module.hash`
//! 4. rename the staged archive over `module.zip`
//! 5. rename the staged sidecar to `module.hash`
//! 6. fsync the module directory
//!
//! A reader that finds a sidecar therefore always finds the artifact it
//! describes. A crash can leave an artifact without a sidecar (reported as
//! [`ModuleState::Unverified`] until [`FileModuleStore::repair`] or the next
//! put) but never a sidecar naming the wrong bytes.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::{self, ArchiveError, ModuleInfo, Revision};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::hash::{ContentHash, HashingWriter};
use crate::lock::{self, LockPolicy, ModuleLock};
use crate::name::{ModuleName, NameError};
use crate::staging::{is_staging_name, StagingFile, StagingId};

/// File name of the current artifact inside a module directory.
pub const ARTIFACT_FILE: &str = "module.zip";

/// File name of the hash sidecar.
pub const HASH_FILE: &str = "module.hash";

/// File name of the lock sentinel.
pub const LOCK_FILE: &str = "module.lock";

const COPY_CHUNK: usize = 64 * 1024;

/// Lock and sidecar re-reads before a missing sidecar is reported as `NotFound`.
const SIDECAR_RECHECKS: usize = 3;

/// Storage backend for named module archives.
///
/// Writers to the same name are serialized; writers to different names and
/// all readers proceed without waiting on each other.
pub trait ModuleStore: Send + Sync {
    /// Replace the module's artifact with the bytes read from `data`.
    fn put(&self, name: &ModuleName, data: &mut dyn Read) -> StoreResult<PutReceipt>;

    /// Open the current artifact for reading.
    fn get(&self, name: &ModuleName) -> StoreResult<ArtifactReader>;

    /// Hash recorded for the current artifact.
    fn get_hash(&self, name: &ModuleName) -> StoreResult<ContentHash>;

    /// Whether `expected` names the current artifact.
    ///
    /// A malformed `expected` is simply not a match.
    fn verify_hash(&self, name: &ModuleName, expected: &str) -> StoreResult<bool> {
        Ok(self.get_hash(name)?.matches(expected))
    }

    /// Revision from the artifact's `info` entry.
    fn get_revision(&self, name: &ModuleName) -> StoreResult<Revision> {
        self.get_info(name).map(|info| info.revision)
    }

    /// Full decoded `info` entry.
    fn get_info(&self, name: &ModuleName) -> StoreResult<ModuleInfo>;

    /// Snapshot of the module for listings and diagnostics.
    ///
    /// Returns `Ok(None)` if the module has no artifact.
    fn inspect(&self, name: &ModuleName) -> StoreResult<Option<ModuleReference>>;

    /// Lifecycle state of the module.
    fn state(&self, name: &ModuleName) -> StoreResult<ModuleState>;
}

/// Outcome of a committed put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutReceipt {
    pub name: ModuleName,
    pub hash: ContentHash,
    pub size_bytes: u64,
    /// Whether an earlier artifact was overwritten.
    pub replaced: bool,
}

/// Where a module is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ModuleState {
    /// No artifact has ever been committed.
    Absent,
    /// Artifact and sidecar are both in place.
    Present,
    /// An artifact without a sidecar, left by an interrupted commit.
    Unverified,
    /// A writer holds the lock. `replacing` is true when an artifact is already live.
    Writing { replacing: bool },
}

/// Snapshot returned by [`ModuleStore::inspect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleReference {
    pub name: ModuleName,
    pub hash: Option<ContentHash>,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

/// What [`FileModuleStore::repair`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub removed_orphans: usize,
    pub sidecar_removed: bool,
    pub hash_rewritten: bool,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// An open handle on a committed artifact.
///
/// The handle keeps reading the bytes it was opened on even if a writer
/// replaces the artifact in the meantime.
#[derive(Debug)]
pub struct ArtifactReader {
    file: File,
    size_bytes: u64,
    path: PathBuf,
}

impl ArtifactReader {
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_file(self) -> File {
        self.file
    }

    pub fn read_all(mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.size_bytes as usize);
        self.file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl Read for ArtifactReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

#[derive(Debug, Clone)]
struct ModulePaths {
    dir: PathBuf,
    artifact: PathBuf,
    hash: PathBuf,
    lock: PathBuf,
}

/// Filesystem-based module store.
#[derive(Debug, Clone)]
pub struct FileModuleStore {
    config: StoreConfig,
    policy: LockPolicy,
}

impl FileModuleStore {
    /// Create a store with the given configuration.
    ///
    /// Creates the base directory if it doesn't exist (unless in read-only mode).
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        if !config.read_only {
            fs::create_dir_all(&config.base_path).map_err(|e| {
                StoreError::io(
                    format!(
                        "failed to create module store root {}",
                        config.base_path.display()
                    ),
                    e,
                )
            })?;
        }

        let policy = config.lock_policy();
        Ok(Self { config, policy })
    }

    /// Create a store at a specific path with default limits.
    pub fn at_path(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::new(StoreConfig::with_base_path(path))
    }

    /// Create a read-only store at a specific path.
    pub fn read_only_at(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::new(StoreConfig::read_only(path))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Directory that holds everything belonging to `name`.
    pub fn module_dir(&self, name: &ModuleName) -> StoreResult<PathBuf> {
        // Names are checked on parse; re-check that the join stays one level below the root.
        let mut components = Path::new(name.as_str()).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.config.base_path.join(name.as_str())),
            _ => Err(NameError::InvalidChar {
                name: name.to_string(),
                ch: std::path::MAIN_SEPARATOR,
            }
            .into()),
        }
    }

    fn paths(&self, name: &ModuleName) -> StoreResult<ModulePaths> {
        let dir = self.module_dir(name)?;
        Ok(ModulePaths {
            artifact: dir.join(ARTIFACT_FILE),
            hash: dir.join(HASH_FILE),
            lock: dir.join(LOCK_FILE),
            dir,
        })
    }

    /// Take the module lock and open a staging file for a new artifact.
    ///
    /// Nothing becomes visible to readers until [`PendingPut::commit`].
    /// Dropping the returned handle aborts the write and releases the lock.
    pub fn begin_put(
        &self,
        name: &ModuleName,
        deadline: Option<Instant>,
    ) -> StoreResult<PendingPut<'_>> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::DeadlineExceeded(name.to_string()));
        }

        let paths = self.paths(name)?;
        fs::create_dir_all(&paths.dir).map_err(|e| {
            StoreError::io(
                format!("failed to create module directory {}", paths.dir.display()),
                e,
            )
        })?;

        let lock = ModuleLock::acquire_until(&paths.lock, &self.policy, deadline)?;

        let removed = sweep_orphans(&paths.dir, self.config.stale_lock_after())
            .map_err(|e| StoreError::io("failed to sweep orphaned staging files", e))?;
        if removed > 0 {
            warn!(module = %name, removed, "removed files left by an interrupted write");
        }

        let id = StagingId::new();
        let staging = StagingFile::create(&paths.dir, &id, "zip")
            .map_err(|e| StoreError::io("failed to create staging artifact", e))?;

        debug!(
            module = %name,
            staging = %staging.path().display(),
            lock_owner = lock.owner(),
            "put started"
        );

        Ok(PendingPut {
            store: self,
            name: name.clone(),
            paths,
            id,
            writer: HashingWriter::new(BufWriter::with_capacity(COPY_CHUNK, staging)),
            deadline,
            last_touch: Instant::now(),
            poisoned: false,
            lock,
        })
    }

    /// Open the artifact together with the hash of exactly the bytes it will yield.
    ///
    /// The sidecar is read on both sides of the open. If a commit lands in
    /// between, or the sidecar is missing, the open handle is hashed instead.
    pub fn get_with_hash(&self, name: &ModuleName) -> StoreResult<(ArtifactReader, ContentHash)> {
        let before = self.get_hash(name).ok();
        let mut reader = self.get(name)?;
        let after = self.get_hash(name).ok();

        if let (Some(before), Some(after)) = (before, after) {
            if before == after {
                return Ok((reader, after));
            }
        }

        debug!(module = %name, "sidecar unstable across open, hashing artifact handle");
        let (hash, _) = ContentHash::from_reader(&reader.file)
            .map_err(|e| StoreError::io("failed to hash artifact", e))?;
        reader
            .file
            .seek(SeekFrom::Start(0))
            .map_err(|e| StoreError::io("failed to rewind artifact", e))?;
        Ok((reader, hash))
    }

    /// [`ModuleStore::put`] with an overall deadline covering lock wait, transfer and commit.
    pub fn put_until(
        &self,
        name: &ModuleName,
        data: &mut dyn Read,
        deadline: Option<Instant>,
    ) -> StoreResult<PutReceipt> {
        let mut pending = self.begin_put(name, deadline)?;
        pending.write_from(data)?;
        pending.commit()
    }

    /// Bring a module directory back to a consistent state after a crash.
    ///
    /// Under the module lock: deletes orphaned staging files and lock
    /// tombstones, drops a sidecar whose artifact is gone, and rewrites a
    /// sidecar that is missing or disagrees with the artifact bytes.
    pub fn repair(&self, name: &ModuleName) -> StoreResult<RepairReport> {
        if self.config.read_only {
            return Err(StoreError::ReadOnly);
        }

        let paths = self.paths(name)?;
        if !paths.dir.is_dir() {
            return Err(StoreError::NotFound(name.to_string()));
        }

        lock::with_lock(&paths.lock, &self.policy, |_lock| {
            let mut report = RepairReport {
                removed_orphans: sweep_orphans(&paths.dir, self.config.stale_lock_after())
                    .map_err(|e| StoreError::io("failed to sweep orphaned staging files", e))?,
                ..RepairReport::default()
            };

            let artifact = match File::open(&paths.artifact) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    report.sidecar_removed = remove_if_exists(&paths.hash)
                        .map_err(|e| StoreError::io("failed to remove dangling sidecar", e))?;
                    return Ok(report);
                }
                Err(e) => return Err(StoreError::io("failed to open artifact", e)),
            };

            let (actual, size_bytes) = ContentHash::from_reader(artifact)
                .map_err(|e| StoreError::io("failed to hash artifact", e))?;

            let recorded = fs::read_to_string(&paths.hash)
                .ok()
                .and_then(|raw| ContentHash::parse(&raw).ok());

            if recorded.as_ref() != Some(&actual) {
                warn!(
                    module = %name,
                    recorded = recorded.as_ref().map(|h| h.as_str()),
                    actual = %actual,
                    size_bytes,
                    "rewriting hash sidecar"
                );
                let sidecar = stage_sidecar(&paths.dir, &StagingId::new(), &actual)
                    .map_err(|e| StoreError::io("failed to stage hash sidecar", e))?;
                sidecar
                    .persist(&paths.hash)
                    .map_err(|e| StoreError::io("failed to publish hash sidecar", e))?;
                sync_dir(&paths.dir)
                    .map_err(|e| StoreError::io("failed to sync module directory", e))?;
                report.hash_rewritten = true;
            }

            Ok(report)
        })
    }
}

impl ModuleStore for FileModuleStore {
    fn put(&self, name: &ModuleName, data: &mut dyn Read) -> StoreResult<PutReceipt> {
        self.put_until(name, data, None)
    }

    fn get(&self, name: &ModuleName) -> StoreResult<ArtifactReader> {
        let paths = self.paths(name)?;
        let file = match File::open(&paths.artifact) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => return Err(StoreError::io("failed to open artifact", e)),
        };

        // Size comes from the open handle, not the path, so it matches the bytes we read.
        let size_bytes = file
            .metadata()
            .map_err(|e| StoreError::io("failed to stat artifact", e))?
            .len();

        Ok(ArtifactReader {
            file,
            size_bytes,
            path: paths.artifact,
        })
    }

    /// Hash recorded for the current artifact.
    ///
    /// A commit retires the old sidecar before publishing the new one. When
    /// the sidecar is missing while a writer holds the lock, the artifact
    /// currently in place is hashed instead, so a present module never reads
    /// as absent. Without a writer a missing sidecar is `NotFound`
    /// ([`ModuleState::Unverified`]).
    fn get_hash(&self, name: &ModuleName) -> StoreResult<ContentHash> {
        let paths = self.paths(name)?;
        if !paths.artifact.exists() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        if let Some(hash) = read_sidecar(&paths.hash)? {
            return Ok(hash);
        }

        let reader = self.get(name)?;
        for _ in 0..SIDECAR_RECHECKS {
            let writing = lock::is_held(&paths.lock, self.config.stale_lock_after())
                .map_err(|e| StoreError::io("failed to inspect module lock", e))?;
            if writing {
                debug!(module = %name, "sidecar is being replaced, hashing artifact");
                let (hash, _) = ContentHash::from_reader(reader)
                    .map_err(|e| StoreError::io("failed to hash artifact", e))?;
                return Ok(hash);
            }
            // The sidecar is published before the lock is released.
            if let Some(hash) = read_sidecar(&paths.hash)? {
                return Ok(hash);
            }
        }

        Err(StoreError::NotFound(name.to_string()))
    }

    fn get_info(&self, name: &ModuleName) -> StoreResult<ModuleInfo> {
        let paths = self.paths(name)?;
        archive::read_info(&paths.artifact).map_err(|e| match e {
            ArchiveError::Io { ref source, .. } if source.kind() == io::ErrorKind::NotFound => {
                StoreError::NotFound(name.to_string())
            }
            other => other.into(),
        })
    }

    fn inspect(&self, name: &ModuleName) -> StoreResult<Option<ModuleReference>> {
        let paths = self.paths(name)?;
        let metadata = match fs::metadata(&paths.artifact) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("failed to stat artifact", e)),
        };

        let hash = match self.get_hash(name) {
            Ok(hash) => Some(hash),
            Err(e) if e.is_not_found() => None,
            Err(StoreError::CorruptSidecar { .. }) => None,
            Err(e) => return Err(e),
        };

        Ok(Some(ModuleReference {
            name: name.clone(),
            hash,
            size_bytes: metadata.len(),
            local_path: Some(paths.artifact.to_string_lossy().into_owned()),
        }))
    }

    fn state(&self, name: &ModuleName) -> StoreResult<ModuleState> {
        let paths = self.paths(name)?;
        let writing = lock::is_held(&paths.lock, self.config.stale_lock_after())
            .map_err(|e| StoreError::io("failed to inspect module lock", e))?;
        let artifact = paths.artifact.exists();

        Ok(match (writing, artifact) {
            (true, replacing) => ModuleState::Writing { replacing },
            (false, false) => ModuleState::Absent,
            (false, true) if paths.hash.exists() => ModuleState::Present,
            (false, true) => ModuleState::Unverified,
        })
    }
}

/// An in-progress put holding the module lock.
///
/// Bytes go to a staging file while being hashed. [`commit`](Self::commit)
/// publishes them; dropping the value instead deletes the staging file and
/// releases the lock, leaving the previous artifact untouched.
pub struct PendingPut<'a> {
    store: &'a FileModuleStore,
    name: ModuleName,
    paths: ModulePaths,
    id: StagingId,
    writer: HashingWriter<BufWriter<StagingFile>>,
    deadline: Option<Instant>,
    last_touch: Instant,
    poisoned: bool,
    // Declared last: the staging file is removed before the lock is released.
    lock: ModuleLock,
}

impl std::fmt::Debug for PendingPut<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPut")
            .field("name", &self.name)
            .field("staging", &self.id)
            .field("bytes_written", &self.writer.bytes_written())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl PendingPut<'_> {
    /// Append one chunk to the staged artifact.
    ///
    /// Any error poisons the put; a later `commit` is refused.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> StoreResult<()> {
        let result = self.write_chunk_inner(chunk);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn write_chunk_inner(&mut self, chunk: &[u8]) -> StoreResult<()> {
        self.check_deadline()?;

        let limit = self.store.config.max_artifact_bytes;
        if self.writer.bytes_written() + chunk.len() as u64 > limit {
            return Err(StoreError::PayloadTooLarge { limit });
        }

        self.writer
            .write_all(chunk)
            .map_err(|e| StoreError::io("failed to write staging artifact", e))?;
        self.keep_lock_fresh();
        Ok(())
    }

    /// Copy `data` to the staged artifact until EOF. Returns the bytes copied.
    ///
    /// The deadline is checked between reads only. Sources that can stall
    /// must bound their own reads and fail with [`io::ErrorKind::TimedOut`],
    /// which is reported as `DeadlineExceeded`.
    pub fn write_from(&mut self, data: &mut dyn Read) -> StoreResult<u64> {
        let mut buffer = vec![0u8; COPY_CHUNK];
        let mut copied = 0u64;

        loop {
            let n = match data.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.poisoned = true;
                    if e.kind() == io::ErrorKind::TimedOut {
                        return Err(StoreError::DeadlineExceeded(self.name.to_string()));
                    }
                    return Err(StoreError::io("failed to read upload stream", e));
                }
            };
            self.write_chunk(&buffer[..n])?;
            copied += n as u64;
        }

        Ok(copied)
    }

    /// Publish the staged artifact and its sidecar, then release the lock.
    pub fn commit(self) -> StoreResult<PutReceipt> {
        if self.poisoned {
            return Err(StoreError::io(
                "refusing to commit",
                io::Error::other("an earlier write to this put failed"),
            ));
        }
        self.check_deadline()?;

        let PendingPut {
            name,
            paths,
            id,
            writer,
            lock,
            ..
        } = self;

        let (buffered, hash, size_bytes) = writer.into_parts();
        let mut staged = buffered
            .into_inner()
            .map_err(|e| StoreError::io("failed to flush staging artifact", e.into_error()))?;
        staged
            .sync()
            .map_err(|e| StoreError::io("failed to sync staging artifact", e))?;

        let sidecar = stage_sidecar(&paths.dir, &id, &hash)
            .map_err(|e| StoreError::io("failed to stage hash sidecar", e))?;

        let replaced = paths.artifact.exists();

        remove_if_exists(&paths.hash)
            .map_err(|e| StoreError::io("failed to retire old hash sidecar", e))?;
        staged
            .persist(&paths.artifact)
            .map_err(|e| StoreError::io("failed to publish artifact", e))?;
        sidecar
            .persist(&paths.hash)
            .map_err(|e| StoreError::io("failed to publish hash sidecar", e))?;
        sync_dir(&paths.dir).map_err(|e| StoreError::io("failed to sync module directory", e))?;

        info!(
            module = %name,
            hash = %hash,
            size_bytes,
            replaced,
            held_ms = lock.held_for().as_millis() as u64,
            "module stored"
        );

        // The artifact is live at this point; a failed unlock is not a failed put.
        if let Err(e) = lock.release() {
            warn!(module = %name, error = %e, "failed to release module lock");
        }

        Ok(PutReceipt {
            name,
            hash,
            size_bytes,
            replaced,
        })
    }

    /// Discard the staged bytes and release the lock.
    pub fn abort(self) {
        debug!(module = %self.name, staging = %self.id, "put aborted");
    }

    fn check_deadline(&self) -> StoreResult<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(StoreError::DeadlineExceeded(self.name.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn keep_lock_fresh(&mut self) {
        if self.last_touch.elapsed() < self.store.config.stale_lock_after() / 3 {
            return;
        }
        if let Err(e) = self.lock.touch() {
            warn!(module = %self.name, error = %e, "failed to refresh module lock");
        }
        self.last_touch = Instant::now();
    }
}

/// Write `hash` into a synced staging sidecar, ready to be persisted.
fn stage_sidecar(dir: &Path, id: &StagingId, hash: &ContentHash) -> io::Result<StagingFile> {
    let mut sidecar = StagingFile::create(dir, id, "hash")?;
    sidecar.write_all(hash.as_str().as_bytes())?;
    sidecar.sync()?;
    Ok(sidecar)
}

/// Read and parse the hash sidecar. `None` if it does not exist.
fn read_sidecar(path: &Path) -> StoreResult<Option<ContentHash>> {
    match fs::read_to_string(path) {
        Ok(raw) => ContentHash::parse(&raw)
            .map(Some)
            .map_err(|source| StoreError::CorruptSidecar {
                path: path.to_path_buf(),
                source,
            }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io("failed to read hash sidecar", e)),
    }
}

/// Delete staging files and aged lock tombstones in a module directory.
///
/// Only called with the module lock held, so no live writer owns the
/// staging files. A tombstone younger than `stale_after` may still be
/// mid-break and is left for the breaker to link back or delete.
fn sweep_orphans(dir: &Path, stale_after: Duration) -> io::Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let orphan = if is_staging_name(file_name) {
            true
        } else if lock::is_tombstone(file_name, LOCK_FILE) {
            !lock::is_held(&entry.path(), stale_after)?
        } else {
            false
        };
        if orphan && remove_if_exists(&entry.path())? {
            debug!(path = %entry.path().display(), "removed orphan");
            removed += 1;
        }
    }
    Ok(removed)
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
