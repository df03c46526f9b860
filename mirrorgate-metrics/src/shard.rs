//! Exclusive per-process shard files.
//!
//! A writer creates its file once, with `create_new`, under a name that embeds
//! the pid and a UUIDv7 so two processes can never pick the same file. Each
//! flush writes the full snapshot to a sibling temp file and renames it over
//! the shard, so readers never observe a partial write.
//!
//! The writer remembers the identity of the metrics directory it was created
//! in. If the directory disappears or is replaced (the supervisor recreating
//! it during a reset), every later flush fails with `MetricsDirMissing`.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use mirrorgate_core::{MirrorError, MirrorResult};
use tracing::{debug, error};
use uuid::Uuid;

use crate::registry::WorkerMetrics;
use crate::snapshot::ShardSnapshot;

pub const SHARD_PREFIX: &str = "shard-";
pub const SHARD_SUFFIX: &str = ".json";
const TEMP_SUFFIX: &str = ".tmp";

/// Whether `name` is a complete shard file (not a temp file).
pub fn is_shard_file_name(name: &str) -> bool {
    name.starts_with(SHARD_PREFIX) && name.ends_with(SHARD_SUFFIX)
}

/// Identity of a directory inode; a recreated directory gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl DirIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(_meta: &Metadata) -> Self {
        Self {}
    }
}

fn dir_identity(dir: &Path) -> Option<DirIdentity> {
    let meta = fs::metadata(dir).ok()?;
    meta.is_dir().then(|| DirIdentity::of(&meta))
}

/// Owner of one shard file.
#[derive(Debug)]
pub struct ShardWriter {
    dir: PathBuf,
    path: PathBuf,
    temp_path: PathBuf,
    identity: DirIdentity,
    pid: u32,
    worker_index: Option<u32>,
    write_lock: Mutex<()>,
}

impl ShardWriter {
    /// Create this process's shard in `dir`.
    ///
    /// The directory must already exist; the supervisor owns its lifecycle.
    pub fn create(dir: impl AsRef<Path>, worker_index: Option<u32>) -> MirrorResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let identity =
            dir_identity(&dir).ok_or_else(|| MirrorError::metrics_dir_missing(&dir))?;

        let pid = std::process::id();
        let name = format!(
            "{}{}-{}{}",
            SHARD_PREFIX,
            pid,
            Uuid::now_v7().simple(),
            SHARD_SUFFIX
        );
        let path = dir.join(&name);
        let temp_path = dir.join(format!("{}{}", name, TEMP_SUFFIX));

        let writer = Self {
            dir,
            path,
            temp_path,
            identity,
            pid,
            worker_index,
            write_lock: Mutex::new(()),
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&writer.path)
            .map_err(|e| {
                error!(path = %writer.path.display(), error = %e, "Failed to create metrics shard");
                MirrorError::metrics_dir_missing(&writer.dir)
            })?;
        writer.write_initial(&mut file)?;

        debug!(path = %writer.path.display(), "Created metrics shard");
        Ok(writer)
    }

    fn write_initial(&self, file: &mut File) -> MirrorResult<()> {
        let snapshot = ShardSnapshot::empty(self.pid, self.worker_index);
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| MirrorError::shard_corrupt(&self.path, e))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_data())
            .map_err(|e| MirrorError::shard_corrupt(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fails with `MetricsDirMissing` if the directory is gone or replaced.
    pub fn check_dir(&self) -> MirrorResult<()> {
        match dir_identity(&self.dir) {
            Some(identity) if identity == self.identity => Ok(()),
            _ => Err(MirrorError::metrics_dir_missing(&self.dir)),
        }
    }

    fn lock(&self) -> MirrorResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| MirrorError::shard_corrupt(&self.path, "shard write lock poisoned"))
    }

    /// Atomically replace the shard with `snapshot`.
    pub fn write(&self, snapshot: &ShardSnapshot) -> MirrorResult<()> {
        let _guard = self.lock()?;
        self.write_locked(snapshot)
    }

    /// Snapshot `metrics` and write it.
    ///
    /// The snapshot is taken under the write lock, so the file left on disk
    /// after concurrent flushes always holds the newest state.
    pub fn flush(&self, metrics: &WorkerMetrics) -> MirrorResult<()> {
        let _guard = self.lock()?;
        let snapshot = ShardSnapshot::capture(self.pid, self.worker_index, &metrics.gather());
        self.write_locked(&snapshot)
    }

    fn write_locked(&self, snapshot: &ShardSnapshot) -> MirrorResult<()> {
        self.check_dir()?;

        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| MirrorError::shard_corrupt(&self.path, e))?;

        let written = fs::write(&self.temp_path, &bytes)
            .and_then(|_| fs::rename(&self.temp_path, &self.path));

        if let Err(e) = written {
            // Distinguish a vanished directory from an ordinary I/O failure.
            self.check_dir()?;
            let _ = fs::remove_file(&self.temp_path);
            return Err(MirrorError::shard_corrupt(&self.path, e));
        }
        Ok(())
    }
}
