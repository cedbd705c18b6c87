/// Scoped temporary working directories for speculative trials
use crate::types::{ReduceError, Result};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

/// Prefix shared by every directory the engine creates. `--tidy` removes
/// residue from crashed runs by matching this prefix.
pub const TEMP_PREFIX: &str = "cvise-";

/// Creates sandbox directories under a common root. Shared by all workers;
/// directory names carry the run id and a monotonic counter so concurrent
/// runs never collide and leftovers are attributable.
pub struct SandboxFactory {
    root: PathBuf,
    run_id: String,
    file_name: OsString,
    counter: AtomicU64,
}

/// One trial's working directory. Holds a copy of the file under reduction
/// with its original basename; the interestingness script runs with this
/// directory as CWD. Dropping the sandbox removes the whole tree.
pub struct Sandbox {
    dir: TempDir,
    file_path: PathBuf,
}

impl SandboxFactory {
    /// `root` defaults to the system temp directory (honoring `TMPDIR`).
    pub fn new(root: Option<PathBuf>, file_name: OsString) -> Result<Self> {
        let root = root.unwrap_or_else(std::env::temp_dir);
        if !root.is_dir() {
            return Err(ReduceError::Sandbox(format!(
                "sandbox root is not a directory: {}",
                root.display()
            )));
        }
        let run_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Ok(Self {
            root,
            run_id,
            file_name,
            counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh sandbox holding `contents` under the canonical
    /// basename. Creation failure is fatal: it means the temp filesystem is
    /// broken or full, and every subsequent trial would fail the same way.
    pub fn acquire(&self, contents: &[u8]) -> Result<Sandbox> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let dir = tempfile::Builder::new()
            .prefix(&format!("{}{}-{}-", TEMP_PREFIX, self.run_id, seq))
            .tempdir_in(&self.root)
            .map_err(|e| ReduceError::Sandbox(format!("failed to create sandbox: {e}")))?;
        let file_path = dir.path().join(&self.file_name);
        std::fs::write(&file_path, contents)?;
        debug!("created sandbox {}", dir.path().display());
        Ok(Sandbox { dir, file_path })
    }
}

impl Sandbox {
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the sandbox copy of the file under reduction.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Disarm cleanup and leave the directory on disk (`--save-temps`).
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }

    /// Remove the directory now. Removal failure is logged, not fatal.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("failed to remove sandbox {}: {e}", path.display());
        }
    }
}

/// Remove residual temp directories from this or previous runs. Only
/// directories carrying the engine prefix are touched.
pub fn tidy(root: Option<PathBuf>) -> Result<usize> {
    let root = root.unwrap_or_else(std::env::temp_dir);
    let mut removed = 0;
    for entry in std::fs::read_dir(&root)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(TEMP_PREFIX) || !entry.path().is_dir() {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                info!("removed {}", entry.path().display());
                removed += 1;
            }
            Err(e) => warn!("failed to remove {}: {e}", entry.path().display()),
        }
    }
    Ok(removed)
}
