/// Core types and structures for the cvise reduction engine
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Verdict of a single interestingness trial.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// The script exited 0: the candidate still exhibits the behavior.
    Interesting,
    /// The script exited nonzero.
    Uninteresting { exit_code: i32 },
    /// The script exceeded its time budget and was killed.
    Timeout,
    /// The trial was abandoned because an earlier state already committed.
    Cancelled,
    /// The script could not be spawned even after retries.
    SpawnError { message: String },
}

/// Fatal error of the reduction run. Pass-level failures are represented by
/// [`PassError`] instead and never abort the whole run.
#[derive(Error, Debug)]
pub enum ReduceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("interestingness script error: {0}")]
    Script(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("process error: {0}")]
    Process(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),
}

/// Result type alias for cvise operations
pub type Result<T> = std::result::Result<T, ReduceError>;

/// Non-fatal failure of a single pass invocation. The scheduler logs these
/// and moves on to the next pass.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("pass bug: {0}")]
    Bug(String),

    #[error("missing external program: {0}")]
    MissingProgram(String),
}

/// Result type alias for pass operations
pub type PassResult<T> = std::result::Result<T, PassError>;

impl From<nix::errno::Errno> for ReduceError {
    fn from(err: nix::errno::Errno) -> Self {
        ReduceError::Process(err.to_string())
    }
}

/// The file under reduction: a byte buffer bound to its canonical on-disk
/// path. Workers only ever see read-only snapshots; the coordinator is the
/// sole mutator, and every mutation goes through [`Fur::commit`].
#[derive(Clone, Debug)]
pub struct Fur {
    path: PathBuf,
    file_name: OsString,
    data: Arc<Vec<u8>>,
}

impl Fur {
    /// Load the file from disk. The path must name a regular file.
    pub fn load(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .ok_or_else(|| ReduceError::Config(format!("not a file: {}", path.display())))?
            .to_os_string();
        let data = std::fs::read(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            data: Arc::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Basename under which sandbox copies are created.
    pub fn file_name(&self) -> &OsString {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Cheap read-only snapshot handed to workers.
    pub fn snapshot(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.data)
    }

    /// Count of non-blank lines, for progress reporting.
    pub fn line_count(&self) -> usize {
        self.data
            .split(|&b| b == b'\n')
            .filter(|line| line.iter().any(|b| !b.is_ascii_whitespace()))
            .count()
    }

    /// Replace the canonical file with a committed variant. The write goes
    /// through a temporary file in the same directory followed by a rename,
    /// so readers never observe a half-written file.
    pub fn commit(&mut self, variant: Vec<u8>) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &variant)?;
        tmp.persist(&self.path)
            .map_err(|e| ReduceError::Io(e.error))?;
        self.data = Arc::new(variant);
        Ok(())
    }

    /// Copy the original input aside before the first commit, unless a
    /// backup already exists from a previous run.
    pub fn backup(&self) -> Result<PathBuf> {
        let mut name = self.file_name.clone();
        name.push(".orig");
        let backup_path = self.path.with_file_name(name);
        if !backup_path.exists() {
            std::fs::copy(&self.path, &backup_path)?;
        }
        Ok(backup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fur_load_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.c");
        std::fs::write(&path, b"int x;\nint y;\n").unwrap();

        let mut fur = Fur::load(&path).unwrap();
        assert_eq!(fur.size(), 14);
        assert_eq!(fur.line_count(), 2);

        fur.commit(b"int y;\n".to_vec()).unwrap();
        assert_eq!(fur.size(), 7);
        assert_eq!(std::fs::read(&path).unwrap(), b"int y;\n");
    }

    #[test]
    fn fur_backup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.c");
        std::fs::write(&path, b"original").unwrap();

        let mut fur = Fur::load(&path).unwrap();
        let backup = fur.backup().unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"original");

        fur.commit(b"reduced".to_vec()).unwrap();
        fur.backup().unwrap();
        assert_eq!(std::fs::read(&backup).unwrap(), b"original");
    }

    #[test]
    fn line_count_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.c");
        std::fs::write(&path, b"a\n\n  \nb\n").unwrap();
        let fur = Fur::load(&path).unwrap();
        assert_eq!(fur.line_count(), 2);
    }
}
