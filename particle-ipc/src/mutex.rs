//! Cross-process named mutex guarding the shared client registry
//! (spec.md §4.8).
//!
//! The teacher's own primitives (`parking_lot::Mutex`,
//! `std::sync::Mutex`) only coordinate threads within one process. For a
//! lock that two unrelated processes can both open and contend on, this
//! wraps an advisory `flock(2)` against a well-known file path, the same
//! "name resolves to a filesystem object both sides open independently"
//! pattern the registry and ring mappings themselves use (see
//! `flux-ipc/src/lib.rs`'s `shm_open`-by-name convention).

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};

use particle_core::error::{ParticleError, Result};

/// A named, cross-process mutual-exclusion lock backed by `flock(2)`.
pub struct NamedMutex {
    file: File,
    path: PathBuf,
}

impl NamedMutex {
    /// Open (creating if needed) the lock file backing `name` under `dir`.
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.lock"));
        let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;
        Ok(Self { file, path })
    }

    /// Acquire the lock, blocking until available, and run `f` while held.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        flock(self.file.as_raw_fd(), FlockArg::LockExclusive)
            .map_err(|e| ParticleError::protocol(format!("flock acquire failed: {e}")))?;
        let result = f();
        let _ = flock(self.file.as_raw_fd(), FlockArg::Unlock);
        result
    }

    /// Path of the backing lock file, for diagnostics.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
