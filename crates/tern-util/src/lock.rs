//! Advisory exclusive locks on paths.
//!
//! A lock is taken on a sidecar file (`tern.lock.lock`, `.tern-env.lock`)
//! rather than on the protected file itself so atomic renames of the
//! protected file never drop the lock.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock, released when dropped.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock on `lock_path` is acquired.
    pub fn acquire(lock_path: &Path) -> std::io::Result<Self> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()?;
        tracing::debug!(path = %lock_path.display(), "acquired lock");
        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
        })
    }

    /// Acquire the lock if it is free; `Ok(None)` when another holder has it.
    pub fn try_acquire(lock_path: &Path) -> std::io::Result<Option<Self>> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %lock_path.display(), "acquired lock");
                Ok(Some(Self {
                    file,
                    path: lock_path.to_path_buf(),
                }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        tracing::debug!(path = %self.path.display(), "released lock");
    }
}

fn open_lock_file(lock_path: &Path) -> std::io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
}

/// Sidecar lock path for a protected file: `tern.lock` → `tern.lock.lock`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}
