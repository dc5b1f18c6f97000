//! Cross-process run lock: at most one batch executes at a time.
//!
//! The lock is an exclusive `flock` on a mode-0600 file. The kernel drops it
//! when the holder exits, so a crashed run never leaves the lock held. The
//! file itself stays in place and records the last holder's pid.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::core::errors::{Result, ShrError};

/// Held run lock; released on drop.
pub struct RunLock {
    path: PathBuf,
    #[cfg(unix)]
    _file: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl RunLock {
    /// Take the lock at `path` without waiting. A lock held by another
    /// process is `LockHeld`.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ShrError::io(parent, source))?;
        }

        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create(true).truncate(false);
        #[cfg(unix)]
        opts.mode(0o600);
        let file = opts.open(path).map_err(|source| ShrError::io(path, source))?;

        let mut file = lock_file(path, file)?;
        if let Err(e) = file
            .set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
        {
            eprintln!("[SHR-LOCK] could not record holder in {}: {e}", path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for RunLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLock").field("path", &self.path).finish()
    }
}

#[cfg(unix)]
fn lock_file(path: &Path, file: File) -> Result<nix::fcntl::Flock<File>> {
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_file, errno)| {
        if errno == Errno::EWOULDBLOCK {
            ShrError::LockHeld {
                path: path.to_path_buf(),
            }
        } else {
            ShrError::Runtime {
                details: format!("failed to lock {}: {errno}", path.display()),
            }
        }
    })
}

#[cfg(not(unix))]
fn lock_file(_path: &Path, file: File) -> Result<File> {
    Ok(file)
}
