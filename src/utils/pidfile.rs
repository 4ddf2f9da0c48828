//! Single-instance pid file
//!
//! A pid file naming a live process blocks acquisition. Missing, stale or
//! unreadable contents are replaced with the current pid.
//!
//! The file is created by hard-linking a fully written staging file into
//! place, so it never exists half-written and two writers cannot both
//! create it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Attempts to replace a stale file before giving up
const LINK_ATTEMPTS: usize = 3;

/// Pid file errors
#[derive(Error, Debug)]
pub enum PidFileError {
    #[error("pid file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("process {pid} is already running (pid file {})", path.display())]
    Running { pid: i32, path: PathBuf },
}

/// Pid file at a fixed path
#[derive(Clone, Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Pid recorded in the file, if it exists and holds one
    pub fn read(&self) -> Result<Option<i32>, PidFileError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.trim().parse().ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Record the current process, failing if another live process holds
    /// the file
    pub fn write(&self) -> Result<(), PidFileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let own = std::process::id() as i32;
        let staged = self.staged_path(own);
        fs::write(&staged, format!("{own}\n")).map_err(|source| self.io_error(source))?;

        let result = self.link(&staged, own);
        if let Err(error) = fs::remove_file(&staged) {
            debug!(?error, path = %staged.display(), "Failed to remove staged pid file");
        }
        result
    }

    fn link(&self, staged: &Path, own: i32) -> Result<(), PidFileError> {
        for _ in 0..LINK_ATTEMPTS {
            match fs::hard_link(staged, &self.path) {
                Ok(()) => {
                    debug!(pid = own, path = %self.path.display(), "Wrote pid file");
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(source) => return Err(self.io_error(source)),
            }

            match self.read()? {
                Some(pid) if pid == own => return Ok(()),
                Some(pid) if process_alive(pid) => {
                    return Err(PidFileError::Running {
                        pid,
                        path: self.path.clone(),
                    });
                }
                pid => {
                    warn!(?pid, path = %self.path.display(), "Replacing stale pid file");
                    self.remove_file()?;
                }
            }
        }

        Err(self.io_error(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "pid file keeps being recreated",
        )))
    }

    /// Remove the file if it still names the current process
    pub fn remove(&self) -> Result<(), PidFileError> {
        if self.read()? != Some(std::process::id() as i32) {
            return Ok(());
        }
        self.remove_file()
    }

    fn remove_file(&self) -> Result<(), PidFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn staged_path(&self, pid: i32) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{pid}.{:08x}.tmp", rand::random::<u32>()));
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: io::Error) -> PidFileError {
        PidFileError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None::<Signal>) {
        Ok(()) => true,
        // Exists, owned by someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(pid: i32) -> bool {
    pid > 0
}
