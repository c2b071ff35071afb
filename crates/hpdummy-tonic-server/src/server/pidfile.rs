//! PID file written at startup and removed on exit.

use anyhow::Context;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
    removed: bool,
}

impl PidFile {
    /// Writes `<pid>\n` to `path`, replacing any previous file.
    pub fn create(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let pid = std::process::id();
        fs::write(&path, format!("{pid}\n"))
            .with_context(|| format!("error writing PID file {}", path.display()))?;
        tracing::info!(pid, path = %path.display(), "Wrote PID file");
        Ok(Self {
            path,
            pid,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    pub fn remove(mut self) {
        self.remove_inner();
    }

    fn remove_inner(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "Removed PID file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Error removing PID file"),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.remove_inner();
    }
}
