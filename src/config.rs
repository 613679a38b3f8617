//! Host configuration.
//!
//! Sourced from the CLI argument (root directory) and a small set of
//! environment variables, the way the teacher's `RendererSettings` is a
//! plain struct with a `Default` impl rather than a heavyweight config
//! crate.

use std::path::{Path, PathBuf};

use crate::errors::{BeamerError, Result};

const DEFAULT_PORT: u16 = 4444;

/// Process-wide configuration resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Canonicalized root node directory.
    pub root_dir: PathBuf,
    /// Local name of the root node (the directory's leaf).
    pub root_name: String,
    /// Port shared by the datagram and stream listeners, bound on all
    /// interfaces.
    pub port: u16,
    /// Whether the window provider should start fullscreen.
    pub fullscreen: bool,
}

impl Config {
    /// Resolves configuration from a root-directory argument and the
    /// process environment (`INFOBEAMER_PORT`, `INFOBEAMER_FULLSCREEN`).
    pub fn resolve(root_arg: impl AsRef<Path>) -> Result<Self> {
        let canonical = root_arg.as_ref().canonicalize()?;
        let root_name = canonical
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BeamerError::InvalidLeafName(canonical.display().to_string()))?
            .to_string();

        let port = std::env::var("INFOBEAMER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let fullscreen = std::env::var("INFOBEAMER_FULLSCREEN")
            .map(|v| v != "0" && !v.is_empty())
            .unwrap_or(false);

        Ok(Self {
            root_dir: canonical,
            root_name,
            port,
            fullscreen,
        })
    }

    /// The directory a watcher should be installed on to observe the root
    /// node's own content changes (the root directory itself).
    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The directory that becomes the process's working directory: the
    /// root's parent, so the root node's canonical path is just its name.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        self.root_dir.parent().unwrap_or(Path::new("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_sets_name_from_leaf() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::resolve(dir.path()).unwrap();
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert!(!cfg.fullscreen);
        assert_eq!(cfg.root_dir, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn resolve_reads_port_from_env() {
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: test runs single-threaded within this process's test harness
        // slot; no concurrent env access in this crate's test suite.
        unsafe { std::env::set_var("INFOBEAMER_PORT", "5555") };
        let cfg = Config::resolve(dir.path()).unwrap();
        assert_eq!(cfg.port, 5555);
        unsafe { std::env::remove_var("INFOBEAMER_PORT") };
    }
}
