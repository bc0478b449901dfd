//! Completion sentinel shared between a target process and the harness

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

/// Content written into the sentinel file
pub const SENTINEL_CONTENT: &str = "OK";

/// A file whose presence means the target finished its step script
#[derive(Debug, Clone)]
pub struct SentinelChannel {
    path: PathBuf,
}

impl SentinelChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove a stale sentinel. Missing is fine.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed sentinel {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Signal completion. The file appears atomically via rename.
    pub fn signal(&self) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&tmp, SENTINEL_CONTENT)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Signalled sentinel {}", self.path.display());
        Ok(())
    }

    pub fn is_signalled(&self) -> bool {
        self.path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = SentinelChannel::new(dir.path().join("case_test_complete"));

        assert!(!sentinel.is_signalled());
        sentinel.clear().unwrap();

        sentinel.signal().unwrap();
        assert!(sentinel.is_signalled());
        assert_eq!(std::fs::read_to_string(sentinel.path()).unwrap(), "OK");

        sentinel.clear().unwrap();
        assert!(!sentinel.is_signalled());
    }
}
