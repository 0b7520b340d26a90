use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::atomic::write_atomic;
use crate::error::StoreError;

/// A single file holding one serialized snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, or `None` if it was never written.
    pub fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                debug!(path = %self.path.display(), bytes = bytes.len(), "read snapshot");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, bytes: &[u8]) -> Result<(), StoreError> {
        write_atomic(&self.path, bytes)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "wrote snapshot");
        Ok(())
    }
}
