use std::path::{Path, PathBuf};

use loam_store::SnapshotFile;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::EngineError;
use crate::store::Store;
use crate::store::codec;

/// Writes the whole catalog to one file on every commit.
///
/// The file is replaced atomically, so a crash leaves either the previous
/// or the new snapshot.
#[derive(Debug)]
pub struct FileStore {
    file: SnapshotFile,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: SnapshotFile::new(path),
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Store for FileStore {
    fn load(&self) -> Result<Catalog, EngineError> {
        match self.file.read()? {
            Some(bytes) => {
                let catalog = codec::decode(&bytes)?;
                info!(
                    path = %self.path().display(),
                    bytes = bytes.len(),
                    namespaces = catalog.len(),
                    "loaded snapshot"
                );
                Ok(catalog)
            }
            None => Ok(Catalog::new()),
        }
    }

    fn store(&self, catalog: &Catalog) -> Result<(), EngineError> {
        let bytes = codec::encode(catalog)?;
        self.file.write(&bytes)?;
        debug!(path = %self.path().display(), bytes = bytes.len(), "wrote snapshot");
        Ok(())
    }
}
