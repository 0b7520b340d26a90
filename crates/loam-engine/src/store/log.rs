use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use loam_store::FrameLog;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::EngineError;
use crate::store::Store;
use crate::store::codec::{self, Image};

const DEFAULT_COMPACTION_FRAMES: usize = 64;

/// Appends one frame per commit holding only the namespaces that changed.
///
/// Once the log holds `compaction_frames` frames it is rewritten as a
/// single frame with the full catalog.
pub struct LogStore {
    path: PathBuf,
    compaction_frames: usize,
    state: Mutex<State>,
}

struct State {
    log: FrameLog,
    /// The catalog the log currently replays to.
    last: Catalog,
}

impl LogStore {
    /// Open the log at `path`, creating it if needed, and replay it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        let (log, frames) = FrameLog::open(&path)?;

        let mut last = Catalog::new();
        for frame in &frames {
            Image::decode(frame)?.apply(&mut last)?;
        }
        info!(
            path = %path.display(),
            frames = frames.len(),
            namespaces = last.len(),
            "replayed catalog log"
        );

        Ok(Self {
            path,
            compaction_frames: DEFAULT_COMPACTION_FRAMES,
            state: Mutex::new(State { log, last }),
        })
    }

    /// Rewrite the log once it reaches `frames` frames. Zero is treated as one.
    pub fn with_compaction_frames(mut self, frames: usize) -> Self {
        self.compaction_frames = frames.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames currently in the log.
    pub fn frames(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .log
            .frames()
    }
}

impl Store for LogStore {
    fn load(&self) -> Result<Catalog, EngineError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.last.clone())
    }

    fn store(&self, catalog: &Catalog) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.log.frames() + 1 >= self.compaction_frames {
            let bytes = codec::encode(catalog)?;
            state.log.rewrite(&bytes)?;
            debug!(path = %self.path.display(), bytes = bytes.len(), "compacted catalog log");
        } else {
            let delta = Image::delta(&state.last, catalog)?;
            if delta.is_empty() {
                return Ok(());
            }
            let bytes = delta.encode()?;
            state.log.append(&bytes)?;
            debug!(
                path = %self.path.display(),
                bytes = bytes.len(),
                frames = state.log.frames(),
                "appended catalog frame"
            );
        }
        state.last = catalog.clone();
        Ok(())
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStore")
            .field("path", &self.path)
            .field("compaction_frames", &self.compaction_frames)
            .finish()
    }
}
