//! File primitives for durable catalogs: atomic replacement, whole-file
//! snapshots and an append-only frame log.

mod atomic;
mod error;
mod log;
mod snapshot;

pub use atomic::{temp_path, write_atomic};
pub use error::StoreError;
pub use log::FrameLog;
pub use snapshot::SnapshotFile;
