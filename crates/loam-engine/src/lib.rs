//! An embedded, Mongo-compatible document engine.
//!
//! Collections live in an immutable [`Catalog`]. A [`Transaction`] works on
//! a private clone and commit swaps it in as the live catalog after the
//! [`Store`] has persisted it. Every write also appends change events to the
//! oplog, which [`Stream`]s follow.

mod catalog;
mod collection;
mod config;
mod context;
mod engine;
mod error;
mod handle;
mod index;
mod oplog;
mod options;
mod semaphore;
mod set;
mod store;
mod stream;
mod sweep;
mod transaction;

pub use catalog::Catalog;
pub use collection::{Change, Collection, WriteResult};
pub use config::EngineConfig;
pub use context::{Canceller, Context};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind};
pub use handle::Handle;
pub use index::{ID_INDEX, Index, IndexConfig, canonical_name};
pub use oplog::token_ts;
pub use options::{DeleteOptions, FindOptions, Operation, ReplaceOptions, UpdateOptions};
pub use semaphore::Semaphore;
pub use set::{DocId, DocumentSet};
pub use store::{FileStore, LogStore, MemoryStore, Store};
pub use stream::{Scope, Stream, StreamOptions};
pub use transaction::Transaction;
