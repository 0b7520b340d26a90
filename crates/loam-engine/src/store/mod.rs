mod codec;
mod file;
mod log;
mod memory;

pub use file::FileStore;
pub use log::LogStore;
pub use memory::MemoryStore;

use crate::catalog::Catalog;
use crate::error::EngineError;

/// Durable home of the catalog.
///
/// `store` runs under the engine's commit lock with the catalog about to
/// become live. An error aborts the commit and leaves the live catalog as it
/// was.
pub trait Store: Send + Sync {
    /// The catalog as last stored, or an empty one.
    fn load(&self) -> Result<Catalog, EngineError>;

    fn store(&self, catalog: &Catalog) -> Result<(), EngineError>;
}
