use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::catalog::Catalog;
use crate::error::EngineError;
use crate::store::Store;

/// Keeps the last stored catalog in memory. Nothing survives the process.
#[derive(Debug)]
pub struct MemoryStore {
    catalog: ArcSwap<Catalog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            catalog: ArcSwap::from_pointee(Catalog::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<Catalog, EngineError> {
        Ok((**self.catalog.load()).clone())
    }

    fn store(&self, catalog: &Catalog) -> Result<(), EngineError> {
        // Cloning copies the namespace map; collections stay shared.
        self.catalog.store(Arc::new(catalog.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::handle::Handle;

    #[test]
    fn load_returns_last_stored() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_empty());

        let mut catalog = Catalog::new();
        catalog
            .collection_mut(&Handle::new("db", "c"))
            .insert(doc! { "_id": 1 })
            .unwrap();
        store.store(&catalog).unwrap();

        let loaded = store.load().unwrap();
        assert!(loaded.shares(&catalog, &Handle::new("db", "c")));
    }
}
