use std::collections::BTreeSet;
use std::sync::Arc;

use imbl::OrdMap;

use crate::collection::Collection;
use crate::handle::Handle;

/// A point-in-time view of every namespace.
///
/// Collections sit behind `Arc`, so cloning a catalog copies only the map;
/// a collection is cloned the first time a write reaches it.
#[derive(Debug, Clone)]
pub struct Catalog {
    namespaces: OrdMap<Handle, Arc<Collection>>,
    oplog: Arc<Collection>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// An empty catalog holding only the oplog.
    pub fn new() -> Self {
        Self {
            namespaces: OrdMap::new(),
            oplog: Arc::new(Collection::bare()),
        }
    }

    pub fn get(&self, handle: &Handle) -> Option<&Arc<Collection>> {
        if handle.is_oplog() {
            return Some(&self.oplog);
        }
        self.namespaces.get(handle)
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.get(handle).is_some()
    }

    /// User namespaces in handle order. The oplog is not included.
    pub fn iter(&self) -> impl Iterator<Item = (&Handle, &Arc<Collection>)> {
        self.namespaces.iter()
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn oplog(&self) -> &Arc<Collection> {
        &self.oplog
    }

    /// Distinct database names in order.
    pub fn databases(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self.namespaces.keys().map(|h| h.db.as_str()).collect();
        names.into_iter().collect()
    }

    /// Collections of database `db` in name order.
    pub fn collections<'a>(
        &'a self,
        db: &'a str,
    ) -> impl Iterator<Item = (&'a Handle, &'a Arc<Collection>)> + 'a {
        self.namespaces.iter().filter(move |(h, _)| h.db == db)
    }

    /// The collection at `handle`, created empty if missing and cloned if
    /// shared with another catalog.
    pub(crate) fn collection_mut(&mut self, handle: &Handle) -> &mut Collection {
        if handle.is_oplog() {
            return Arc::make_mut(&mut self.oplog);
        }
        let entry = self
            .namespaces
            .entry(handle.clone())
            .or_insert_with(|| Arc::new(Collection::new()));
        Arc::make_mut(entry)
    }

    pub(crate) fn insert(&mut self, handle: Handle, collection: Arc<Collection>) {
        if handle.is_oplog() {
            self.oplog = collection;
        } else {
            self.namespaces.insert(handle, collection);
        }
    }

    pub(crate) fn remove(&mut self, handle: &Handle) -> Option<Arc<Collection>> {
        self.namespaces.remove(handle)
    }

    /// Whether `handle` refers to the same collection instance in both
    /// catalogs, meaning no write reached it in between.
    pub(crate) fn shares(&self, other: &Catalog, handle: &Handle) -> bool {
        match (self.get(handle), other.get(handle)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn clones_share_until_written() {
        let handle = Handle::new("db", "c");
        let mut base = Catalog::new();
        base.collection_mut(&handle).insert(doc! { "_id": 1 }).unwrap();

        let mut next = base.clone();
        assert!(next.shares(&base, &handle));
        next.collection_mut(&handle).insert(doc! { "_id": 2 }).unwrap();
        assert!(!next.shares(&base, &handle));
        assert_eq!(base.get(&handle).unwrap().len(), 1);
        assert_eq!(next.get(&handle).unwrap().len(), 2);
    }

    #[test]
    fn lists_databases_and_collections() {
        let mut catalog = Catalog::new();
        catalog.collection_mut(&Handle::new("b", "x"));
        catalog.collection_mut(&Handle::new("a", "y"));
        catalog.collection_mut(&Handle::new("a", "x"));
        assert_eq!(catalog.databases(), vec!["a", "b"]);
        let names: Vec<_> = catalog.collections("a").map(|(h, _)| h.coll.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert!(catalog.contains(&Handle::oplog()));
        assert_eq!(catalog.len(), 3);
    }
}
