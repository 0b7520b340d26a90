use std::sync::Arc;

use bson::Document;
use imbl::OrdMap;

/// Stable identity of a document within its collection. Assigned once at
/// insert and kept across replacements.
pub type DocId = u64;

/// Documents of one collection in insertion order.
///
/// Clones share structure, so snapshotting a set is cheap and writes to a
/// clone never show through to the original.
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    docs: OrdMap<DocId, Arc<Document>>,
    next: DocId,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document under a fresh id.
    pub fn insert(&mut self, doc: Arc<Document>) -> DocId {
        let id = self.next;
        self.next += 1;
        self.docs.insert(id, doc);
        id
    }

    /// The id the next `insert` will assign.
    pub fn next_id(&self) -> DocId {
        self.next
    }

    /// Swap the document stored under `id`. Returns the previous one.
    pub fn replace(&mut self, id: DocId, doc: Arc<Document>) -> Option<Arc<Document>> {
        if !self.docs.contains_key(&id) {
            return None;
        }
        self.docs.insert(id, doc)
    }

    pub fn remove(&mut self, id: DocId) -> Option<Arc<Document>> {
        self.docs.remove(&id)
    }

    /// Remove the oldest document.
    pub fn pop_front(&mut self) -> Option<Arc<Document>> {
        let first = *self.docs.keys().next()?;
        self.docs.remove(&first)
    }

    pub fn get(&self, id: DocId) -> Option<&Arc<Document>> {
        self.docs.get(&id)
    }

    pub fn first(&self) -> Option<&Arc<Document>> {
        self.docs.iter().next().map(|(_, doc)| doc)
    }

    pub fn last(&self) -> Option<&Arc<Document>> {
        self.docs.iter().next_back().map(|(_, doc)| doc)
    }

    pub fn iter(&self) -> impl Iterator<Item = (DocId, &Arc<Document>)> {
        self.docs.iter().map(|(id, doc)| (*id, doc))
    }

    /// Documents with ids at or above `from`, in order.
    pub fn iter_from(&self, from: DocId) -> impl Iterator<Item = (DocId, &Arc<Document>)> {
        self.docs.range(from..).map(|(id, doc)| (*id, doc))
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.docs.iter().map(|(_, doc)| doc)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn keeps_insertion_order_across_replace() {
        let mut set = DocumentSet::new();
        let a = set.insert(Arc::new(doc! { "n": 1 }));
        set.insert(Arc::new(doc! { "n": 2 }));
        set.replace(a, Arc::new(doc! { "n": 3 }));
        let order: Vec<_> = set.documents().map(|d| d.get_i32("n").unwrap()).collect();
        assert_eq!(order, vec![3, 2]);
    }

    #[test]
    fn clones_are_independent() {
        let mut set = DocumentSet::new();
        set.insert(Arc::new(doc! { "n": 1 }));
        let snapshot = set.clone();
        set.insert(Arc::new(doc! { "n": 2 }));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut set = DocumentSet::new();
        let a = set.insert(Arc::new(doc! {}));
        set.remove(a);
        let b = set.insert(Arc::new(doc! {}));
        assert_ne!(a, b);
        assert!(set.replace(a, Arc::new(doc! {})).is_none());
    }

    #[test]
    fn iter_from_skips_older_ids() {
        let mut set = DocumentSet::new();
        for n in 0..4 {
            set.insert(Arc::new(doc! { "n": n }));
        }
        let ids: Vec<_> = set.iter_from(2).map(|(id, _)| id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn pop_front_removes_oldest() {
        let mut set = DocumentSet::new();
        set.insert(Arc::new(doc! { "n": 1 }));
        set.insert(Arc::new(doc! { "n": 2 }));
        assert_eq!(set.pop_front().unwrap().get_i32("n").unwrap(), 1);
        assert_eq!(set.first().unwrap().get_i32("n").unwrap(), 2);
    }
}
