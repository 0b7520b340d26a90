//! A collection: a document set and the indexes kept over it.
//!
//! Every public mutation runs against a clone and only replaces `self` on
//! success, so a failed write leaves the collection exactly as it was.

use std::collections::BTreeMap;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use loam_query::{Changes, apply, compare_by, equal, extract, matches, parse_sort, put};

use crate::error::{EngineError, invalid};
use crate::index::{Index, IndexConfig};
use crate::set::{DocId, DocumentSet};

/// A document-level change made by a write, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(Arc<Document>),
    Replace(Arc<Document>),
    Update(Arc<Document>, Changes),
    /// The `_id` of the removed document.
    Delete(Bson),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteResult {
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    /// `_id` of a document added by an insert.
    pub inserted: Option<Bson>,
    /// `_id` of a document added by an upsert.
    pub upserted: Option<Bson>,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone)]
pub struct Collection {
    docs: DocumentSet,
    indexes: BTreeMap<String, Index>,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    /// An empty user collection carrying the `_id_` index.
    pub fn new() -> Self {
        let primary = Index::primary();
        Self {
            docs: DocumentSet::new(),
            indexes: BTreeMap::from([(primary.name().to_string(), primary)]),
        }
    }

    /// A collection without any index, used for the oplog.
    pub(crate) fn bare() -> Self {
        Self {
            docs: DocumentSet::new(),
            indexes: BTreeMap::new(),
        }
    }

    /// Rebuild a collection from persisted documents and index definitions.
    pub(crate) fn restore(
        documents: Vec<Document>,
        indexes: Vec<(String, IndexConfig)>,
    ) -> Result<Collection, EngineError> {
        let mut coll = Collection::bare();
        for doc in documents {
            coll.docs.insert(Arc::new(doc));
        }
        for (name, config) in indexes {
            let mut index = Index::new(Some(&name), config)?;
            index.build(coll.docs.iter().map(|(id, doc)| (id, doc.as_ref())))?;
            coll.indexes.insert(name, index);
        }
        Ok(coll)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.docs.documents()
    }

    pub fn set(&self) -> &DocumentSet {
        &self.docs
    }

    /// Indexes ordered by name.
    pub fn indexes(&self) -> impl Iterator<Item = &Index> {
        self.indexes.values()
    }

    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.get(name)
    }

    // ── Reads ───────────────────────────────────────────────────

    /// Documents matching `query`, sorted, then with `skip` and `limit`
    /// applied to the matches.
    pub fn find(
        &self,
        query: &Document,
        sort: Option<&Document>,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(DocId, Arc<Document>)>, EngineError> {
        let keys = match sort {
            Some(sort) => parse_sort(sort)?,
            None => Vec::new(),
        };
        matches(&Document::new(), query)?;

        let wanted = limit.map(|l| skip.saturating_add(l));
        let mut found = Vec::new();
        for (id, doc) in self.docs.iter() {
            if !matches(doc, query)? {
                continue;
            }
            found.push((id, Arc::clone(doc)));
            if keys.is_empty() && wanted.is_some_and(|w| found.len() >= w) {
                break;
            }
        }
        if !keys.is_empty() {
            found.sort_by(|a, b| compare_by(&a.1, &b.1, &keys));
        }
        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    // ── Writes ──────────────────────────────────────────────────

    fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Collection) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut next = self.clone();
        let out = f(&mut next)?;
        *self = next;
        Ok(out)
    }

    fn index_add(&mut self, id: DocId, doc: &Document) -> Result<(), EngineError> {
        for index in self.indexes.values_mut() {
            if !index.add(id, doc)? {
                return Err(index.duplicate(doc));
            }
        }
        Ok(())
    }

    fn index_remove(&mut self, id: DocId, doc: &Document) -> Result<(), EngineError> {
        for index in self.indexes.values_mut() {
            index.remove(id, doc)?;
        }
        Ok(())
    }

    /// Insert `doc`, generating an ObjectId `_id` when it has none.
    pub fn insert(&mut self, doc: Document) -> Result<WriteResult, EngineError> {
        self.transact(|c| c.insert_one(doc))
    }

    fn insert_one(&mut self, mut doc: Document) -> Result<WriteResult, EngineError> {
        check_fields(&doc)?;
        if !doc.contains_key("_id") {
            put(&mut doc, "_id", Bson::ObjectId(ObjectId::new()), true)?;
        }
        let id = self.docs.next_id();
        self.index_add(id, &doc)?;
        let doc = Arc::new(doc);
        self.docs.insert(Arc::clone(&doc));
        Ok(WriteResult {
            inserted: doc.get("_id").cloned(),
            changes: vec![Change::Insert(doc)],
            ..Default::default()
        })
    }

    /// Replace the first document matching `query`. `_id` must be absent
    /// from `replacement` or equal to the existing one.
    pub fn replace(
        &mut self,
        query: &Document,
        replacement: &Document,
        sort: Option<&Document>,
    ) -> Result<WriteResult, EngineError> {
        check_replacement(replacement)?;
        let Some((id, old)) = self.find(query, sort, 0, Some(1))?.pop() else {
            return Ok(WriteResult::default());
        };
        self.transact(|c| {
            let mut doc = replacement.clone();
            if let Some(existing) = old.get("_id") {
                match doc.get("_id") {
                    Some(given) if !equal(given, existing) => {
                        return Err(invalid("the _id field cannot be changed"));
                    }
                    Some(_) => {
                        doc.insert("_id", existing.clone());
                    }
                    None => {
                        put(&mut doc, "_id", existing.clone(), true)?;
                    }
                }
            }
            let mut result = WriteResult {
                matched: 1,
                ..Default::default()
            };
            if doc == *old {
                return Ok(result);
            }
            c.index_remove(id, &old)?;
            c.index_add(id, &doc)?;
            let doc = Arc::new(doc);
            c.docs.replace(id, Arc::clone(&doc));
            result.modified = 1;
            result.changes.push(Change::Replace(doc));
            Ok(result)
        })
    }

    /// Apply `update` to up to `limit` matching documents.
    pub fn update(
        &mut self,
        query: &Document,
        update: &Document,
        sort: Option<&Document>,
        limit: Option<usize>,
        array_filters: &[Document],
    ) -> Result<WriteResult, EngineError> {
        let found = self.find(query, sort, 0, limit)?;
        self.transact(|c| {
            let mut updated = Vec::new();
            for (id, old) in &found {
                let mut doc = (**old).clone();
                let changes = apply(&mut doc, update, false, array_filters)?;
                if doc.get("_id") != old.get("_id") {
                    return Err(invalid("the _id field cannot be changed"));
                }
                if doc != **old {
                    updated.push((*id, old, doc, changes));
                }
            }

            for (id, old, _, _) in &updated {
                c.index_remove(*id, old)?;
            }
            let mut result = WriteResult {
                matched: found.len() as u64,
                modified: updated.len() as u64,
                ..Default::default()
            };
            for (id, _, doc, changes) in updated {
                c.index_add(id, &doc)?;
                let doc = Arc::new(doc);
                c.docs.replace(id, Arc::clone(&doc));
                result.changes.push(Change::Update(doc, changes));
            }
            Ok(result)
        })
    }

    /// Insert a document derived from the equalities in `query`, either
    /// replaced by `replacement` or modified by `update`.
    pub fn upsert(
        &mut self,
        query: &Document,
        replacement: Option<&Document>,
        update: Option<&Document>,
        array_filters: &[Document],
    ) -> Result<WriteResult, EngineError> {
        let base = extract(query)?;
        let doc = match (replacement, update) {
            (Some(replacement), None) => {
                check_replacement(replacement)?;
                let mut doc = replacement.clone();
                match (base.get("_id"), doc.get("_id")) {
                    (Some(queried), Some(given)) if !equal(queried, given) => {
                        return Err(invalid("the _id in the query and the replacement differ"));
                    }
                    (Some(queried), None) => {
                        put(&mut doc, "_id", queried.clone(), true)?;
                    }
                    _ => {}
                }
                doc
            }
            (None, Some(update)) => {
                let mut doc = base.clone();
                apply(&mut doc, update, true, array_filters)?;
                if let Some(queried) = base.get("_id") {
                    if doc.get("_id") != Some(queried) {
                        return Err(invalid("the _id field cannot be changed"));
                    }
                }
                doc
            }
            _ => return Err(invalid("an upsert takes exactly one of a replacement or an update")),
        };
        let mut result = self.insert(doc)?;
        result.upserted = result.inserted.take();
        Ok(result)
    }

    /// Remove up to `limit` matching documents.
    pub fn delete(
        &mut self,
        query: &Document,
        sort: Option<&Document>,
        limit: Option<usize>,
    ) -> Result<WriteResult, EngineError> {
        let ids: Vec<DocId> = self
            .find(query, sort, 0, limit)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        self.delete_ids(&ids)
    }

    /// Remove the documents stored under `ids`. Unknown ids are ignored.
    pub(crate) fn delete_ids(&mut self, ids: &[DocId]) -> Result<WriteResult, EngineError> {
        self.transact(|c| {
            let mut result = WriteResult::default();
            for &id in ids {
                let Some(doc) = c.docs.get(id).cloned() else {
                    continue;
                };
                c.index_remove(id, &doc)?;
                c.docs.remove(id);
                result.matched += 1;
                result.deleted += 1;
                result
                    .changes
                    .push(Change::Delete(doc.get("_id").cloned().unwrap_or(Bson::Null)));
            }
            Ok(result)
        })
    }

    // ── Indexes ─────────────────────────────────────────────────

    /// Build and register an index. Re-creating an identical index is a
    /// no-op; a failed build registers nothing.
    pub fn create_index(
        &mut self,
        name: Option<&str>,
        config: IndexConfig,
    ) -> Result<String, EngineError> {
        let mut index = Index::new(name, config)?;
        let name = index.name().to_string();
        if let Some(existing) = self.indexes.get(&name) {
            if existing.config() == index.config() {
                return Ok(name);
            }
            return Err(EngineError::Constraint(format!(
                "index '{name}' already exists with different options"
            )));
        }
        if let Some(existing) = self
            .indexes
            .values()
            .find(|i| i.config().key == index.config().key)
        {
            return Err(EngineError::Constraint(format!(
                "index '{}' already covers key {}",
                existing.name(),
                index.config().key
            )));
        }
        index.build(self.docs.iter().map(|(id, doc)| (id, doc.as_ref())))?;
        self.indexes.insert(name.clone(), index);
        Ok(name)
    }

    /// Drop an index by name, or every index but `_id_` when `name` is empty.
    pub fn drop_index(&mut self, name: &str) -> Result<(), EngineError> {
        match name {
            "" => {
                self.indexes.retain(|n, _| n == crate::index::ID_INDEX);
                Ok(())
            }
            crate::index::ID_INDEX => Err(invalid("cannot drop the _id_ index")),
            _ => match self.indexes.remove(name) {
                Some(_) => Ok(()),
                None => Err(EngineError::NotFound(format!("index '{name}'"))),
            },
        }
    }

    // ── Oplog ───────────────────────────────────────────────────

    pub(crate) fn append(&mut self, event: Document) {
        self.docs.insert(Arc::new(event));
    }

    /// Drop the oldest documents until at most `max` remain.
    pub(crate) fn trim(&mut self, max: usize) {
        while self.docs.len() > max {
            self.docs.pop_front();
        }
    }
}

fn check_fields(doc: &Document) -> Result<(), EngineError> {
    if let Some(key) = doc.keys().find(|k| k.starts_with('$')) {
        return Err(invalid(format!("field names cannot start with '$': '{key}'")));
    }
    match doc.get("_id") {
        Some(Bson::Array(_)) => Err(invalid("_id cannot be an array")),
        Some(Bson::RegularExpression(_)) => Err(invalid("_id cannot be a regex")),
        Some(Bson::Undefined) => Err(invalid("_id cannot be undefined")),
        _ => Ok(()),
    }
}

fn check_replacement(doc: &Document) -> Result<(), EngineError> {
    if doc.keys().any(|k| k.starts_with('$')) {
        return Err(invalid("a replacement document cannot contain update operators"));
    }
    check_fields(doc)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;
    use crate::index::ID_INDEX;

    fn seeded() -> Collection {
        let mut coll = Collection::new();
        coll.insert(doc! { "_id": "a", "x": 1 }).unwrap();
        coll.insert(doc! { "_id": "b", "x": 2 }).unwrap();
        coll.insert(doc! { "_id": "c", "x": 3 }).unwrap();
        coll
    }

    fn ids(found: Vec<(DocId, Arc<Document>)>) -> Vec<String> {
        found
            .iter()
            .map(|(_, d)| d.get_str("_id").unwrap().to_string())
            .collect()
    }

    #[test]
    fn find_filters_then_skips_then_limits() {
        let coll = seeded();
        let found = coll.find(&doc! { "x": { "$gte": 2 } }, None, 0, None).unwrap();
        assert_eq!(ids(found), vec!["b", "c"]);
        let found = coll.find(&doc! { "x": { "$gte": 2 } }, None, 1, Some(1)).unwrap();
        assert_eq!(ids(found), vec!["c"]);
        let found = coll
            .find(&doc! {}, Some(&doc! { "x": -1 }), 0, Some(2))
            .unwrap();
        assert_eq!(ids(found), vec!["c", "b"]);
    }

    #[test]
    fn insert_generates_id_first() {
        let mut coll = Collection::new();
        let result = coll.insert(doc! { "a": 1 }).unwrap();
        let doc = coll.documents().next().unwrap();
        assert_eq!(doc.keys().next().map(String::as_str), Some("_id"));
        assert!(matches!(result.inserted, Some(Bson::ObjectId(_))));
    }

    #[test]
    fn duplicate_id_leaves_collection_unchanged() {
        let mut coll = seeded();
        let err = coll.insert(doc! { "_id": "a", "x": 9 }).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { .. }));
        assert_eq!(coll.len(), 3);
        assert_eq!(coll.index(ID_INDEX).unwrap().len(), 3);
    }

    #[test]
    fn rejects_invalid_documents() {
        let mut coll = Collection::new();
        assert!(coll.insert(doc! { "$set": 1 }).is_err());
        assert!(coll.insert(doc! { "_id": [1] }).is_err());
        assert!(coll.is_empty());
    }

    #[test]
    fn replace_keeps_id_and_position() {
        let mut coll = seeded();
        let result = coll.replace(&doc! { "_id": "b" }, &doc! { "y": 1 }, None).unwrap();
        assert_eq!((result.matched, result.modified), (1, 1));
        let docs: Vec<_> = coll.documents().map(|d| (**d).clone()).collect();
        assert_eq!(docs[1], doc! { "_id": "b", "y": 1 });

        let err = coll
            .replace(&doc! { "_id": "b" }, &doc! { "_id": "z" }, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let result = coll.replace(&doc! { "_id": "nope" }, &doc! { "y": 1 }, None).unwrap();
        assert_eq!(result, WriteResult::default());
    }

    #[test]
    fn update_reports_changes_and_skips_noops() {
        let mut coll = seeded();
        let result = coll
            .update(&doc! {}, &doc! { "$set": { "x": 2 } }, None, None, &[])
            .unwrap();
        assert_eq!((result.matched, result.modified), (3, 2));
        assert_eq!(result.changes.len(), 2);

        let err = coll
            .update(&doc! { "_id": "a" }, &doc! { "$set": { "_id": "q" } }, None, None, &[])
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn update_swapping_unique_values_succeeds() {
        let mut coll = Collection::new();
        coll.create_index(None, IndexConfig::new(doc! { "k": 1 }).unique())
            .unwrap();
        coll.insert(doc! { "_id": 1, "k": 1 }).unwrap();
        coll.insert(doc! { "_id": 2, "k": 2 }).unwrap();
        let result = coll
            .update(&doc! {}, &doc! { "$inc": { "k": 1 } }, None, None, &[])
            .unwrap();
        assert_eq!(result.modified, 2);

        let err = coll
            .update(&doc! { "_id": 1 }, &doc! { "$set": { "k": 3 } }, None, None, &[])
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { .. }));
        assert_eq!(coll.documents().next().unwrap().get_i32("k").unwrap(), 2);
    }

    #[test]
    fn upsert_from_query_equalities() {
        let mut coll = Collection::new();
        let result = coll
            .upsert(
                &doc! { "a": "x", "b": { "$gt": 0 } },
                None,
                Some(&doc! { "$set": { "c": 1 } }),
                &[],
            )
            .unwrap();
        assert!(result.upserted.is_some());
        let mut doc = (**coll.documents().next().unwrap()).clone();
        doc.remove("_id");
        assert_eq!(doc, doc! { "a": "x", "c": 1 });

        let result = coll
            .upsert(&doc! { "_id": 7 }, Some(&doc! { "z": 1 }), None, &[])
            .unwrap();
        assert_eq!(result.upserted, Some(Bson::Int32(7)));
        assert!(
            coll.upsert(&doc! { "_id": 8 }, Some(&doc! { "_id": 9 }), None, &[])
                .is_err()
        );
        assert!(coll.upsert(&doc! {}, None, None, &[]).is_err());
    }

    #[test]
    fn insert_then_delete_restores_state() {
        let mut coll = seeded();
        coll.create_index(None, IndexConfig::new(doc! { "x": 1 })).unwrap();
        let before: Vec<_> = coll.documents().cloned().collect();

        coll.insert(doc! { "_id": "d", "x": 4 }).unwrap();
        let result = coll.delete(&doc! { "_id": "d" }, None, None).unwrap();
        assert_eq!(result.deleted, 1);
        assert_eq!(result.changes, vec![Change::Delete(Bson::String("d".into()))]);

        let after: Vec<_> = coll.documents().cloned().collect();
        assert_eq!(before, after);
        for index in coll.indexes() {
            assert_eq!(index.len(), 3);
        }
    }

    #[test]
    fn delete_honours_sort_and_limit() {
        let mut coll = seeded();
        coll.delete(&doc! {}, Some(&doc! { "x": -1 }), Some(1)).unwrap();
        let left: Vec<_> = coll.documents().map(|d| d.get_str("_id").unwrap().to_string()).collect();
        assert_eq!(left, vec!["a", "b"]);
    }

    #[test]
    fn create_index_rules() {
        let mut coll = seeded();
        let name = coll.create_index(None, IndexConfig::new(doc! { "x": 1 })).unwrap();
        assert_eq!(name, "x_1");
        assert_eq!(coll.create_index(None, IndexConfig::new(doc! { "x": 1 })).unwrap(), "x_1");
        assert!(matches!(
            coll.create_index(None, IndexConfig::new(doc! { "x": 1 }).unique()),
            Err(EngineError::Constraint(_))
        ));
        assert!(matches!(
            coll.create_index(Some("other"), IndexConfig::new(doc! { "x": 1 })),
            Err(EngineError::Constraint(_))
        ));

        coll.insert(doc! { "_id": "d", "x": 3 }).unwrap();
        assert!(coll
            .create_index(None, IndexConfig::new(doc! { "x": -1 }).unique())
            .is_err());
        assert!(coll.index("x_-1").is_none());
    }

    #[test]
    fn drop_index_rules() {
        let mut coll = seeded();
        coll.create_index(None, IndexConfig::new(doc! { "x": 1 })).unwrap();
        coll.create_index(None, IndexConfig::new(doc! { "y": 1 })).unwrap();
        assert!(matches!(coll.drop_index(ID_INDEX), Err(EngineError::Validation(_))));
        assert!(matches!(coll.drop_index("nope"), Err(EngineError::NotFound(_))));
        coll.drop_index("x_1").unwrap();
        coll.drop_index("").unwrap();
        let names: Vec<_> = coll.indexes().map(|i| i.name().to_string()).collect();
        assert_eq!(names, vec![ID_INDEX]);
    }

    #[test]
    fn trim_keeps_newest() {
        let mut log = Collection::bare();
        for n in 0..5 {
            log.append(doc! { "n": n });
        }
        log.trim(2);
        let kept: Vec<_> = log.documents().map(|d| d.get_i32("n").unwrap()).collect();
        assert_eq!(kept, vec![3, 4]);
    }
}
