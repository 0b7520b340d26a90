//! Transactions: a private catalog clone that becomes the live catalog on
//! commit.
//!
//! Every write clones the catalog, runs the collection primitive on the
//! clone, appends the resulting oplog events and only then adopts the clone.
//! A failing write therefore leaves the transaction as it was.

use std::sync::Arc;

use bson::{Bson, Document, doc};
use loam_query::{distinct, matches, project};

use crate::catalog::Catalog;
use crate::collection::{Collection, WriteResult};
use crate::context::Context;
use crate::engine::Shared;
use crate::error::EngineError;
use crate::handle::Handle;
use crate::index::IndexConfig;
use crate::oplog;
use crate::options::{DeleteOptions, FindOptions, Operation, ReplaceOptions, UpdateOptions};
use crate::semaphore::Permit;
use crate::set::DocId;

pub struct Transaction {
    pub(crate) shared: Arc<Shared>,
    /// The live catalog this transaction started from.
    pub(crate) base: Arc<Catalog>,
    pub(crate) catalog: Catalog,
    pub(crate) readonly: bool,
    pub(crate) dirty: bool,
    /// Writer token, released on drop.
    _permit: Option<Permit>,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<Shared>, readonly: bool, permit: Option<Permit>) -> Self {
        let base = shared.live.load_full();
        Self {
            catalog: (*base).clone(),
            shared,
            base,
            readonly,
            dirty: false,
            _permit: permit,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Whether any write has succeeded in this transaction.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn commit(self, ctx: &Context) -> Result<(), EngineError> {
        let shared = Arc::clone(&self.shared);
        shared.commit(ctx, self)
    }

    /// Discard every change.
    pub fn abort(self) {}

    // ── Reads ───────────────────────────────────────────────────

    pub fn find(
        &self,
        handle: &Handle,
        query: &Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>, EngineError> {
        let Some(coll) = self.catalog.get(handle) else {
            matches(&Document::new(), query)?;
            return Ok(Vec::new());
        };
        let found = coll.find(query, options.sort.as_ref(), options.skip, options.limit)?;
        found
            .into_iter()
            .map(|(_, doc)| match &options.projection {
                Some(projection) => Ok(project(&doc, projection)?),
                None => Ok(Arc::unwrap_or_clone(doc)),
            })
            .collect()
    }

    pub fn find_one(
        &self,
        handle: &Handle,
        query: &Document,
    ) -> Result<Option<Document>, EngineError> {
        let options = FindOptions {
            limit: Some(1),
            ..Default::default()
        };
        Ok(self.find(handle, query, &options)?.pop())
    }

    pub fn count(&self, handle: &Handle, query: &Document) -> Result<u64, EngineError> {
        let Some(coll) = self.catalog.get(handle) else {
            return Ok(0);
        };
        Ok(coll.find(query, None, 0, None)?.len() as u64)
    }

    /// Distinct values of `path` among documents matching `query`.
    pub fn distinct(
        &self,
        handle: &Handle,
        path: &str,
        query: &Document,
    ) -> Result<Vec<Bson>, EngineError> {
        let Some(coll) = self.catalog.get(handle) else {
            return Ok(Vec::new());
        };
        let found = coll.find(query, None, 0, None)?;
        Ok(distinct(found.iter().map(|(_, doc)| doc.as_ref()), path))
    }

    /// Databases in name order, including the one holding the oplog.
    pub fn list_databases(&self, query: &Document) -> Result<Vec<Document>, EngineError> {
        let oplog = Handle::oplog();
        let mut names = self.catalog.databases();
        if !names.contains(&oplog.db.as_str()) {
            names.push(&oplog.db);
            names.sort_unstable();
        }

        let mut out = Vec::new();
        for db in names {
            let empty = self.catalog.collections(db).all(|(_, c)| c.is_empty())
                && (db != oplog.db || self.catalog.oplog().is_empty());
            let info = doc! { "name": db, "empty": empty };
            if matches(&info, query)? {
                out.push(info);
            }
        }
        Ok(out)
    }

    /// Collections of `db` in name order. The oplog is listed under its
    /// database.
    pub fn list_collections(&self, db: &str, query: &Document) -> Result<Vec<Document>, EngineError> {
        let oplog = Handle::oplog();
        let mut names: Vec<&str> = self
            .catalog
            .collections(db)
            .map(|(handle, _)| handle.coll.as_str())
            .collect();
        if db == oplog.db {
            names.push(&oplog.coll);
            names.sort_unstable();
        }

        let mut out = Vec::new();
        for name in names {
            let read_only = db == oplog.db && name == oplog.coll;
            let info = doc! {
                "name": name,
                "type": "collection",
                "options": {},
                "info": { "readOnly": read_only },
            };
            if matches(&info, query)? {
                out.push(info);
            }
        }
        Ok(out)
    }

    /// Index descriptions ordered by name.
    pub fn list_indexes(&self, handle: &Handle) -> Result<Vec<Document>, EngineError> {
        let coll = self
            .catalog
            .get(handle)
            .ok_or_else(|| EngineError::NotFound(format!("namespace '{handle}'")))?;
        let ns = handle.namespace();
        Ok(coll.indexes().map(|index| index.spec(&ns)).collect())
    }

    // ── Writes ──────────────────────────────────────────────────

    fn writable(&self) -> Result<(), EngineError> {
        if self.readonly {
            return Err(EngineError::ReadOnly);
        }
        if self.shared.is_closed() {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    /// Run `f` on a clone of the collection at `handle`, creating it if
    /// needed, and adopt the result if `f` succeeds. Unless `structural`,
    /// a write that produced no oplog event leaves the catalog untouched.
    fn mutate<T>(
        &mut self,
        handle: &Handle,
        structural: bool,
        f: impl FnOnce(&mut Collection, &mut Vec<Document>) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        self.writable()?;
        handle.validate()?;

        let mut next = self.catalog.clone();
        let mut events = Vec::new();
        let out = f(next.collection_mut(handle), &mut events)?;
        if !structural && events.is_empty() {
            return Ok(out);
        }
        self.adopt(next, events);
        Ok(out)
    }

    fn adopt(&mut self, mut next: Catalog, events: Vec<Document>) {
        if !events.is_empty() {
            let oplog = next.collection_mut(&Handle::oplog());
            for event in events {
                oplog.append(event);
            }
            oplog.trim(self.shared.config.oplog_size);
        }
        self.catalog = next;
        self.dirty = true;
    }

    fn record(handle: &Handle, result: &WriteResult, events: &mut Vec<Document>) {
        events.extend(result.changes.iter().map(|c| oplog::change_event(handle, c)));
    }

    /// Create an empty collection. Returns false if it already exists.
    pub fn create_collection(&mut self, handle: &Handle) -> Result<bool, EngineError> {
        self.writable()?;
        handle.validate()?;
        if self.catalog.contains(handle) {
            return Ok(false);
        }
        self.mutate(handle, true, |_, _| Ok(true))
    }

    pub fn insert(&mut self, handle: &Handle, doc: Document) -> Result<WriteResult, EngineError> {
        self.mutate(handle, false, |coll, events| {
            let result = coll.insert(doc)?;
            Self::record(handle, &result, events);
            Ok(result)
        })
    }

    /// Insert each document. Ordered inserts stop at the first failure.
    pub fn insert_many(
        &mut self,
        handle: &Handle,
        docs: Vec<Document>,
        ordered: bool,
    ) -> Result<Vec<Result<WriteResult, EngineError>>, EngineError> {
        self.bulk(handle, docs.into_iter().map(Operation::Insert).collect(), ordered)
    }

    pub fn replace(
        &mut self,
        handle: &Handle,
        query: &Document,
        replacement: &Document,
        options: &ReplaceOptions,
    ) -> Result<WriteResult, EngineError> {
        let op = Operation::Replace {
            query: query.clone(),
            replacement: replacement.clone(),
            options: options.clone(),
        };
        self.execute(handle, op)
    }

    pub fn update(
        &mut self,
        handle: &Handle,
        query: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<WriteResult, EngineError> {
        let op = Operation::Update {
            query: query.clone(),
            update: update.clone(),
            options: options.clone(),
        };
        self.execute(handle, op)
    }

    pub fn delete(
        &mut self,
        handle: &Handle,
        query: &Document,
        options: &DeleteOptions,
    ) -> Result<WriteResult, EngineError> {
        let op = Operation::Delete {
            query: query.clone(),
            options: options.clone(),
        };
        self.execute(handle, op)
    }

    fn execute(&mut self, handle: &Handle, op: Operation) -> Result<WriteResult, EngineError> {
        self.mutate(handle, false, |coll, events| {
            let result = op.execute(coll)?;
            Self::record(handle, &result, events);
            Ok(result)
        })
    }

    /// Apply `ops` against one clone of the namespace. Each op's outcome is
    /// reported separately; ordered bulks stop after the first failure.
    pub fn bulk(
        &mut self,
        handle: &Handle,
        ops: Vec<Operation>,
        ordered: bool,
    ) -> Result<Vec<Result<WriteResult, EngineError>>, EngineError> {
        self.mutate(handle, false, |coll, events| {
            let mut results = Vec::with_capacity(ops.len());
            for op in &ops {
                let result = op.execute(coll);
                let failed = result.is_err();
                if let Ok(result) = &result {
                    Self::record(handle, result, events);
                }
                results.push(result);
                if failed && ordered {
                    break;
                }
            }
            Ok(results)
        })
    }

    /// Drop a collection, or every collection of a database when `handle`
    /// has no collection name. Returns false if nothing existed.
    pub fn drop(&mut self, handle: &Handle) -> Result<bool, EngineError> {
        self.writable()?;
        let mut next = self.catalog.clone();
        let mut events = Vec::new();

        if handle.is_database() {
            handle.validate_database()?;
            let handles: Vec<Handle> = self
                .catalog
                .collections(&handle.db)
                .map(|(h, _)| h.clone())
                .collect();
            if handles.is_empty() {
                return Ok(false);
            }
            for h in &handles {
                next.remove(h);
                events.push(oplog::drop_event(h));
            }
            events.push(oplog::drop_database_event(&handle.db));
        } else {
            handle.validate()?;
            if next.remove(handle).is_none() {
                return Ok(false);
            }
            events.push(oplog::drop_event(handle));
        }

        self.adopt(next, events);
        Ok(true)
    }

    /// Build an index, creating the collection if needed. Returns its name.
    pub fn create_index(
        &mut self,
        handle: &Handle,
        name: Option<&str>,
        config: IndexConfig,
    ) -> Result<String, EngineError> {
        self.mutate(handle, true, |coll, _| coll.create_index(name, config))
    }

    /// Drop an index by name, or all but `_id_` when `name` is empty.
    pub fn drop_index(&mut self, handle: &Handle, name: &str) -> Result<(), EngineError> {
        if !self.catalog.contains(handle) {
            return Err(EngineError::NotFound(format!("namespace '{handle}'")));
        }
        self.mutate(handle, true, |coll, _| coll.drop_index(name))
    }

    /// Delete every document whose TTL index value has aged out. Returns the
    /// number of documents removed.
    pub(crate) fn reap(&mut self, now_millis: i64) -> Result<u64, EngineError> {
        let mut expired: Vec<(Handle, Vec<DocId>)> = Vec::new();
        for (handle, coll) in self.catalog.iter() {
            let mut ids: Vec<DocId> = coll
                .indexes()
                .filter(|index| index.is_ttl())
                .flat_map(|index| index.expired(now_millis))
                .collect();
            if ids.is_empty() {
                continue;
            }
            ids.sort_unstable();
            ids.dedup();
            expired.push((handle.clone(), ids));
        }

        let mut removed = 0;
        for (handle, ids) in expired {
            removed += self.mutate(&handle, false, |coll, events| {
                let result = coll.delete_ids(&ids)?;
                Self::record(&handle, &result, events);
                Ok(result.deleted)
            })?;
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("readonly", &self.readonly)
            .field("dirty", &self.dirty)
            .field("namespaces", &self.catalog.len())
            .finish()
    }
}
