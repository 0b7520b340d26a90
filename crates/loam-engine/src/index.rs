//! Secondary indexes over a collection's documents.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::time::Duration;

use bson::{Bson, Document};
use imbl::OrdMap;
use loam_query::{SortDirection, SortKey, compare, get, matches, parse_sort};

use crate::error::{EngineError, invalid};
use crate::set::DocId;

/// Name of the implicit unique index every user collection carries.
pub const ID_INDEX: &str = "_id_";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexConfig {
    /// Ordered `{path: 1 | -1}` columns.
    pub key: Document,
    pub unique: bool,
    /// Only documents matching this filter are indexed.
    pub partial: Option<Document>,
    /// Documents whose indexed date is older than this are reaped.
    pub expiry: Option<Duration>,
}

impl IndexConfig {
    pub fn new(key: Document) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn partial(mut self, filter: Document) -> Self {
        self.partial = Some(filter);
        self
    }

    pub fn expire_after(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

// ── Entries ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Column {
    value: Bson,
    descending: bool,
}

/// One indexed document. Unique indexes leave `id` empty so that equal keys
/// collide; other indexes break ties on document identity.
#[derive(Debug, Clone)]
struct Entry {
    columns: Vec<Column>,
    id: Option<DocId>,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.columns.iter().zip(&other.columns) {
            let ord = compare(&a.value, &b.value);
            let ord = if a.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

// ── Index ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Index {
    name: String,
    config: IndexConfig,
    columns: Vec<SortKey>,
    entries: OrdMap<Entry, DocId>,
}

impl Index {
    /// Compile `config`. Without a name the canonical `path_dir` name is used.
    pub fn new(name: Option<&str>, config: IndexConfig) -> Result<Index, EngineError> {
        let columns = compile_key(&config.key)?;
        if config.expiry.is_some() && columns.len() != 1 {
            return Err(invalid("a TTL index must have exactly one key column"));
        }
        if let Some(partial) = &config.partial {
            matches(&Document::new(), partial)?;
        }
        let name = match name {
            Some("") => return Err(invalid("index name cannot be empty")),
            Some(name) => name.to_string(),
            None => canonical_name(&config.key),
        };
        Ok(Index {
            name,
            config,
            columns,
            entries: OrdMap::new(),
        })
    }

    /// The implicit unique `_id_` index.
    pub fn primary() -> Index {
        let mut key = Document::new();
        key.insert("_id", 1);
        Index {
            name: ID_INDEX.to_string(),
            config: IndexConfig::new(key).unique(),
            columns: vec![SortKey {
                path: "_id".to_string(),
                direction: SortDirection::Ascending,
            }],
            entries: OrdMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the reaper should scan this index.
    pub fn is_ttl(&self) -> bool {
        self.config.expiry.is_some_and(|e| !e.is_zero())
    }

    fn covers(&self, doc: &Document) -> Result<bool, EngineError> {
        match &self.config.partial {
            Some(filter) => Ok(matches(doc, filter)?),
            None => Ok(true),
        }
    }

    fn entry(&self, id: DocId, doc: &Document) -> Entry {
        Entry {
            columns: self
                .columns
                .iter()
                .map(|key| Column {
                    value: get(doc, &key.path).map_or(Bson::Null, Cow::into_owned),
                    descending: key.direction == SortDirection::Descending,
                })
                .collect(),
            id: (!self.config.unique).then_some(id),
        }
    }

    /// Index `doc`. Returns false when a unique key is already taken.
    /// Documents outside a partial filter are skipped and count as handled.
    pub fn add(&mut self, id: DocId, doc: &Document) -> Result<bool, EngineError> {
        if !self.covers(doc)? {
            return Ok(true);
        }
        let entry = self.entry(id, doc);
        if self.entries.contains_key(&entry) {
            return Ok(false);
        }
        self.entries.insert(entry, id);
        Ok(true)
    }

    /// Whether the index holds the entry for `doc` under `id`.
    pub fn has(&self, id: DocId, doc: &Document) -> Result<bool, EngineError> {
        if !self.covers(doc)? {
            return Ok(false);
        }
        Ok(self.entries.get(&self.entry(id, doc)) == Some(&id))
    }

    pub fn remove(&mut self, id: DocId, doc: &Document) -> Result<bool, EngineError> {
        if !self.has(id, doc)? {
            return Ok(false);
        }
        Ok(self.entries.remove(&self.entry(id, doc)).is_some())
    }

    /// Index every document, failing on the first unique collision. A failed
    /// build leaves the index partially populated.
    pub fn build<'a, I>(&mut self, docs: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = (DocId, &'a Document)>,
    {
        for (id, doc) in docs {
            if !self.add(id, doc)? {
                return Err(self.duplicate(doc));
            }
        }
        Ok(())
    }

    pub(crate) fn duplicate(&self, doc: &Document) -> EngineError {
        let mut key = Document::new();
        for column in &self.columns {
            key.insert(
                column.path.clone(),
                get(doc, &column.path).map_or(Bson::Null, Cow::into_owned),
            );
        }
        EngineError::DuplicateKey {
            index: self.name.clone(),
            key: key.to_string(),
        }
    }

    /// Key values and document ids in index order.
    pub fn scan(&self) -> impl Iterator<Item = (Vec<&Bson>, DocId)> {
        self.entries
            .iter()
            .map(|(entry, id)| (entry.columns.iter().map(|c| &c.value).collect(), *id))
    }

    /// Documents whose indexed date is older than `now_millis - expiry`.
    /// Arrays expire only when every element is an expired date; other
    /// values never expire.
    pub fn expired(&self, now_millis: i64) -> Vec<DocId> {
        let Some(expiry) = self.config.expiry.filter(|_| self.is_ttl()) else {
            return Vec::new();
        };
        let cutoff = now_millis.saturating_sub(i64::try_from(expiry.as_millis()).unwrap_or(i64::MAX));
        self.entries
            .iter()
            .filter(|(entry, _)| entry.columns.first().is_some_and(|c| is_expired(&c.value, cutoff)))
            .map(|(_, id)| *id)
            .collect()
    }

    /// The `listIndexes` description of this index.
    pub fn spec(&self, namespace: &str) -> Document {
        let mut spec = Document::new();
        spec.insert("v", 2);
        spec.insert("key", self.config.key.clone());
        spec.insert("name", self.name.clone());
        spec.insert("ns", namespace);
        if self.config.unique {
            spec.insert("unique", true);
        }
        if let Some(partial) = &self.config.partial {
            spec.insert("partialFilterExpression", partial.clone());
        }
        if let Some(expiry) = self.config.expiry {
            spec.insert("expireAfterSeconds", i64::try_from(expiry.as_secs()).unwrap_or(i64::MAX));
        }
        spec
    }
}

fn is_expired(value: &Bson, cutoff: i64) -> bool {
    let aged = |v: &Bson| matches!(v, Bson::DateTime(d) if d.timestamp_millis() < cutoff);
    match value {
        Bson::Array(items) => !items.is_empty() && items.iter().all(aged),
        other => aged(other),
    }
}

fn compile_key(key: &Document) -> Result<Vec<SortKey>, EngineError> {
    if key.is_empty() {
        return Err(invalid("index key cannot be empty"));
    }
    for (path, direction) in key {
        if path.is_empty() || path.starts_with('$') {
            return Err(invalid(format!("invalid index key path '{path}'")));
        }
        if let Bson::String(kind) = direction {
            return Err(EngineError::Unsupported(format!("index type '{kind}'")));
        }
    }
    Ok(parse_sort(key)?)
}

/// `a_1_b_-1` for `{a: 1, b: -1}`.
pub fn canonical_name(key: &Document) -> String {
    key.iter()
        .map(|(path, direction)| match direction {
            Bson::Int32(n) => format!("{path}_{n}"),
            Bson::Int64(n) => format!("{path}_{n}"),
            Bson::Double(n) => format!("{path}_{n}"),
            other => format!("{path}_{other}"),
        })
        .collect::<Vec<_>>()
        .join("_")
}
