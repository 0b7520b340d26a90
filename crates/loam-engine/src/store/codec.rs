//! BSON images of catalogs.
//!
//! ```text
//! { namespaces: { "<db.coll>": { documents: [...],
//!                                indexes: { <name>: { key, unique, partial, expiry } } } },
//!   dropped: ["<db.coll>", ...] }
//! ```
//!
//! `partial` is null when absent and `expiry` is in nanoseconds, zero when
//! absent. `dropped` only appears in log frames.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bson::Document;
use loam_store::StoreError;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::collection::Collection;
use crate::error::EngineError;
use crate::handle::Handle;
use crate::index::IndexConfig;

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Image {
    namespaces: BTreeMap<String, Namespace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dropped: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Namespace {
    documents: Vec<Document>,
    indexes: BTreeMap<String, IndexSpec>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSpec {
    key: Document,
    unique: bool,
    partial: Option<Document>,
    expiry: i64,
}

fn corrupt(msg: impl std::fmt::Display) -> EngineError {
    EngineError::Store(StoreError::Corrupt(msg.to_string()))
}

impl Image {
    /// Every namespace of `catalog`, the oplog included.
    pub(crate) fn full(catalog: &Catalog) -> Result<Image, EngineError> {
        let mut image = Image::default();
        image.add(&Handle::oplog(), catalog.oplog())?;
        for (handle, coll) in catalog.iter() {
            image.add(handle, coll)?;
        }
        Ok(image)
    }

    /// The namespaces of `next` that differ from `prev`, and those dropped.
    pub(crate) fn delta(prev: &Catalog, next: &Catalog) -> Result<Image, EngineError> {
        let mut image = Image::default();
        if !next.shares(prev, &Handle::oplog()) {
            image.add(&Handle::oplog(), next.oplog())?;
        }
        for (handle, coll) in next.iter() {
            if !next.shares(prev, handle) {
                image.add(handle, coll)?;
            }
        }
        image.dropped = prev
            .iter()
            .filter(|(handle, _)| !next.contains(handle))
            .map(|(handle, _)| handle.namespace())
            .collect();
        Ok(image)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.namespaces.is_empty() && self.dropped.is_empty()
    }

    fn add(&mut self, handle: &Handle, coll: &Collection) -> Result<(), EngineError> {
        let mut indexes = BTreeMap::new();
        for index in coll.indexes() {
            let config = index.config();
            let expiry = match config.expiry {
                Some(expiry) => i64::try_from(expiry.as_nanos())
                    .map_err(|_| corrupt(format!("expiry of index '{}' overflows", index.name())))?,
                None => 0,
            };
            indexes.insert(
                index.name().to_string(),
                IndexSpec {
                    key: config.key.clone(),
                    unique: config.unique,
                    partial: config.partial.clone(),
                    expiry,
                },
            );
        }
        self.namespaces.insert(
            handle.namespace(),
            Namespace {
                documents: coll.documents().map(|doc| (**doc).clone()).collect(),
                indexes,
            },
        );
        Ok(())
    }

    /// Overlay this image onto `catalog`: drop, then replace namespaces.
    pub(crate) fn apply(self, catalog: &mut Catalog) -> Result<(), EngineError> {
        for name in &self.dropped {
            let handle = Handle::parse(name).ok_or_else(|| corrupt(format!("bad namespace '{name}'")))?;
            catalog.remove(&handle);
        }
        for (name, ns) in self.namespaces {
            let handle = Handle::parse(&name).ok_or_else(|| corrupt(format!("bad namespace '{name}'")))?;
            let mut indexes = Vec::with_capacity(ns.indexes.len());
            for (index, spec) in ns.indexes {
                let expiry = u64::try_from(spec.expiry)
                    .map_err(|_| corrupt(format!("negative expiry on index '{index}'")))?;
                indexes.push((
                    index,
                    IndexConfig {
                        key: spec.key,
                        unique: spec.unique,
                        partial: spec.partial,
                        expiry: (expiry > 0).then(|| Duration::from_nanos(expiry)),
                    },
                ));
            }
            let coll = Collection::restore(ns.documents, indexes)
                .map_err(|e| corrupt(format!("namespace '{name}': {e}")))?;
            catalog.insert(handle, Arc::new(coll));
        }
        Ok(())
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, EngineError> {
        bson::serialize_to_vec(self).map_err(|e| corrupt(format!("cannot encode catalog: {e}")))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Image, EngineError> {
        bson::deserialize_from_slice(bytes).map_err(|e| corrupt(format!("cannot decode catalog: {e}")))
    }
}

/// Encode the whole catalog.
pub(crate) fn encode(catalog: &Catalog) -> Result<Vec<u8>, EngineError> {
    Image::full(catalog)?.encode()
}

/// Decode a whole catalog.
pub(crate) fn decode(bytes: &[u8]) -> Result<Catalog, EngineError> {
    let mut catalog = Catalog::new();
    Image::decode(bytes)?.apply(&mut catalog)?;
    Ok(catalog)
}
