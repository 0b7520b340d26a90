//! Oplog event documents.
//!
//! Every event carries `_id: {ts}` (its resume token), `clusterTime`, `ns`
//! and `operationType`. Document events add `documentKey`, and inserts,
//! replaces and updates add `fullDocument`.

use bson::{Bson, Document, Timestamp, doc};
use loam_query::clock;

use crate::collection::Change;
use crate::handle::Handle;

fn event(kind: &str, ns: Document) -> Document {
    let ts = clock::now();
    doc! {
        "_id": { "ts": ts },
        "clusterTime": ts,
        "ns": ns,
        "operationType": kind,
    }
}

fn namespace(handle: &Handle) -> Document {
    doc! { "db": handle.db.clone(), "coll": handle.coll.clone() }
}

pub(crate) fn change_event(handle: &Handle, change: &Change) -> Document {
    match change {
        Change::Insert(doc) => {
            let mut e = event("insert", namespace(handle));
            e.insert("documentKey", document_key(doc));
            e.insert("fullDocument", (**doc).clone());
            e
        }
        Change::Replace(doc) => {
            let mut e = event("replace", namespace(handle));
            e.insert("documentKey", document_key(doc));
            e.insert("fullDocument", (**doc).clone());
            e
        }
        Change::Update(doc, changes) => {
            let mut e = event("update", namespace(handle));
            e.insert("documentKey", document_key(doc));
            e.insert("fullDocument", (**doc).clone());
            e.insert(
                "updateDescription",
                doc! {
                    "updatedFields": changes.updated.clone(),
                    "removedFields": changes.removed.clone(),
                },
            );
            e
        }
        Change::Delete(id) => {
            let mut e = event("delete", namespace(handle));
            e.insert("documentKey", doc! { "_id": id.clone() });
            e
        }
    }
}

fn document_key(doc: &Document) -> Document {
    doc! { "_id": doc.get("_id").cloned().unwrap_or(Bson::Null) }
}

pub(crate) fn drop_event(handle: &Handle) -> Document {
    event("drop", namespace(handle))
}

pub(crate) fn drop_database_event(db: &str) -> Document {
    event("dropDatabase", doc! { "db": db })
}

/// The event that ends a stream after `cause`; it reuses the cause's token.
pub(crate) fn invalidate_event(cause: &Document) -> Document {
    let mut e = Document::new();
    e.insert("_id", cause.get("_id").cloned().unwrap_or(Bson::Null));
    e.insert("clusterTime", cause.get("clusterTime").cloned().unwrap_or(Bson::Null));
    e.insert("operationType", "invalidate");
    e
}

/// The resume timestamp of an event or a resume token.
pub fn token_ts(token: &Document) -> Option<Timestamp> {
    token.get_timestamp("ts").ok()
}

pub(crate) fn event_ts(event: &Document) -> Option<Timestamp> {
    token_ts(event.get_document("_id").ok()?)
}

/// Timestamps ordered by seconds, then ordinal.
pub(crate) fn ts_key(ts: Timestamp) -> (u32, u32) {
    (ts.time, ts.increment)
}

pub(crate) fn operation_type(event: &Document) -> &str {
    event.get_str("operationType").unwrap_or_default()
}

/// The `(db, coll)` an event refers to; `coll` is empty for database events.
pub(crate) fn event_namespace(event: &Document) -> (&str, &str) {
    let Ok(ns) = event.get_document("ns") else {
        return ("", "");
    };
    (
        ns.get_str("db").unwrap_or_default(),
        ns.get_str("coll").unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use loam_query::Changes;

    use super::*;

    #[test]
    fn update_events_describe_changes() {
        let handle = Handle::new("db", "c");
        let changes = Changes {
            updated: doc! { "n": 3 },
            removed: vec!["old".into()],
        };
        let e = change_event(&handle, &Change::Update(Arc::new(doc! { "_id": 1, "n": 3 }), changes));
        assert_eq!(operation_type(&e), "update");
        assert_eq!(event_namespace(&e), ("db", "c"));
        assert_eq!(e.get_document("documentKey").unwrap(), &doc! { "_id": 1 });
        assert_eq!(
            e.get_document("updateDescription").unwrap(),
            &doc! { "updatedFields": { "n": 3 }, "removedFields": ["old"] }
        );
        assert_eq!(event_ts(&e), e.get_timestamp("clusterTime").ok());
    }

    #[test]
    fn events_are_strictly_ordered() {
        let a = drop_event(&Handle::new("db", "c"));
        let b = drop_database_event("db");
        assert!(ts_key(event_ts(&a).unwrap()) < ts_key(event_ts(&b).unwrap()));
        assert_eq!(event_namespace(&b), ("db", ""));
    }

    #[test]
    fn invalidate_reuses_the_cause_token() {
        let cause = drop_event(&Handle::new("db", "c"));
        let e = invalidate_event(&cause);
        assert_eq!(e.get("_id"), cause.get("_id"));
        assert_eq!(operation_type(&e), "invalidate");
        assert!(!e.contains_key("ns"));
    }
}
