//! Change streams: filtered cursors over the oplog.
//!
//! A stream remembers the oplog position it has examined up to. Commits
//! bump the engine's signal, and a blocked [`Stream::next`] rescans the live
//! oplog from that position when woken.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document, Timestamp};
use loam_query::matches;
use tracing::debug;

use crate::context::Context;
use crate::engine::Shared;
use crate::error::{EngineError, invalid};
use crate::handle::Handle;
use crate::oplog::{event_namespace, event_ts, invalidate_event, operation_type, token_ts, ts_key};
use crate::set::DocId;

// Upper bound on one wait, so cancellation is noticed promptly.
const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Cluster,
    Database(String),
    Collection(Handle),
}

#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Aggregation stages; only `$match` is supported.
    pub pipeline: Vec<Document>,
    /// Resume after the event with this `_id`.
    pub resume_after: Option<Document>,
    /// Like `resume_after`, for tokens of invalidating events.
    pub start_after: Option<Document>,
    /// Start at the oldest event with `clusterTime >= T`.
    pub start_at_operation_time: Option<Timestamp>,
}

pub struct Stream {
    shared: Arc<Shared>,
    scope: Scope,
    filters: Vec<Document>,
    /// First oplog position not yet examined.
    next: DocId,
    /// Events older than this are skipped until one at or after it is seen.
    since: Option<Timestamp>,
    pending: VecDeque<Document>,
    token: Option<Document>,
    invalidated: bool,
}

impl Stream {
    pub(crate) fn open(
        shared: Arc<Shared>,
        scope: Scope,
        options: StreamOptions,
    ) -> Result<Stream, EngineError> {
        let filters = compile(&options.pipeline)?;

        let resume = match (&options.resume_after, &options.start_after) {
            (Some(_), Some(_)) => {
                return Err(invalid("resume_after and start_after are mutually exclusive"));
            }
            (a, b) => a.as_ref().or(b.as_ref()),
        };
        if resume.is_some() && options.start_at_operation_time.is_some() {
            return Err(invalid(
                "a resume token cannot be combined with start_at_operation_time",
            ));
        }

        let catalog = shared.live.load_full();
        let oplog = catalog.oplog().set();
        let (next, since) = match (resume, options.start_at_operation_time) {
            (Some(token), _) => {
                let ts = token_ts(token)
                    .ok_or_else(|| invalid(format!("invalid resume token {token}")))?;
                let found = oplog
                    .iter()
                    .find(|(_, event)| event_ts(event).is_some_and(|t| t == ts));
                match found {
                    Some((id, _)) => (id + 1, None),
                    None => {
                        return Err(EngineError::NotFound(format!(
                            "resume token {token} is no longer in the oplog"
                        )));
                    }
                }
            }
            (None, Some(at)) => (0, Some(at)),
            (None, None) => (oplog.next_id(), None),
        };
        debug!(?scope, next, "stream opened");

        Ok(Stream {
            shared,
            scope,
            filters,
            next,
            since,
            pending: VecDeque::new(),
            token: None,
            invalidated: false,
        })
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// The `_id` of the last event returned, for resuming a new stream.
    pub fn resume_token(&self) -> Option<&Document> {
        self.token.as_ref()
    }

    /// Whether the stream was invalidated and has nothing left to return.
    pub fn is_closed(&self) -> bool {
        self.invalidated && self.pending.is_empty()
    }

    /// Block until an event is available. Returns `None` once the stream has
    /// been invalidated and drained.
    pub fn next(&mut self, ctx: &Context) -> Result<Option<Document>, EngineError> {
        loop {
            if let Some(event) = self.take() {
                return Ok(Some(event));
            }
            if self.invalidated {
                return Ok(None);
            }
            if self.shared.is_closed() {
                return Err(EngineError::Closed);
            }
            let seen = self.shared.signal.current();
            self.poll()?;
            if !self.pending.is_empty() || self.invalidated {
                continue;
            }
            ctx.check()?;
            let wait = ctx.remaining().map_or(POLL, |left| left.min(POLL));
            self.shared.signal.wait(seen, wait);
        }
    }

    /// The next event if one is already available.
    pub fn try_next(&mut self) -> Result<Option<Document>, EngineError> {
        if self.pending.is_empty() && !self.invalidated {
            if self.shared.is_closed() {
                return Err(EngineError::Closed);
            }
            self.poll()?;
        }
        Ok(self.take())
    }

    fn take(&mut self) -> Option<Document> {
        let event = self.pending.pop_front()?;
        if let Some(Bson::Document(id)) = event.get("_id") {
            self.token = Some(id.clone());
        }
        Some(event)
    }

    /// Queue every new event in scope.
    fn poll(&mut self) -> Result<(), EngineError> {
        let catalog = self.shared.live.load_full();
        let oplog = catalog.oplog().set();

        if self.since.is_none() {
            if let Some((first, _)) = oplog.iter().next() {
                if first > self.next {
                    return Err(EngineError::NotFound(
                        "resume point is no longer in the oplog".into(),
                    ));
                }
            }
        }

        for (id, event) in oplog.iter_from(self.next) {
            self.next = id + 1;
            if let Some(since) = self.since {
                match event_ts(event) {
                    Some(ts) if ts_key(ts) >= ts_key(since) => self.since = None,
                    _ => continue,
                }
            }
            if !self.in_scope(event) {
                continue;
            }
            if self.passes(event)? {
                self.pending.push_back((**event).clone());
            }
            if self.invalidates(event) {
                self.pending.push_back(invalidate_event(event));
                self.invalidated = true;
                debug!(scope = ?self.scope, "stream invalidated");
                break;
            }
        }
        Ok(())
    }

    fn in_scope(&self, event: &Document) -> bool {
        let (db, coll) = event_namespace(event);
        match &self.scope {
            Scope::Cluster => true,
            Scope::Database(name) => db == name,
            Scope::Collection(handle) => db == handle.db && coll == handle.coll,
        }
    }

    fn passes(&self, event: &Document) -> Result<bool, EngineError> {
        for filter in &self.filters {
            if !matches(event, filter)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn invalidates(&self, event: &Document) -> bool {
        match self.scope {
            Scope::Cluster => false,
            Scope::Database(_) => operation_type(event) == "dropDatabase",
            Scope::Collection(_) => operation_type(event) == "drop",
        }
    }
}

fn compile(pipeline: &[Document]) -> Result<Vec<Document>, EngineError> {
    let mut filters = Vec::new();
    for stage in pipeline {
        let mut entries = stage.iter();
        let (Some((name, value)), None) = (entries.next(), entries.next()) else {
            return Err(invalid("a pipeline stage must have exactly one field"));
        };
        match (name.as_str(), value) {
            ("$match", Bson::Document(filter)) => {
                matches(&Document::new(), filter)?;
                filters.push(filter.clone());
            }
            ("$match", other) => {
                return Err(invalid(format!("$match expects a document, found {other}")));
            }
            (name, _) if name.starts_with('$') => {
                return Err(EngineError::Unsupported(format!("change stream stage {name}")));
            }
            (name, _) => return Err(invalid(format!("unknown pipeline stage '{name}'"))),
        }
    }
    Ok(filters)
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("scope", &self.scope)
            .field("next", &self.next)
            .field("pending", &self.pending.len())
            .field("invalidated", &self.invalidated)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    #[test]
    fn only_match_stages_compile() {
        assert_eq!(
            compile(&[doc! { "$match": { "operationType": "insert" } }]).unwrap().len(),
            1
        );
        assert!(matches!(
            compile(&[doc! { "$project": { "a": 1 } }]),
            Err(EngineError::Unsupported(_))
        ));
        assert!(compile(&[doc! { "$match": 1 }]).is_err());
        assert!(compile(&[doc! { "$match": {}, "$limit": 1 }]).is_err());
    }
}
