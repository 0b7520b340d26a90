//! Dotted-path access and mutation over ordered documents.
//!
//! A missing value is `None` and is distinct from an explicit `Bson::Null`.

use std::borrow::Cow;

use bson::{Bson, Document};

use crate::error::{QueryError, invalid};

/// Most null elements a single write may pad an array with.
const MAX_BACKFILL: usize = 1_500_000;

/// Parse a path segment as an array position.
pub(crate) fn array_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Look up the value at `path`.
///
/// Numeric segments address array positions. A named segment applied to an
/// array is applied to every document element and the found values are
/// returned as an array.
pub fn get<'a>(doc: &'a Document, path: &str) -> Option<Cow<'a, Bson>> {
    let segments: Vec<&str> = path.split('.').collect();
    let (head, rest) = segments.split_first()?;
    lookup(doc.get(*head)?, rest)
}

fn lookup<'a>(value: &'a Bson, segments: &[&str]) -> Option<Cow<'a, Bson>> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(Cow::Borrowed(value));
    };

    match value {
        Bson::Document(doc) => lookup(doc.get(*head)?, rest),
        Bson::Array(items) => {
            if let Some(index) = array_index(head) {
                return lookup(items.get(index)?, rest);
            }
            let found: Vec<Bson> = items
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(doc) => doc
                        .get(*head)
                        .and_then(|v| lookup(v, rest))
                        .map(Cow::into_owned),
                    _ => None,
                })
                .collect();
            if found.is_empty() {
                None
            } else {
                Some(Cow::Owned(Bson::Array(found)))
            }
        }
        _ => None,
    }
}

/// Collect every value reachable through `path`, fanning out over arrays at
/// every level.
///
/// With `compact`, unreachable branches are dropped and `None` is returned
/// when nothing was found; otherwise they contribute a null. With `merge`,
/// arrays found at the end of the path contribute their elements instead of
/// themselves.
pub fn all(doc: &Document, path: &str, compact: bool, merge: bool) -> Option<Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect_document(doc, &segments, compact, merge, &mut out);
    if compact && out.is_empty() {
        None
    } else {
        Some(Bson::Array(out))
    }
}

fn collect_document(
    doc: &Document,
    segments: &[&str],
    compact: bool,
    merge: bool,
    out: &mut Vec<Bson>,
) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match doc.get(*head) {
        Some(value) => collect_value(value, rest, compact, merge, out),
        None if !compact => out.push(Bson::Null),
        None => {}
    }
}

fn collect_value(value: &Bson, segments: &[&str], compact: bool, merge: bool, out: &mut Vec<Bson>) {
    let Some(head) = segments.first() else {
        match value {
            Bson::Array(items) if merge => out.extend(items.iter().cloned()),
            _ => out.push(value.clone()),
        }
        return;
    };

    match value {
        Bson::Document(doc) => collect_document(doc, segments, compact, merge, out),
        Bson::Array(items) => match array_index(head) {
            Some(index) => match items.get(index) {
                Some(item) => collect_value(item, &segments[1..], compact, merge, out),
                None if !compact => out.push(Bson::Null),
                None => {}
            },
            None => {
                for item in items {
                    collect_value(item, segments, compact, merge, out);
                }
            }
        },
        _ if !compact => out.push(Bson::Null),
        _ => {}
    }
}

/// Write `value` at `path`, creating intermediate documents as needed.
///
/// Numeric segments descend into arrays, growing them with nulls when the
/// position lies beyond the end. With `prepend`, a newly created top-level key
/// is placed first instead of last. Returns the previous value, if any.
pub fn put(
    doc: &mut Document,
    path: &str,
    value: Bson,
    prepend: bool,
) -> Result<Option<Bson>, QueryError> {
    let segments = split_path(path)?;
    put_in_document(doc, &segments, value, prepend)
}

pub(crate) fn split_path(path: &str) -> Result<Vec<&str>, QueryError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid(format!("invalid path '{path}'")));
    }
    Ok(segments)
}

fn put_in_document(
    doc: &mut Document,
    segments: &[&str],
    value: Bson,
    prepend: bool,
) -> Result<Option<Bson>, QueryError> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(invalid("empty path"));
    };

    if rest.is_empty() {
        if doc.contains_key(*head) {
            return Ok(doc.insert(*head, value));
        }
        insert_key(doc, head, value, prepend);
        return Ok(None);
    }

    if !doc.contains_key(*head) {
        insert_key(doc, head, Bson::Document(Document::new()), prepend);
    }
    match doc.get_mut(*head) {
        Some(child) => put_in_value(child, head, rest, value),
        None => Err(invalid(format!("cannot create field '{head}'"))),
    }
}

fn put_in_value(
    container: &mut Bson,
    name: &str,
    segments: &[&str],
    value: Bson,
) -> Result<Option<Bson>, QueryError> {
    match container {
        Bson::Document(doc) => put_in_document(doc, segments, value, false),
        Bson::Array(items) => {
            let (head, rest) = match segments.split_first() {
                Some(split) => split,
                None => return Err(invalid("empty path")),
            };
            let index = array_index(head).ok_or_else(|| {
                invalid(format!(
                    "cannot use the part '{head}' to traverse the array '{name}'"
                ))
            })?;

            let grown = index >= items.len();
            if grown {
                let len = index
                    .checked_add(1)
                    .filter(|_| index - items.len() <= MAX_BACKFILL)
                    .ok_or_else(|| {
                        invalid(format!("array index {index} in '{name}' is too large"))
                    })?;
                items.resize(len, Bson::Null);
            }

            if rest.is_empty() {
                let previous = std::mem::replace(&mut items[index], value);
                return Ok(if grown { None } else { Some(previous) });
            }

            if grown {
                items[index] = Bson::Document(Document::new());
            }
            put_in_value(&mut items[index], head, rest, value)
        }
        other => Err(invalid(format!(
            "cannot create field '{}' in element {{{name}: {other}}}",
            segments.first().copied().unwrap_or_default()
        ))),
    }
}

fn insert_key(doc: &mut Document, key: &str, value: Bson, prepend: bool) {
    if !prepend {
        doc.insert(key, value);
        return;
    }
    let previous = std::mem::take(doc);
    doc.insert(key, value);
    for (k, v) in previous {
        doc.insert(k, v);
    }
}

/// Remove the value at `path`.
///
/// Array elements are replaced by null rather than removed so positions of
/// later elements do not shift. Returns the removed value, if any.
pub fn unset(doc: &mut Document, path: &str) -> Option<Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    unset_in_document(doc, &segments)
}

fn unset_in_document(doc: &mut Document, segments: &[&str]) -> Option<Bson> {
    let (head, rest) = segments.split_first()?;
    if rest.is_empty() {
        return doc.remove(*head);
    }
    unset_in_value(doc.get_mut(*head)?, rest)
}

fn unset_in_value(value: &mut Bson, segments: &[&str]) -> Option<Bson> {
    match value {
        Bson::Document(doc) => unset_in_document(doc, segments),
        Bson::Array(items) => {
            let (head, rest) = segments.split_first()?;
            let item = items.get_mut(array_index(head)?)?;
            if rest.is_empty() {
                Some(std::mem::replace(item, Bson::Null))
            } else {
                unset_in_value(item, rest)
            }
        }
        _ => None,
    }
}
