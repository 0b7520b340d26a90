use std::borrow::Borrow;
use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::compare::{Number, compare, compare_missing, number};
use crate::document::get;
use crate::error::{QueryError, invalid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: String,
    pub direction: SortDirection,
}

/// Parse a `{path: 1 | -1, ...}` sort document.
pub fn parse_sort(spec: &Document) -> Result<Vec<SortKey>, QueryError> {
    spec.iter()
        .map(|(path, direction)| {
            let direction = match direction_of(direction) {
                Some(d) => d,
                None => {
                    return Err(invalid(format!(
                        "invalid sort direction for '{path}': {direction}"
                    )));
                }
            };
            Ok(SortKey {
                path: path.clone(),
                direction,
            })
        })
        .collect()
}

pub(crate) fn direction_of(value: &Bson) -> Option<SortDirection> {
    let sign = match number(value)? {
        Number::Long(n) => n.signum() as f64,
        Number::Double(f) => f,
    };
    if sign > 0.0 {
        Some(SortDirection::Ascending)
    } else if sign < 0.0 {
        Some(SortDirection::Descending)
    } else {
        None
    }
}

/// The value a document sorts by on one key. Arrays sort by their smallest
/// element ascending and their largest descending.
fn sort_value(doc: &Document, key: &SortKey) -> Option<Bson> {
    let value = get(doc, &key.path)?.into_owned();
    let Bson::Array(items) = value else {
        return Some(value);
    };
    match key.direction {
        SortDirection::Ascending => items.into_iter().min_by(|a, b| compare(a, b)),
        SortDirection::Descending => items.into_iter().max_by(|a, b| compare(a, b)),
    }
}

/// Lexicographic comparison over `keys`.
pub fn compare_by(a: &Document, b: &Document, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = compare_missing(sort_value(a, key).as_ref(), sort_value(b, key).as_ref());
        let ord = match key.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable sort of `docs` by a sort document.
pub fn sort<T: Borrow<Document>>(docs: &mut [T], spec: &Document) -> Result<(), QueryError> {
    let keys = parse_sort(spec)?;
    docs.sort_by(|a, b| compare_by(a.borrow(), b.borrow(), &keys));
    Ok(())
}
