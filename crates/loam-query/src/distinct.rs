use std::borrow::Borrow;

use bson::{Bson, Document};

use crate::compare::{compare, equal};
use crate::document::get;

/// Distinct values of `path` across `docs`, in canonical order.
///
/// Array values contribute their elements; documents missing the path
/// contribute nothing.
pub fn distinct<I>(docs: I, path: &str) -> Vec<Bson>
where
    I: IntoIterator,
    I::Item: Borrow<Document>,
{
    let mut values = Vec::new();
    for doc in docs {
        match get(doc.borrow(), path).map(|v| v.into_owned()) {
            None => {}
            Some(Bson::Array(items)) => values.extend(items),
            Some(value) => values.push(value),
        }
    }
    values.sort_by(compare);
    values.dedup_by(|a, b| equal(a, b));
    values
}
