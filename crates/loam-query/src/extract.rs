//! Derivation of an upsert base document from query equalities.

use bson::{Bson, Document};

use crate::dispatch::{Call, Dispatcher, Operator};
use crate::document::put;
use crate::error::{QueryError, invalid};

pub struct Extracting {
    doc: Document,
}

/// Collect the equalities every match of `query` must satisfy.
///
/// Field equalities, `$eq` and single-element `$in` contribute; so do the
/// branches of `$and` and of a single-branch `$or`. Everything else is
/// ignored.
pub fn extract(query: &Document) -> Result<Document, QueryError> {
    let mut state = Extracting {
        doc: Document::new(),
    };
    extractor().process(&mut state, query, "", true)?;
    Ok(state.doc)
}

fn extractor() -> Dispatcher<Extracting> {
    Dispatcher {
        top_level,
        expression,
        default: Some(extract_equality),
        expand_top_level: false,
        skip_missing: true,
    }
}

fn top_level(name: &str) -> Option<Operator<Extracting>> {
    let op: Operator<Extracting> = match name {
        "$and" => extract_and as Operator<Extracting>,
        "$or" => extract_or,
        _ => return None,
    };
    Some(op)
}

fn expression(name: &str) -> Option<Operator<Extracting>> {
    let op: Operator<Extracting> = match name {
        "$eq" => extract_equality as Operator<Extracting>,
        "$in" => extract_in,
        _ => return None,
    };
    Some(op)
}

fn branches<'a>(call: &Call<'a>) -> Result<Vec<&'a Document>, QueryError> {
    let Bson::Array(items) = call.value else {
        return Err(invalid(format!("{} must be an array", call.operator)));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Ok(d),
            _ => Err(invalid(format!("{} entries must be documents", call.operator))),
        })
        .collect()
}

fn extract_and(
    d: &Dispatcher<Extracting>,
    state: &mut Extracting,
    call: Call<'_>,
) -> Result<(), QueryError> {
    for query in branches(&call)? {
        d.process(state, query, "", true)?;
    }
    Ok(())
}

fn extract_or(
    d: &Dispatcher<Extracting>,
    state: &mut Extracting,
    call: Call<'_>,
) -> Result<(), QueryError> {
    if let [only] = branches(&call)?.as_slice() {
        d.process(state, only, "", true)?;
    }
    Ok(())
}

fn extract_equality(
    _: &Dispatcher<Extracting>,
    state: &mut Extracting,
    call: Call<'_>,
) -> Result<(), QueryError> {
    if matches!(call.value, Bson::RegularExpression(_)) {
        return Ok(());
    }
    put(&mut state.doc, call.path, call.value.clone(), false)?;
    Ok(())
}

fn extract_in(
    d: &Dispatcher<Extracting>,
    state: &mut Extracting,
    call: Call<'_>,
) -> Result<(), QueryError> {
    match call.value {
        Bson::Array(items) if items.len() == 1 => extract_equality(
            d,
            state,
            Call {
                value: &items[0],
                ..call
            },
        ),
        _ => Ok(()),
    }
}
