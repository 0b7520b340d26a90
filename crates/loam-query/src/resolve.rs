//! Expansion of positional update paths into concrete paths.

use bson::{Bson, Document};

use crate::document::{array_index, split_path};
use crate::error::{QueryError, invalid, unsupported};
use crate::filter::matches;

/// Expand `$[]` and `$[identifier]` segments of `path` against `doc`.
///
/// `array_filters` holds one filter per identifier, each a document whose
/// keys all start with the identifier (`{"x.a": {$gt: 1}}` filters `$[x]`).
pub fn resolve(
    doc: &Document,
    path: &str,
    array_filters: &[Document],
) -> Result<Vec<String>, QueryError> {
    let segments = split_path(path)?;
    if segments[0].starts_with('$') {
        return Err(invalid(format!("cannot resolve root positional path '{path}'")));
    }
    if !segments.iter().any(|s| s.starts_with('$')) {
        return Ok(vec![path.to_string()]);
    }

    let root = doc.get(segments[0]);
    let mut out = Vec::new();
    expand(
        root,
        &segments[1..],
        segments[0].to_string(),
        array_filters,
        &mut out,
    )?;
    Ok(out)
}

fn expand(
    value: Option<&Bson>,
    segments: &[&str],
    prefix: String,
    array_filters: &[Document],
    out: &mut Vec<String>,
) -> Result<(), QueryError> {
    let Some((head, rest)) = segments.split_first() else {
        out.push(prefix);
        return Ok(());
    };

    if *head == "$" {
        return Err(unsupported("the positional operator '$'"));
    }

    if let Some(identifier) = head.strip_prefix("$[").and_then(|s| s.strip_suffix(']')) {
        let Some(Bson::Array(items)) = value else {
            return Err(invalid(format!(
                "cannot apply array updates to non-array element at '{prefix}'"
            )));
        };
        let filter = if identifier.is_empty() {
            None
        } else {
            Some(array_filter(identifier, array_filters)?)
        };

        for (index, item) in items.iter().enumerate() {
            if let Some(filter) = filter {
                let mut wrapper = Document::new();
                wrapper.insert(identifier, item.clone());
                if !matches(&wrapper, filter)? {
                    continue;
                }
            }
            expand(
                Some(item),
                rest,
                format!("{prefix}.{index}"),
                array_filters,
                out,
            )?;
        }
        return Ok(());
    }

    if head.starts_with('$') {
        return Err(invalid(format!("unknown positional operator '{head}'")));
    }

    let child = match value {
        Some(Bson::Document(doc)) => doc.get(*head),
        Some(Bson::Array(items)) => array_index(head).and_then(|i| items.get(i)),
        _ => None,
    };
    expand(child, rest, format!("{prefix}.{head}"), array_filters, out)
}

fn array_filter<'a>(
    identifier: &str,
    array_filters: &'a [Document],
) -> Result<&'a Document, QueryError> {
    array_filters
        .iter()
        .find(|filter| {
            filter.keys().next().is_some_and(|key| {
                key.split('.').next() == Some(identifier)
            })
        })
        .ok_or_else(|| {
            invalid(format!(
                "no array filter found for identifier '{identifier}'"
            ))
        })
}
