//! Query matching.
//!
//! A field condition is tested against every value the path reaches: the
//! leaves found by fanning out over arrays, plus the elements of any leaf that
//! is itself an array. The condition holds if any of them satisfies it.

use std::cmp::Ordering;

use bson::{Bson, Document};

use crate::compare::{TypeClass, class_of, compare, equal};
use crate::dispatch::{Call, Dispatcher, Operator};
use crate::document::all;
use crate::error::{QueryError, invalid, unsupported};
use crate::types::{integer, is_type, truthy};
use crate::{pattern, schema};

/// Dispatch state for a single match.
///
/// Every condition is visited even once the outcome is known, so a malformed
/// operator fails regardless of where it appears.
pub struct Matching<'d> {
    doc: &'d Document,
    matched: bool,
}

/// Test `doc` against `query`.
pub fn matches(doc: &Document, query: &Document) -> Result<bool, QueryError> {
    let mut state = Matching { doc, matched: true };
    matcher().process(&mut state, query, "", true)?;
    Ok(state.matched)
}

fn matcher<'d>() -> Dispatcher<Matching<'d>> {
    Dispatcher {
        top_level,
        expression,
        default: Some(match_default),
        expand_top_level: false,
        skip_missing: false,
    }
}

fn top_level<'d>(name: &str) -> Option<Operator<Matching<'d>>> {
    let op: Operator<Matching<'d>> = match name {
        "$and" => match_and as Operator<Matching<'d>>,
        "$or" => match_or as Operator<Matching<'d>>,
        "$nor" => match_nor as Operator<Matching<'d>>,
        "$not" => match_not_top as Operator<Matching<'d>>,
        "$jsonSchema" => match_schema_top as Operator<Matching<'d>>,
        "$comment" => match_comment as Operator<Matching<'d>>,
        "$where" | "$expr" | "$text" => match_unsupported as Operator<Matching<'d>>,
        _ => return None,
    };
    Some(op)
}

fn expression<'d>(name: &str) -> Option<Operator<Matching<'d>>> {
    let op: Operator<Matching<'d>> = match name {
        "$eq" => match_eq as Operator<Matching<'d>>,
        "$ne" => match_ne as Operator<Matching<'d>>,
        "$gt" | "$gte" | "$lt" | "$lte" => match_compare as Operator<Matching<'d>>,
        "$in" => match_in as Operator<Matching<'d>>,
        "$nin" => match_nin as Operator<Matching<'d>>,
        "$exists" => match_exists as Operator<Matching<'d>>,
        "$type" => match_type as Operator<Matching<'d>>,
        "$size" => match_size as Operator<Matching<'d>>,
        "$all" => match_all as Operator<Matching<'d>>,
        "$elemMatch" => match_elem as Operator<Matching<'d>>,
        "$regex" => match_regex as Operator<Matching<'d>>,
        "$options" => match_options as Operator<Matching<'d>>,
        "$mod" => match_mod as Operator<Matching<'d>>,
        "$not" => match_not as Operator<Matching<'d>>,
        "$jsonSchema" => match_schema as Operator<Matching<'d>>,
        _ => return None,
    };
    Some(op)
}

fn settle(state: &mut Matching<'_>, ok: bool) -> Result<(), QueryError> {
    if !ok {
        state.matched = false;
    }
    Ok(())
}

// ── Field values ────────────────────────────────────────────────

/// Leaves reached by `path`, or `None` when the path is missing.
fn leaves(doc: &Document, path: &str) -> Option<Vec<Bson>> {
    match all(doc, path, true, false)? {
        Bson::Array(found) => Some(found),
        other => Some(vec![other]),
    }
}

/// Leaves plus the elements of array leaves.
fn candidates(leaves: &[Bson]) -> Vec<&Bson> {
    let mut out = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        if let Bson::Array(items) = leaf {
            out.extend(items.iter());
        }
        out.push(leaf);
    }
    out
}

fn equals(found: Option<&[Bson]>, argument: &Bson) -> bool {
    match found {
        None => matches!(argument, Bson::Null),
        Some(leaves) => candidates(leaves).into_iter().any(|c| equal(c, argument)),
    }
}

fn regex_matches(found: Option<&[Bson]>, pattern: &str, options: &str) -> Result<bool, QueryError> {
    let compiled = pattern::compile(pattern, options)?;
    let Some(leaves) = found else {
        return Ok(false);
    };
    Ok(candidates(leaves).into_iter().any(|c| match c {
        Bson::RegularExpression(r) => r.pattern.as_str() == pattern && r.options.as_str() == options,
        other => pattern::is_match(&compiled, other),
    }))
}

/// Equality where a regex argument matches strings instead.
fn equals_or_regex(found: Option<&[Bson]>, argument: &Bson) -> Result<bool, QueryError> {
    match argument {
        Bson::RegularExpression(regex) => {
            regex_matches(found, regex.pattern.as_str(), regex.options.as_str())
        }
        other => Ok(equals(found, other)),
    }
}

// ── Top level ───────────────────────────────────────────────────

fn branches<'a>(call: &Call<'a>) -> Result<Vec<&'a Document>, QueryError> {
    let Bson::Array(items) = call.value else {
        return Err(invalid(format!("{} must be an array", call.operator)));
    };
    if items.is_empty() {
        return Err(invalid(format!(
            "{} must be a nonempty array",
            call.operator
        )));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(d) => Ok(d),
            _ => Err(invalid(format!(
                "{} entries must be documents",
                call.operator
            ))),
        })
        .collect()
}

fn branch<'d>(
    d: &Dispatcher<Matching<'d>>,
    doc: &'d Document,
    query: &Document,
) -> Result<bool, QueryError> {
    let mut sub = Matching { doc, matched: true };
    d.process(&mut sub, query, "", true)?;
    Ok(sub.matched)
}

fn match_and<'d>(
    d: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let mut ok = true;
    for query in branches(&call)? {
        ok &= branch(d, state.doc, query)?;
    }
    settle(state, ok)
}

fn match_or<'d>(
    d: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let mut ok = false;
    for query in branches(&call)? {
        ok |= branch(d, state.doc, query)?;
    }
    settle(state, ok)
}

fn match_nor<'d>(
    d: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let mut any = false;
    for query in branches(&call)? {
        any |= branch(d, state.doc, query)?;
    }
    settle(state, !any)
}

fn match_not_top<'d>(
    d: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let Bson::Document(query) = call.value else {
        return Err(invalid("$not must be a document"));
    };
    let ok = !branch(d, state.doc, query)?;
    settle(state, ok)
}

fn match_schema_top<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let Bson::Document(definition) = call.value else {
        return Err(invalid("$jsonSchema must be a document"));
    };
    let ok = schema::validate_document(state.doc, definition)?;
    settle(state, ok)
}

fn match_comment<'d>(
    _: &Dispatcher<Matching<'d>>,
    _: &mut Matching<'d>,
    _: Call<'_>,
) -> Result<(), QueryError> {
    Ok(())
}

fn match_unsupported<'d>(
    _: &Dispatcher<Matching<'d>>,
    _: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    Err(unsupported(format!("query operator {}", call.operator)))
}

// ── Expressions ─────────────────────────────────────────────────

fn match_default<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let found = leaves(state.doc, call.path);
    let ok = equals_or_regex(found.as_deref(), call.value)?;
    settle(state, ok)
}

fn match_eq<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let found = leaves(state.doc, call.path);
    let ok = equals(found.as_deref(), call.value);
    settle(state, ok)
}

fn match_ne<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let found = leaves(state.doc, call.path);
    let ok = !equals(found.as_deref(), call.value);
    settle(state, ok)
}

fn match_compare<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let accept: fn(Ordering) -> bool = match call.operator {
        "$gt" => Ordering::is_gt,
        "$gte" => Ordering::is_ge,
        "$lt" => Ordering::is_lt,
        _ => Ordering::is_le,
    };
    let inclusive = matches!(call.operator, "$gte" | "$lte");

    let ok = match leaves(state.doc, call.path) {
        None => inclusive && matches!(call.value, Bson::Null),
        Some(found) => {
            let target = class_of(call.value);
            let bracketless = matches!(target, TypeClass::MinKey | TypeClass::MaxKey);
            candidates(&found).into_iter().any(|c| {
                (bracketless || class_of(c) == target) && accept(compare(c, call.value))
            })
        }
    };
    settle(state, ok)
}

fn in_list(found: Option<&[Bson]>, call: &Call<'_>) -> Result<bool, QueryError> {
    let Bson::Array(items) = call.value else {
        return Err(invalid(format!("{} needs an array", call.operator)));
    };
    let mut ok = false;
    for item in items {
        if matches!(item, Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')))
        {
            return Err(invalid(format!(
                "cannot nest operators inside {}",
                call.operator
            )));
        }
        ok |= equals_or_regex(found, item)?;
    }
    Ok(ok)
}

fn match_in<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let found = leaves(state.doc, call.path);
    let ok = in_list(found.as_deref(), &call)?;
    settle(state, ok)
}

fn match_nin<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let found = leaves(state.doc, call.path);
    let ok = !in_list(found.as_deref(), &call)?;
    settle(state, ok)
}

fn match_exists<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let present = leaves(state.doc, call.path).is_some();
    settle(state, present == truthy(call.value))
}

fn match_type<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let specs: Vec<&Bson> = match call.value {
        Bson::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    for spec in &specs {
        is_type(&Bson::Null, spec)?;
    }
    let Some(found) = leaves(state.doc, call.path) else {
        return settle(state, false);
    };

    let mut ok = false;
    'outer: for candidate in candidates(&found) {
        for spec in &specs {
            if is_type(candidate, spec)? {
                ok = true;
                break 'outer;
            }
        }
    }
    settle(state, ok)
}

fn match_size<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let size = integer(call.value)
        .filter(|n| *n >= 0)
        .ok_or_else(|| invalid(format!("$size needs a non-negative integer, found {}", call.value)))?;
    let ok = leaves(state.doc, call.path).is_some_and(|found| {
        found
            .iter()
            .any(|leaf| matches!(leaf, Bson::Array(items) if items.len() as i64 == size))
    });
    settle(state, ok)
}

fn match_all<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let Bson::Array(items) = call.value else {
        return Err(invalid("$all needs an array"));
    };
    if items.is_empty() {
        return settle(state, false);
    }

    let found = leaves(state.doc, call.path);
    let mut all = true;
    for item in items {
        all &= match item {
            Bson::Document(d) if d.keys().next().is_some_and(|k| k == "$elemMatch") => {
                let Some(Bson::Document(query)) = d.get("$elemMatch") else {
                    return Err(invalid("$elemMatch needs a document"));
                };
                elem_match(found.as_deref(), query)?
            }
            other => equals_or_regex(found.as_deref(), other)?,
        };
    }
    settle(state, all)
}

fn operator_style(query: &Document) -> bool {
    query
        .keys()
        .next()
        .is_some_and(|k| k.starts_with('$') && !matches!(k.as_str(), "$and" | "$or" | "$nor"))
}

fn elem_match(found: Option<&[Bson]>, query: &Document) -> Result<bool, QueryError> {
    let Some(leaves) = found else {
        return Ok(false);
    };
    let wrapped = operator_style(query);
    let condition = doc_with("e", Bson::Document(query.clone()));

    for leaf in leaves {
        let Bson::Array(elements) = leaf else {
            continue;
        };
        for element in elements {
            let ok = if wrapped {
                matches(&doc_with("e", element.clone()), &condition)?
            } else {
                match element {
                    Bson::Document(d) => matches(d, query)?,
                    _ => false,
                }
            };
            if ok {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn doc_with(key: &str, value: Bson) -> Document {
    let mut doc = Document::new();
    doc.insert(key, value);
    doc
}

fn match_elem<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let Bson::Document(query) = call.value else {
        return Err(invalid("$elemMatch needs a document"));
    };
    let found = leaves(state.doc, call.path);
    let ok = elem_match(found.as_deref(), query)?;
    settle(state, ok)
}

fn regex_argument(call: &Call<'_>) -> Result<(String, String), QueryError> {
    let extra = match call.siblings.and_then(|s| s.get("$options")) {
        None => "",
        Some(Bson::String(options)) => options.as_str(),
        Some(_) => return Err(invalid("$options needs a string")),
    };
    match call.value {
        Bson::String(p) => Ok((p.clone(), extra.to_string())),
        Bson::RegularExpression(r) => Ok((
            r.pattern.as_str().to_string(),
            format!("{}{extra}", r.options.as_str()),
        )),
        other => Err(invalid(format!("$regex needs a string or regex, found {other}"))),
    }
}

fn match_regex<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let (pattern, options) = regex_argument(&call)?;
    let found = leaves(state.doc, call.path);
    let ok = regex_matches(found.as_deref(), &pattern, &options)?;
    settle(state, ok)
}

fn match_options<'d>(
    _: &Dispatcher<Matching<'d>>,
    _: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    if call.siblings.is_some_and(|s| s.contains_key("$regex")) {
        Ok(())
    } else {
        Err(invalid("$options needs a $regex"))
    }
}

fn match_mod<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let (divisor, remainder) = match call.value {
        Bson::Array(items) if items.len() == 2 => {
            match (truncated(&items[0]), truncated(&items[1])) {
                (Some(d), Some(r)) => (d, r),
                _ => return Err(invalid("$mod arguments must be numbers")),
            }
        }
        _ => return Err(invalid("$mod needs an array of [divisor, remainder]")),
    };
    if divisor == 0 {
        return Err(invalid("$mod divisor cannot be 0"));
    }

    let ok = leaves(state.doc, call.path).is_some_and(|found| {
        candidates(&found)
            .into_iter()
            .filter_map(truncated)
            .any(|n| n.checked_rem(divisor).unwrap_or(0) == remainder)
    });
    settle(state, ok)
}

fn truncated(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(f) if f.is_finite() => Some(f.trunc() as i64),
        _ => None,
    }
}

fn match_not<'d>(
    d: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let ok = match call.value {
        Bson::Document(operators) => {
            if operators.is_empty() {
                return Err(invalid("$not cannot be empty"));
            }
            let mut sub = Matching {
                doc: state.doc,
                matched: true,
            };
            d.expressions(&mut sub, call.path, operators)?;
            !sub.matched
        }
        Bson::RegularExpression(regex) => {
            let found = leaves(state.doc, call.path);
            !regex_matches(found.as_deref(), regex.pattern.as_str(), regex.options.as_str())?
        }
        _ => return Err(invalid("$not needs a regex or a document")),
    };
    settle(state, ok)
}

fn match_schema<'d>(
    _: &Dispatcher<Matching<'d>>,
    state: &mut Matching<'d>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let Bson::Document(definition) = call.value else {
        return Err(invalid("$jsonSchema must be a document"));
    };
    let ok = match leaves(state.doc, call.path) {
        None => false,
        Some(found) => {
            let mut ok = false;
            for leaf in &found {
                if schema::validate(leaf, definition)? {
                    ok = true;
                    break;
                }
            }
            ok
        }
    };
    settle(state, ok)
}
