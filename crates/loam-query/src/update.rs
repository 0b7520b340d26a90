//! Update operators.
//!
//! [`apply`] mutates a document in place and returns a [`Changes`] record of
//! every path it wrote (with the final value) and every path it removed.

use std::cmp::Ordering;

use bson::{Bson, DateTime, Document};

use crate::clock;
use crate::compare::{compare, equal};
use crate::dispatch::{Call, Dispatcher, Operator};
use crate::document::{get, put, unset};
use crate::error::{QueryError, invalid, unsupported};
use crate::filter::matches;
use crate::pattern;
use crate::resolve::resolve;
use crate::sort::{SortDirection, SortKey, compare_by, direction_of, parse_sort};
use crate::types::integer;

/// Paths written and removed by one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    /// Dotted path to the value it now holds.
    pub updated: Document,
    pub removed: Vec<String>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

pub struct Applying<'a> {
    doc: &'a mut Document,
    upsert: bool,
    array_filters: &'a [Document],
    changes: Changes,
    touched: Vec<String>,
}

/// Apply `update` to `doc`. `upsert` enables `$setOnInsert`.
///
/// On error `doc` may be partially modified; callers work on a copy.
pub fn apply(
    doc: &mut Document,
    update: &Document,
    upsert: bool,
    array_filters: &[Document],
) -> Result<Changes, QueryError> {
    if update.is_empty() {
        return Err(invalid("update document is empty"));
    }
    if let Some(key) = update.keys().find(|k| !k.starts_with('$')) {
        return Err(invalid(format!(
            "update document requires atomic operators, found '{key}'"
        )));
    }

    let mut state = Applying {
        doc,
        upsert,
        array_filters,
        changes: Changes::default(),
        touched: Vec::new(),
    };
    updater().process(&mut state, update, "", true)?;
    Ok(state.changes)
}

fn updater<'a>() -> Dispatcher<Applying<'a>> {
    Dispatcher {
        top_level,
        expression: no_expressions,
        default: None,
        expand_top_level: true,
        skip_missing: false,
    }
}

fn no_expressions<'a>(_: &str) -> Option<Operator<Applying<'a>>> {
    None
}

fn top_level<'a>(name: &str) -> Option<Operator<Applying<'a>>> {
    let op: Operator<Applying<'a>> = match name {
        "$set" => update_set as Operator<Applying<'a>>,
        "$setOnInsert" => update_set_on_insert as Operator<Applying<'a>>,
        "$unset" => update_unset as Operator<Applying<'a>>,
        "$rename" => update_rename as Operator<Applying<'a>>,
        "$inc" | "$mul" => update_arithmetic as Operator<Applying<'a>>,
        "$max" | "$min" => update_extreme as Operator<Applying<'a>>,
        "$currentDate" => update_current_date as Operator<Applying<'a>>,
        "$push" => update_push as Operator<Applying<'a>>,
        "$pop" => update_pop as Operator<Applying<'a>>,
        "$pull" => update_pull as Operator<Applying<'a>>,
        "$pullAll" => update_pull_all as Operator<Applying<'a>>,
        "$addToSet" => update_add_to_set as Operator<Applying<'a>>,
        "$bit" => update_unsupported as Operator<Applying<'a>>,
        _ => return None,
    };
    Some(op)
}

// ── Bookkeeping ─────────────────────────────────────────────────

impl Applying<'_> {
    /// Resolve positional segments and claim the resulting paths.
    fn targets(&mut self, path: &str) -> Result<Vec<String>, QueryError> {
        let paths = resolve(self.doc, path, self.array_filters)?;
        for path in &paths {
            self.claim(path)?;
        }
        Ok(paths)
    }

    fn claim(&mut self, path: &str) -> Result<(), QueryError> {
        if let Some(other) = self.touched.iter().find(|t| conflicts(t, path)) {
            return Err(invalid(format!(
                "updating the path '{path}' would create a conflict at '{other}'"
            )));
        }
        self.touched.push(path.to_string());
        Ok(())
    }

    /// Write `value` at `path`. Rewriting an identical value (same numeric
    /// width included) is not a change.
    fn write(&mut self, path: &str, value: Bson) -> Result<(), QueryError> {
        if get(self.doc, path).is_some_and(|current| *current == value) {
            return Ok(());
        }
        put(self.doc, path, value.clone(), false)?;
        self.changes.updated.insert(path, value);
        Ok(())
    }

    fn remove(&mut self, path: &str) {
        let in_array = match path.rsplit_once('.') {
            Some((parent, _)) => matches!(get(self.doc, parent).as_deref(), Some(Bson::Array(_))),
            None => false,
        };
        if unset(self.doc, path).is_none() {
            return;
        }
        if in_array {
            self.changes.updated.insert(path, Bson::Null);
        } else {
            self.changes.removed.push(path.to_string());
        }
    }
}

fn conflicts(a: &str, b: &str) -> bool {
    a == b || is_prefix(a, b) || is_prefix(b, a)
}

fn is_prefix(prefix: &str, path: &str) -> bool {
    path.len() > prefix.len() && path.starts_with(prefix) && path.as_bytes()[prefix.len()] == b'.'
}

// ── Field operators ─────────────────────────────────────────────

fn update_set<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    for path in state.targets(call.path)? {
        state.write(&path, call.value.clone())?;
    }
    Ok(())
}

fn update_set_on_insert<'a>(
    d: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    if state.upsert {
        update_set(d, state, call)
    } else {
        state.targets(call.path).map(|_| ())
    }
}

fn update_unset<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    for path in state.targets(call.path)? {
        state.remove(&path);
    }
    Ok(())
}

fn update_rename<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let Bson::String(target) = call.value else {
        return Err(invalid(format!(
            "$rename target for '{}' must be a string",
            call.path
        )));
    };
    if call.path.contains('$') || target.contains('$') {
        return Err(invalid("$rename does not support positional paths"));
    }
    if call.path == target {
        return Err(invalid(format!("$rename source and target are both '{target}'")));
    }
    state.claim(call.path)?;
    state.claim(target)?;

    let Some(value) = get(state.doc, call.path).map(|v| v.into_owned()) else {
        return Ok(());
    };
    for path in [call.path, target.as_str()] {
        if let Some((parent, _)) = path.rsplit_once('.') {
            if matches!(get(state.doc, parent).as_deref(), Some(Bson::Array(_))) {
                return Err(invalid(format!("$rename cannot traverse the array at '{parent}'")));
            }
        }
    }
    state.remove(call.path);
    state.write(target, value)
}

// ── Arithmetic ──────────────────────────────────────────────────

enum Numeric {
    Int(i32),
    Long(i64),
    Double(f64),
}

fn numeric(value: &Bson) -> Result<Option<Numeric>, QueryError> {
    Ok(match value {
        Bson::Int32(n) => Some(Numeric::Int(*n)),
        Bson::Int64(n) => Some(Numeric::Long(*n)),
        Bson::Double(f) => Some(Numeric::Double(*f)),
        Bson::Decimal128(_) => return Err(unsupported("decimal arithmetic")),
        _ => None,
    })
}

fn widen(n: &Numeric) -> f64 {
    match n {
        Numeric::Int(i) => *i as f64,
        Numeric::Long(i) => *i as f64,
        Numeric::Double(f) => *f,
    }
}

fn long(n: &Numeric) -> Option<i64> {
    match n {
        Numeric::Int(i) => Some(*i as i64),
        Numeric::Long(i) => Some(*i),
        Numeric::Double(_) => None,
    }
}

/// Combine two numbers keeping the widest type. 32-bit overflow promotes to
/// 64 bits; 64-bit overflow is an error.
fn arithmetic(op: &str, a: &Numeric, b: &Numeric) -> Result<Bson, QueryError> {
    let (int_op, float_op): (fn(i64, i64) -> Option<i64>, fn(f64, f64) -> f64) = match op {
        "$inc" => (i64::checked_add, |x, y| x + y),
        _ => (i64::checked_mul, |x, y| x * y),
    };

    match (a, b) {
        (Numeric::Double(_), _) | (_, Numeric::Double(_)) => {
            Ok(Bson::Double(float_op(widen(a), widen(b))))
        }
        (Numeric::Int(x), Numeric::Int(y)) => {
            let wide = int_op(*x as i64, *y as i64)
                .ok_or_else(|| invalid(format!("{op} overflowed")))?;
            Ok(match i32::try_from(wide) {
                Ok(narrow) => Bson::Int32(narrow),
                Err(_) => Bson::Int64(wide),
            })
        }
        _ => match (long(a), long(b)) {
            (Some(x), Some(y)) => int_op(x, y)
                .map(Bson::Int64)
                .ok_or_else(|| invalid(format!("{op} overflowed a 64-bit integer"))),
            _ => Err(invalid(format!("{op} needs numeric operands"))),
        },
    }
}

fn update_arithmetic<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let Some(argument) = numeric(call.value)? else {
        return Err(invalid(format!(
            "cannot {} with non-numeric argument {}",
            call.operator, call.value
        )));
    };

    for path in state.targets(call.path)? {
        let current = get(state.doc, &path).map(|v| v.into_owned());
        let next = match current {
            None if call.operator == "$inc" => call.value.clone(),
            None => arithmetic("$mul", &Numeric::Int(0), &argument)?,
            Some(value) => {
                let Some(current) = numeric(&value)? else {
                    return Err(invalid(format!(
                        "cannot apply {} to non-numeric field '{path}'",
                        call.operator
                    )));
                };
                arithmetic(call.operator, &current, &argument)?
            }
        };
        state.write(&path, next)?;
    }
    Ok(())
}

fn update_extreme<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let wanted = if call.operator == "$max" {
        Ordering::Greater
    } else {
        Ordering::Less
    };
    for path in state.targets(call.path)? {
        let replace = match get(state.doc, &path) {
            None => true,
            Some(current) => compare(call.value, &current) == wanted,
        };
        if replace {
            state.write(&path, call.value.clone())?;
        }
    }
    Ok(())
}

fn update_current_date<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let timestamp = match call.value {
        Bson::Boolean(true) => false,
        Bson::Document(spec) if spec.len() == 1 => match spec.get("$type") {
            Some(Bson::String(kind)) if kind == "date" => false,
            Some(Bson::String(kind)) if kind == "timestamp" => true,
            _ => return Err(invalid("$currentDate $type must be 'date' or 'timestamp'")),
        },
        other => {
            return Err(invalid(format!(
                "$currentDate needs true or {{$type: ...}}, found {other}"
            )));
        }
    };

    for path in state.targets(call.path)? {
        let value = if timestamp {
            Bson::Timestamp(clock::now())
        } else {
            Bson::DateTime(DateTime::now())
        };
        state.write(&path, value)?;
    }
    Ok(())
}

fn update_unsupported<'a>(
    _: &Dispatcher<Applying<'a>>,
    _: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    Err(unsupported(format!("update operator {}", call.operator)))
}

// ── Array operators ─────────────────────────────────────────────

/// The array at `path`; a missing field reads as empty.
fn array_at(doc: &Document, path: &str, operator: &str) -> Result<Option<Vec<Bson>>, QueryError> {
    match get(doc, path).map(|v| v.into_owned()) {
        None => Ok(None),
        Some(Bson::Array(items)) => Ok(Some(items)),
        Some(other) => Err(invalid(format!(
            "{operator} needs an array at '{path}', found {other}"
        ))),
    }
}

enum PushSort {
    Values(SortDirection),
    Fields(Vec<SortKey>),
}

struct Push {
    each: Vec<Bson>,
    position: Option<i64>,
    sort: Option<PushSort>,
    slice: Option<i64>,
}

fn parse_push(value: &Bson) -> Result<Push, QueryError> {
    let modifiers = match value {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k == "$each") => d,
        other => {
            return Ok(Push {
                each: vec![other.clone()],
                position: None,
                sort: None,
                slice: None,
            });
        }
    };

    let mut push = Push {
        each: Vec::new(),
        position: None,
        sort: None,
        slice: None,
    };
    for (name, argument) in modifiers {
        match name.as_str() {
            "$each" => match argument {
                Bson::Array(items) => push.each = items.clone(),
                _ => return Err(invalid("$each needs an array")),
            },
            "$position" => {
                push.position = Some(
                    integer(argument).ok_or_else(|| invalid("$position needs an integer"))?,
                );
            }
            "$slice" => {
                push.slice =
                    Some(integer(argument).ok_or_else(|| invalid("$slice needs an integer"))?);
            }
            "$sort" => {
                push.sort = Some(match argument {
                    Bson::Document(spec) => {
                        if spec.is_empty() {
                            return Err(invalid("$sort pattern is empty"));
                        }
                        PushSort::Fields(parse_sort(spec)?)
                    }
                    other => PushSort::Values(
                        direction_of(other)
                            .ok_or_else(|| invalid("$sort needs 1, -1 or a sort pattern"))?,
                    ),
                });
            }
            other => return Err(invalid(format!("unknown $push modifier {other}"))),
        }
    }
    Ok(push)
}

fn update_push<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let push = parse_push(call.value)?;
    for path in state.targets(call.path)? {
        let mut items = array_at(state.doc, &path, "$push")?.unwrap_or_default();

        let len = items.len() as i64;
        let at = match push.position {
            None => len,
            Some(p) if p < 0 => (len + p).max(0),
            Some(p) => p.min(len),
        };
        let at = at as usize;
        items.splice(at..at, push.each.iter().cloned());

        match &push.sort {
            None => {}
            Some(PushSort::Values(direction)) => items.sort_by(|a, b| {
                let ord = compare(a, b);
                match direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            }),
            Some(PushSort::Fields(keys)) => items.sort_by(|a, b| {
                let empty = Document::new();
                let a = match a {
                    Bson::Document(d) => d,
                    _ => &empty,
                };
                let b = match b {
                    Bson::Document(d) => d,
                    _ => &empty,
                };
                compare_by(a, b, keys)
            }),
        }

        match push.slice {
            Some(n) if n >= 0 => items.truncate(n as usize),
            Some(n) => {
                let keep = n.unsigned_abs() as usize;
                if items.len() > keep {
                    items.drain(..items.len() - keep);
                }
            }
            None => {}
        }

        state.write(&path, Bson::Array(items))?;
    }
    Ok(())
}

fn update_pop<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let first = match integer(call.value) {
        Some(1) => false,
        Some(-1) => true,
        _ => return Err(invalid("$pop needs 1 or -1")),
    };
    for path in state.targets(call.path)? {
        let Some(mut items) = array_at(state.doc, &path, "$pop")? else {
            continue;
        };
        if items.is_empty() {
            continue;
        }
        if first {
            items.remove(0);
        } else {
            items.pop();
        }
        state.write(&path, Bson::Array(items))?;
    }
    Ok(())
}

/// Whether an array element is removed by a `$pull` condition.
fn pulls(element: &Bson, condition: &Bson) -> Result<bool, QueryError> {
    match condition {
        Bson::Document(query) if query.keys().next().is_some_and(|k| k.starts_with('$')) => {
            let mut wrapper = Document::new();
            wrapper.insert("e", element.clone());
            let mut wrapped = Document::new();
            wrapped.insert("e", Bson::Document(query.clone()));
            matches(&wrapper, &wrapped)
        }
        Bson::Document(query) => match element {
            Bson::Document(d) => matches(d, query),
            _ => Ok(false),
        },
        Bson::RegularExpression(regex) => {
            let compiled = pattern::compile(regex.pattern.as_str(), regex.options.as_str())?;
            Ok(pattern::is_match(&compiled, element) || element == condition)
        }
        other => Ok(equal(element, other)),
    }
}

fn update_pull<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    for path in state.targets(call.path)? {
        let Some(items) = array_at(state.doc, &path, "$pull")? else {
            continue;
        };
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            if !pulls(&item, call.value)? {
                kept.push(item);
            }
        }
        state.write(&path, Bson::Array(kept))?;
    }
    Ok(())
}

fn update_pull_all<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let Bson::Array(values) = call.value else {
        return Err(invalid("$pullAll needs an array"));
    };
    for path in state.targets(call.path)? {
        let Some(mut items) = array_at(state.doc, &path, "$pullAll")? else {
            continue;
        };
        items.retain(|item| !values.iter().any(|v| equal(item, v)));
        state.write(&path, Bson::Array(items))?;
    }
    Ok(())
}

fn update_add_to_set<'a>(
    _: &Dispatcher<Applying<'a>>,
    state: &mut Applying<'a>,
    call: Call<'_>,
) -> Result<(), QueryError> {
    let additions: Vec<Bson> = match call.value {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k == "$each") => {
            if d.len() != 1 {
                return Err(invalid("$addToSet only supports the $each modifier"));
            }
            match d.get("$each") {
                Some(Bson::Array(items)) => items.clone(),
                _ => return Err(invalid("$each needs an array")),
            }
        }
        other => vec![other.clone()],
    };

    for path in state.targets(call.path)? {
        let mut items = array_at(state.doc, &path, "$addToSet")?.unwrap_or_default();
        for addition in &additions {
            if !items.iter().any(|item| equal(item, addition)) {
                items.push(addition.clone());
            }
        }
        state.write(&path, Bson::Array(items))?;
    }
    Ok(())
}
