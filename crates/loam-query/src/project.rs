//! Projections: inclusion, exclusion, and `$slice` merge.

use bson::{Bson, Document};

use crate::document::{put, split_path};
use crate::error::{QueryError, invalid, unsupported};
use crate::types::{integer, truthy};

#[derive(Debug)]
enum Rule {
    Include,
    Exclude,
    Slice { skip: i64, limit: Option<i64> },
    Nested(Tree),
}

type Tree = Vec<(String, Rule)>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Inclusion,
    Exclusion,
}

/// Apply `projection` to `doc`.
pub fn project(doc: &Document, projection: &Document) -> Result<Document, QueryError> {
    let mut tree = Tree::new();
    for (path, value) in projection {
        insert(&mut tree, &split_path(path)?, path, parse_rule(path, value)?)?;
    }

    let mut mode = None;
    for (key, rule) in &tree {
        if key == "_id" && matches!(rule, Rule::Include | Rule::Exclude) {
            continue;
        }
        detect(rule, key, &mut mode)?;
    }

    let id_rule = tree.iter().find(|(k, _)| k == "_id").map(|(_, r)| r);
    match mode {
        Some(Mode::Inclusion) => {
            let mut out = include(doc, &tree)?;
            if !matches!(id_rule, Some(Rule::Exclude)) && !out.contains_key("_id") {
                if let Some(id) = doc.get("_id") {
                    put(&mut out, "_id", id.clone(), true)?;
                }
            }
            Ok(out)
        }
        Some(Mode::Exclusion) | None => {
            if matches!(id_rule, Some(Rule::Include)) && tree.len() == 1 {
                let mut out = Document::new();
                if let Some(id) = doc.get("_id") {
                    out.insert("_id", id.clone());
                }
                return Ok(out);
            }
            exclude(doc, &tree)
        }
    }
}

fn parse_rule(path: &str, value: &Bson) -> Result<Rule, QueryError> {
    match value {
        Bson::Document(spec) => match spec.keys().next() {
            Some(key) if key == "$slice" => {
                if spec.len() != 1 {
                    return Err(invalid(format!("$slice for '{path}' takes no siblings")));
                }
                parse_slice(path, spec.get("$slice").unwrap_or(&Bson::Null))
            }
            Some(key) if key.starts_with('$') => {
                Err(unsupported(format!("projection operator {key}")))
            }
            Some(_) => {
                let mut tree = Tree::new();
                for (sub, value) in spec {
                    insert(&mut tree, &split_path(sub)?, sub, parse_rule(sub, value)?)?;
                }
                Ok(Rule::Nested(tree))
            }
            None => Err(invalid(format!("empty projection for '{path}'"))),
        },
        Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => {
            Ok(if truthy(value) {
                Rule::Include
            } else {
                Rule::Exclude
            })
        }
        other => Err(unsupported(format!(
            "projection value {other} for '{path}'"
        ))),
    }
}

fn parse_slice(path: &str, value: &Bson) -> Result<Rule, QueryError> {
    match value {
        Bson::Array(args) if args.len() == 2 => {
            let (Some(skip), Some(limit)) = (integer(&args[0]), integer(&args[1])) else {
                return Err(invalid(format!("$slice for '{path}' needs integers")));
            };
            if limit <= 0 {
                return Err(invalid(format!("$slice limit for '{path}' must be positive")));
            }
            Ok(Rule::Slice {
                skip,
                limit: Some(limit),
            })
        }
        other => match integer(other) {
            Some(n) if n >= 0 => Ok(Rule::Slice {
                skip: 0,
                limit: Some(n),
            }),
            Some(n) => Ok(Rule::Slice {
                skip: n,
                limit: None,
            }),
            None => Err(invalid(format!(
                "$slice for '{path}' needs a number or [skip, limit]"
            ))),
        },
    }
}

fn insert(tree: &mut Tree, segments: &[&str], path: &str, rule: Rule) -> Result<(), QueryError> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(invalid("empty projection path"));
    };
    let position = tree.iter().position(|(k, _)| k == head);

    if rest.is_empty() {
        if position.is_some() {
            return Err(invalid(format!("path collision at '{path}'")));
        }
        tree.push((head.to_string(), rule));
        return Ok(());
    }

    let index = match position {
        Some(i) => i,
        None => {
            tree.push((head.to_string(), Rule::Nested(Tree::new())));
            tree.len() - 1
        }
    };
    match &mut tree[index].1 {
        Rule::Nested(sub) => insert(sub, rest, path, rule),
        _ => Err(invalid(format!("path collision at '{path}'"))),
    }
}

fn detect(rule: &Rule, path: &str, mode: &mut Option<Mode>) -> Result<(), QueryError> {
    let found = match rule {
        Rule::Include => Mode::Inclusion,
        Rule::Exclude => Mode::Exclusion,
        Rule::Slice { .. } => return Ok(()),
        Rule::Nested(tree) => {
            for (key, sub) in tree {
                detect(sub, &format!("{path}.{key}"), mode)?;
            }
            return Ok(());
        }
    };
    match mode {
        Some(existing) if *existing != found => Err(invalid(format!(
            "cannot mix inclusion and exclusion at '{path}'"
        ))),
        _ => {
            *mode = Some(found);
            Ok(())
        }
    }
}

fn include(doc: &Document, tree: &Tree) -> Result<Document, QueryError> {
    let mut out = Document::new();
    for (key, value) in doc {
        let Some((_, rule)) = tree.iter().find(|(k, _)| k == key) else {
            continue;
        };
        let projected = match (rule, value) {
            (Rule::Exclude, _) => continue,
            (Rule::Include, v) => v.clone(),
            (Rule::Slice { skip, limit }, v) => slice(v, *skip, *limit),
            (Rule::Nested(sub), Bson::Document(inner)) => Bson::Document(include(inner, sub)?),
            (Rule::Nested(sub), v @ Bson::Array(_)) => include_array(v, sub)?,
            (Rule::Nested(_), _) => continue,
        };
        out.insert(key, projected);
    }
    Ok(out)
}

fn include_array(value: &Bson, tree: &Tree) -> Result<Bson, QueryError> {
    let Bson::Array(items) = value else {
        return Ok(value.clone());
    };
    let mut kept = Vec::new();
    for item in items {
        match item {
            Bson::Document(inner) => kept.push(Bson::Document(include(inner, tree)?)),
            Bson::Array(_) => kept.push(include_array(item, tree)?),
            _ => {}
        }
    }
    Ok(Bson::Array(kept))
}

fn exclude(doc: &Document, tree: &Tree) -> Result<Document, QueryError> {
    let mut out = Document::new();
    for (key, value) in doc {
        let Some((_, rule)) = tree.iter().find(|(k, _)| k == key) else {
            out.insert(key, value.clone());
            continue;
        };
        let projected = match rule {
            Rule::Exclude => continue,
            Rule::Include => value.clone(),
            Rule::Slice { skip, limit } => slice(value, *skip, *limit),
            Rule::Nested(sub) => exclude_value(value, sub)?,
        };
        out.insert(key, projected);
    }
    Ok(out)
}

fn exclude_value(value: &Bson, tree: &Tree) -> Result<Bson, QueryError> {
    Ok(match value {
        Bson::Document(inner) => Bson::Document(exclude(inner, tree)?),
        Bson::Array(items) => Bson::Array(
            items
                .iter()
                .map(|item| exclude_value(item, tree))
                .collect::<Result<_, _>>()?,
        ),
        other => other.clone(),
    })
}

/// `$slice`: a positive limit from `skip`, or the last `|skip|` elements when
/// `limit` is absent. Negative skips count from the end.
fn slice(value: &Bson, skip: i64, limit: Option<i64>) -> Bson {
    let Bson::Array(items) = value else {
        return value.clone();
    };
    let len = items.len() as i64;
    let (start, count) = match limit {
        None => ((len + skip).max(0), len),
        Some(limit) => {
            let start = if skip < 0 { (len + skip).max(0) } else { skip.min(len) };
            (start, limit)
        }
    };
    Bson::Array(
        items
            .iter()
            .skip(start as usize)
            .take(count.max(0) as usize)
            .cloned()
            .collect(),
    )
}
