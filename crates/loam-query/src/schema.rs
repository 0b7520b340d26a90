//! `$jsonSchema` validation over a subset of draft 4 keywords.

use bson::{Bson, Document};

use crate::compare::{Number, compare, compare_numbers, equal, number};
use crate::error::{QueryError, invalid, unsupported};
use crate::pattern;
use crate::types::{integer, is_type};

pub(crate) fn validate_document(doc: &Document, schema: &Document) -> Result<bool, QueryError> {
    validate(&Bson::Document(doc.clone()), schema)
}

/// Validate `value` against `schema`. Object, array, string and numeric
/// keywords only constrain values of the matching type.
pub(crate) fn validate(value: &Bson, schema: &Document) -> Result<bool, QueryError> {
    for (keyword, argument) in schema {
        if !keyword_holds(value, schema, keyword, argument)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn keyword_holds(
    value: &Bson,
    schema: &Document,
    keyword: &str,
    argument: &Bson,
) -> Result<bool, QueryError> {
    match keyword {
        "title" | "description" => Ok(true),
        "bsonType" => any_type(value, argument, |spec| Ok(spec.clone())),
        "type" => any_type(value, argument, json_type),
        "enum" => {
            let options = array(keyword, argument)?;
            if options.is_empty() {
                return Err(invalid("enum must have at least one value"));
            }
            Ok(options.iter().any(|option| equal(value, option)))
        }
        "minimum" | "maximum" => {
            let (Some(found), Some(bound)) = (number(value), number(argument)) else {
                return match number(argument) {
                    Some(_) => Ok(true),
                    None => Err(invalid(format!("{keyword} must be a number"))),
                };
            };
            let exclusive_key = if keyword == "minimum" {
                "exclusiveMinimum"
            } else {
                "exclusiveMaximum"
            };
            let exclusive = matches!(schema.get(exclusive_key), Some(Bson::Boolean(true)));
            let ord = compare_numbers(found, bound);
            Ok(match (keyword, exclusive) {
                ("minimum", false) => ord.is_ge(),
                ("minimum", true) => ord.is_gt(),
                (_, false) => ord.is_le(),
                (_, true) => ord.is_lt(),
            })
        }
        "exclusiveMinimum" | "exclusiveMaximum" => {
            let Bson::Boolean(_) = argument else {
                return Err(invalid(format!("{keyword} must be a boolean")));
            };
            let base = if keyword == "exclusiveMinimum" {
                "minimum"
            } else {
                "maximum"
            };
            if !schema.contains_key(base) {
                return Err(invalid(format!("{keyword} requires {base}")));
            }
            Ok(true)
        }
        "minLength" | "maxLength" => {
            let limit = count(keyword, argument)?;
            Ok(match value {
                Bson::String(s) => {
                    let len = s.chars().count();
                    if keyword == "minLength" {
                        len >= limit
                    } else {
                        len <= limit
                    }
                }
                _ => true,
            })
        }
        "pattern" => {
            let Bson::String(source) = argument else {
                return Err(invalid("pattern must be a string"));
            };
            let regex = pattern::compile(source, "")?;
            Ok(match value {
                Bson::String(_) => pattern::is_match(&regex, value),
                _ => true,
            })
        }
        "required" => {
            let names = array(keyword, argument)?;
            let Bson::Document(doc) = value else {
                return Ok(true);
            };
            for name in names {
                let Bson::String(name) = name else {
                    return Err(invalid("required must be an array of strings"));
                };
                if !doc.contains_key(name) {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "properties" => {
            let properties = document(keyword, argument)?;
            let Bson::Document(doc) = value else {
                return Ok(true);
            };
            for (name, property) in properties {
                let property = document(name, property)?;
                if let Some(field) = doc.get(name) {
                    if !validate(field, property)? {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
        "additionalProperties" => {
            let Bson::Document(doc) = value else {
                return Ok(true);
            };
            let declared = match schema.get("properties") {
                Some(Bson::Document(p)) => Some(p),
                _ => None,
            };
            let extra = doc
                .iter()
                .filter(|(k, _)| !declared.is_some_and(|p| p.contains_key(k.as_str())));
            match argument {
                Bson::Boolean(true) => Ok(true),
                Bson::Boolean(false) => Ok(extra.count() == 0),
                Bson::Document(sub) => {
                    for (_, field) in extra {
                        if !validate(field, sub)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => Err(invalid("additionalProperties must be a boolean or a schema")),
            }
        }
        "minProperties" | "maxProperties" => {
            let limit = count(keyword, argument)?;
            Ok(match value {
                Bson::Document(doc) if keyword == "minProperties" => doc.len() >= limit,
                Bson::Document(doc) => doc.len() <= limit,
                _ => true,
            })
        }
        "items" => {
            let Bson::Array(elements) = value else {
                return match argument {
                    Bson::Document(_) | Bson::Array(_) => Ok(true),
                    _ => Err(invalid("items must be a schema or an array of schemas")),
                };
            };
            match argument {
                Bson::Document(sub) => {
                    for element in elements {
                        if !validate(element, sub)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Bson::Array(subs) => {
                    for (element, sub) in elements.iter().zip(subs) {
                        if !validate(element, document("items", sub)?)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => Err(invalid("items must be a schema or an array of schemas")),
            }
        }
        "minItems" | "maxItems" => {
            let limit = count(keyword, argument)?;
            Ok(match value {
                Bson::Array(items) if keyword == "minItems" => items.len() >= limit,
                Bson::Array(items) => items.len() <= limit,
                _ => true,
            })
        }
        "uniqueItems" => {
            let Bson::Boolean(unique) = argument else {
                return Err(invalid("uniqueItems must be a boolean"));
            };
            Ok(match value {
                Bson::Array(items) if *unique => all_distinct(items),
                _ => true,
            })
        }
        "allOf" | "anyOf" | "oneOf" => {
            let subs = array(keyword, argument)?;
            if subs.is_empty() {
                return Err(invalid(format!("{keyword} must be a nonempty array")));
            }
            let mut passed = 0;
            for sub in subs {
                if validate(value, document(keyword, sub)?)? {
                    passed += 1;
                }
            }
            Ok(match keyword {
                "allOf" => passed == subs.len(),
                "anyOf" => passed > 0,
                _ => passed == 1,
            })
        }
        "not" => Ok(!validate(value, document(keyword, argument)?)?),
        "dependencies" | "patternProperties" | "additionalItems" => {
            Err(unsupported(format!("$jsonSchema keyword '{keyword}'")))
        }
        other => Err(invalid(format!("unknown $jsonSchema keyword: {other}"))),
    }
}

fn any_type(
    value: &Bson,
    argument: &Bson,
    alias: fn(&Bson) -> Result<Bson, QueryError>,
) -> Result<bool, QueryError> {
    let specs: Vec<&Bson> = match argument {
        Bson::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    for spec in specs {
        let spec = alias(spec)?;
        let hit = match (&spec, value) {
            (Bson::String(s), Bson::Int32(_) | Bson::Int64(_)) if s == "integer" => true,
            (Bson::String(s), _) if s == "integer" => {
                matches!(number(value), Some(Number::Double(f)) if f.fract() == 0.0)
            }
            _ => is_type(value, &spec)?,
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Map JSON type names onto BSON aliases.
fn json_type(spec: &Bson) -> Result<Bson, QueryError> {
    let Bson::String(name) = spec else {
        return Err(invalid("type must be a string or array of strings"));
    };
    Ok(Bson::String(
        match name.as_str() {
            "object" | "array" | "string" | "null" | "number" | "integer" => name.as_str(),
            "boolean" => "bool",
            other => return Err(invalid(format!("unknown JSON type: {other}"))),
        }
        .to_string(),
    ))
}

fn all_distinct(items: &[Bson]) -> bool {
    let mut sorted: Vec<&Bson> = items.iter().collect();
    sorted.sort_by(|a, b| compare(a, b));
    sorted.windows(2).all(|pair| !equal(pair[0], pair[1]))
}

fn array<'a>(keyword: &str, argument: &'a Bson) -> Result<&'a Vec<Bson>, QueryError> {
    match argument {
        Bson::Array(items) => Ok(items),
        _ => Err(invalid(format!("{keyword} must be an array"))),
    }
}

fn document<'a>(keyword: &str, argument: &'a Bson) -> Result<&'a Document, QueryError> {
    match argument {
        Bson::Document(doc) => Ok(doc),
        _ => Err(invalid(format!("{keyword} must be a document"))),
    }
}

fn count(keyword: &str, argument: &Bson) -> Result<usize, QueryError> {
    integer(argument)
        .filter(|n| *n >= 0)
        .map(|n| n as usize)
        .ok_or_else(|| invalid(format!("{keyword} must be a non-negative integer")))
}
