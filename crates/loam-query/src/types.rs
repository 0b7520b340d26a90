use bson::Bson;

use crate::compare::{Number, number};
use crate::error::{QueryError, invalid};

/// Check `value` against a `$type`/`bsonType` specifier: an alias string,
/// a numeric type code, or `"number"`.
pub(crate) fn is_type(value: &Bson, spec: &Bson) -> Result<bool, QueryError> {
    let code = match spec {
        Bson::String(alias) => match alias.as_str() {
            "number" => {
                return Ok(matches!(
                    value,
                    Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)
                ));
            }
            other => alias_code(other)
                .ok_or_else(|| invalid(format!("unknown type name alias: {other}")))?,
        },
        other => match number(other) {
            Some(Number::Long(n)) => n,
            Some(Number::Double(f)) if f.fract() == 0.0 => f as i64,
            _ => return Err(invalid(format!("type must be a string or number, found {other}"))),
        },
    };
    Ok(type_code(value) == code)
}

fn alias_code(alias: &str) -> Option<i64> {
    Some(match alias {
        "double" => 1,
        "string" => 2,
        "object" => 3,
        "array" => 4,
        "binData" => 5,
        "undefined" => 6,
        "objectId" => 7,
        "bool" => 8,
        "date" => 9,
        "null" => 10,
        "regex" => 11,
        "dbPointer" => 12,
        "javascript" => 13,
        "symbol" => 14,
        "javascriptWithScope" => 15,
        "int" => 16,
        "timestamp" => 17,
        "long" => 18,
        "decimal" => 19,
        "minKey" => -1,
        "maxKey" => 127,
        _ => return None,
    })
}

fn type_code(value: &Bson) -> i64 {
    match value {
        Bson::Double(_) => 1,
        Bson::String(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::Binary(_) => 5,
        Bson::Undefined => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Null => 10,
        Bson::RegularExpression(_) => 11,
        Bson::DbPointer(_) => 12,
        Bson::JavaScriptCode(_) => 13,
        Bson::Symbol(_) => 14,
        Bson::JavaScriptCodeWithScope(_) => 15,
        Bson::Int32(_) => 16,
        Bson::Timestamp(_) => 17,
        Bson::Int64(_) => 18,
        Bson::Decimal128(_) => 19,
        Bson::MinKey => -1,
        Bson::MaxKey => 127,
    }
}

/// Interpret a numeric argument as an exact integer.
pub(crate) fn integer(value: &Bson) -> Option<i64> {
    match number(value)? {
        Number::Long(n) => Some(n),
        Number::Double(f) if f.fract() == 0.0 && f.is_finite() => Some(f as i64),
        Number::Double(_) => None,
    }
}

/// Truthiness as used by `$exists` and projections.
pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => match number(other) {
            Some(Number::Long(n)) => n != 0,
            Some(Number::Double(f)) => f != 0.0,
            None => true,
        },
    }
}
