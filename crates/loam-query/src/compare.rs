use std::cmp::Ordering;

use bson::{Bson, Decimal128, Document};

/// Canonical type classes, in sort order.
///
/// Values of different classes never compare equal; values within a class are
/// ordered by [`compare`]. Numbers of all widths share one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeClass {
    MinKey,
    Null,
    Number,
    String,
    Document,
    Array,
    Binary,
    ObjectId,
    Boolean,
    Date,
    Timestamp,
    Regex,
    JavaScript,
    MaxKey,
}

pub fn class_of(value: &Bson) -> TypeClass {
    match value {
        Bson::MinKey => TypeClass::MinKey,
        Bson::Null | Bson::Undefined => TypeClass::Null,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => {
            TypeClass::Number
        }
        Bson::String(_) | Bson::Symbol(_) => TypeClass::String,
        Bson::Document(_) => TypeClass::Document,
        Bson::Array(_) => TypeClass::Array,
        Bson::Binary(_) => TypeClass::Binary,
        Bson::ObjectId(_) => TypeClass::ObjectId,
        Bson::Boolean(_) => TypeClass::Boolean,
        Bson::DateTime(_) => TypeClass::Date,
        Bson::Timestamp(_) => TypeClass::Timestamp,
        Bson::RegularExpression(_) => TypeClass::Regex,
        Bson::MaxKey => TypeClass::MaxKey,
        _ => TypeClass::JavaScript,
    }
}

/// Compare two values by the canonical total order.
pub fn compare(a: &Bson, b: &Bson) -> Ordering {
    let (ca, cb) = (class_of(a), class_of(b));
    if ca != cb {
        return ca.cmp(&cb);
    }

    match (a, b) {
        _ if ca == TypeClass::Number => match (number(a), number(b)) {
            (Some(x), Some(y)) => compare_numbers(x, y),
            _ => Ordering::Equal,
        },
        (Bson::String(x) | Bson::Symbol(x), Bson::String(y) | Bson::Symbol(y)) => x.cmp(y),
        (Bson::Document(x), Bson::Document(y)) => compare_documents(x, y),
        (Bson::Array(x), Bson::Array(y)) => compare_arrays(x, y),
        (Bson::Binary(x), Bson::Binary(y)) => x
            .bytes
            .len()
            .cmp(&y.bytes.len())
            .then_with(|| u8::from(x.subtype).cmp(&u8::from(y.subtype)))
            .then_with(|| x.bytes.cmp(&y.bytes)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        (Bson::RegularExpression(x), Bson::RegularExpression(y)) => x
            .pattern
            .as_str()
            .cmp(y.pattern.as_str())
            .then_with(|| x.options.as_str().cmp(y.options.as_str())),
        (Bson::JavaScriptCode(x), Bson::JavaScriptCode(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Compare two possibly missing values. Missing orders as null.
pub fn compare_missing(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    compare(a.unwrap_or(&Bson::Null), b.unwrap_or(&Bson::Null))
}

/// Canonical equality: `1`, `1i64` and `1.0` are equal.
pub fn equal(a: &Bson, b: &Bson) -> bool {
    compare(a, b) == Ordering::Equal
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
        let ord = class_of(va)
            .cmp(&class_of(vb))
            .then_with(|| ka.cmp(kb))
            .then_with(|| compare(va, vb));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_arrays(a: &[Bson], b: &[Bson]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = compare(x, y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

// ── Numbers ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Long(i64),
    Double(f64),
}

pub(crate) fn number(value: &Bson) -> Option<Number> {
    match value {
        Bson::Int32(n) => Some(Number::Long(*n as i64)),
        Bson::Int64(n) => Some(Number::Long(*n)),
        Bson::Double(f) => Some(Number::Double(*f)),
        Bson::Decimal128(d) => Some(Number::Double(decimal_to_f64(d))),
        _ => None,
    }
}

pub(crate) fn compare_numbers(a: Number, b: Number) -> Ordering {
    match (a, b) {
        (Number::Long(x), Number::Long(y)) => x.cmp(&y),
        (Number::Double(x), Number::Double(y)) => compare_doubles(x, y),
        (Number::Long(x), Number::Double(y)) => compare_long_double(x, y),
        (Number::Double(x), Number::Long(y)) => compare_long_double(y, x).reverse(),
    }
}

/// NaN sorts below every other number and equal to itself.
fn compare_doubles(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_53: u64 = 1 << 53;

fn compare_long_double(long: i64, double: f64) -> Ordering {
    if double.is_nan() {
        return Ordering::Greater;
    }
    if double >= TWO_POW_63 {
        return Ordering::Less;
    }
    if double < -TWO_POW_63 {
        return Ordering::Greater;
    }
    if long.unsigned_abs() <= TWO_POW_53 {
        return compare_doubles(long as f64, double);
    }

    // Both sides fit in an i64 once the fraction is dropped.
    let truncated = double.trunc();
    match long.cmp(&(truncated as i64)) {
        Ordering::Equal => compare_doubles(truncated, double),
        ord => ord,
    }
}

/// Approximate a BID-encoded decimal128 as a double for ordering.
pub(crate) fn decimal_to_f64(value: &Decimal128) -> f64 {
    let bits = u128::from_le_bytes(value.bytes());
    let negative = bits >> 127 == 1;
    let sign = if negative { -1.0 } else { 1.0 };

    let combination = (bits >> 122) & 0x1f;
    if combination == 0x1f {
        return f64::NAN;
    }
    if combination == 0x1e {
        return sign * f64::INFINITY;
    }

    let (exponent, coefficient) = if (bits >> 125) & 0b11 == 0b11 {
        // Coefficients in this form exceed 34 digits and are non-canonical.
        (((bits >> 111) & 0x3fff) as i32, 0u128)
    } else {
        (((bits >> 113) & 0x3fff) as i32, bits & ((1u128 << 113) - 1))
    };

    if coefficient == 0 {
        return sign * 0.0;
    }
    sign * (coefficient as f64) * 10f64.powi(exponent - 6176)
}

#[cfg(test)]
mod tests {
    use bson::oid::ObjectId;
    use bson::{Binary, Timestamp, doc};

    use super::*;

    #[test]
    fn classes_order_across_types() {
        let ordered = vec![
            Bson::Null,
            Bson::Int32(5),
            Bson::String("a".into()),
            Bson::Document(doc! {}),
            Bson::Array(vec![]),
            Bson::Binary(Binary {
                subtype: bson::spec::BinarySubtype::Generic,
                bytes: vec![1],
            }),
            Bson::ObjectId(ObjectId::new()),
            Bson::Boolean(false),
            Bson::DateTime(bson::DateTime::from_millis(0)),
            Bson::Timestamp(Timestamp {
                time: 1,
                increment: 1,
            }),
        ];
        for pair in ordered.windows(2) {
            assert_eq!(compare(&pair[0], &pair[1]), Ordering::Less, "{pair:?}");
            assert_eq!(compare(&pair[1], &pair[0]), Ordering::Greater, "{pair:?}");
        }
    }

    #[test]
    fn numbers_compare_across_widths() {
        assert!(equal(&Bson::Int32(1), &Bson::Double(1.0)));
        assert!(equal(&Bson::Int64(7), &Bson::Int32(7)));
        assert_eq!(
            compare(&Bson::Int32(1), &Bson::Double(1.5)),
            Ordering::Less
        );
        assert_eq!(
            compare(&Bson::Double(f64::NAN), &Bson::Int64(i64::MIN)),
            Ordering::Less
        );
        assert!(equal(&Bson::Double(f64::NAN), &Bson::Double(f64::NAN)));
    }

    #[test]
    fn long_double_at_two_pow_53() {
        let limit = 1i64 << 53;
        assert!(equal(&Bson::Int64(limit), &Bson::Double(limit as f64)));
        // 2^53 + 1 is not representable as a double and must not collapse.
        assert_eq!(
            compare(&Bson::Int64(limit + 1), &Bson::Double(limit as f64)),
            Ordering::Greater
        );
        assert_eq!(
            compare(&Bson::Double(limit as f64), &Bson::Int64(limit + 1)),
            Ordering::Less
        );
    }

    #[test]
    fn long_double_at_two_pow_63() {
        assert_eq!(
            compare(&Bson::Int64(i64::MAX), &Bson::Double(TWO_POW_63)),
            Ordering::Less
        );
        assert_eq!(
            compare(&Bson::Int64(i64::MIN), &Bson::Double(-TWO_POW_63)),
            Ordering::Equal
        );
        assert_eq!(
            compare(&Bson::Int64(i64::MIN), &Bson::Double(-TWO_POW_63 * 2.0)),
            Ordering::Greater
        );
        assert_eq!(
            compare(&Bson::Double(f64::INFINITY), &Bson::Int64(i64::MAX)),
            Ordering::Greater
        );
    }

    #[test]
    fn large_long_against_fractional_double() {
        let big = (1i64 << 60) + 1;
        let double = (1i64 << 60) as f64 + 0.0;
        assert_eq!(
            compare(&Bson::Int64(big), &Bson::Double(double)),
            Ordering::Greater
        );
    }

    #[test]
    fn antisymmetric_over_sample() {
        let sample = vec![
            Bson::Null,
            Bson::Int32(-3),
            Bson::Int64(10),
            Bson::Double(2.5),
            Bson::Double(f64::NAN),
            Bson::String("b".into()),
            Bson::String("a".into()),
            Bson::Document(doc! { "a": 1 }),
            Bson::Document(doc! { "a": 1, "b": 2 }),
            Bson::Array(vec![Bson::Int32(1)]),
            Bson::Array(vec![Bson::Int32(1), Bson::Int32(0)]),
            Bson::Boolean(true),
        ];
        for a in &sample {
            for b in &sample {
                assert_eq!(compare(a, b), compare(b, a).reverse(), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn documents_compare_by_element_then_length() {
        let a = Bson::Document(doc! { "a": 1 });
        let b = Bson::Document(doc! { "a": 1, "b": 0 });
        let c = Bson::Document(doc! { "b": 1 });
        assert_eq!(compare(&a, &b), Ordering::Less);
        assert_eq!(compare(&b, &c), Ordering::Less);
    }

    #[test]
    fn missing_orders_as_null() {
        assert_eq!(compare_missing(None, Some(&Bson::Null)), Ordering::Equal);
        assert_eq!(
            compare_missing(None, Some(&Bson::Int32(0))),
            Ordering::Less
        );
    }

    #[test]
    fn decimal_compares_numerically() {
        // 1E0: coefficient 1, biased exponent 6176.
        let bits: u128 = (6176u128 << 113) | 1;
        let one = Decimal128::from_bytes(bits.to_le_bytes());
        assert!(equal(&Bson::Decimal128(one), &Bson::Int32(1)));
        assert_eq!(
            compare(&Bson::Decimal128(one), &Bson::Double(1.5)),
            Ordering::Less
        );
    }
}
