use bson::Bson;
use regex::{Regex, RegexBuilder};

use crate::error::{QueryError, invalid};

/// Compile a pattern with Mongo-style option letters.
pub(crate) fn compile(pattern: &str, options: &str) -> Result<Regex, QueryError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            // Unicode matching is always on.
            'u' => {}
            other => return Err(invalid(format!("invalid regex flag '{other}'"))),
        }
    }
    builder
        .build()
        .map_err(|e| invalid(format!("invalid regex '{pattern}': {e}")))
}

/// Whether `value` is a string matched by `regex`.
pub(crate) fn is_match(regex: &Regex, value: &Bson) -> bool {
    match value {
        Bson::String(s) | Bson::Symbol(s) => regex.is_match(s),
        _ => false,
    }
}
