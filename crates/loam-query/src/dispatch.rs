//! Generic operator dispatcher shared by match, apply and extract.
//!
//! A [`Dispatcher`] walks a query or update document and invokes operators
//! looked up in the tables it was constructed with:
//!
//! - `$`-prefixed keys at the root are top-level operators (`$and`, `$set`).
//!   With `expand_top_level`, the operator's value must be a document and the
//!   operator is invoked once per entry (`{$set: {a: 1, b: 2}}` calls `$set`
//!   twice).
//! - Other keys are field paths. A document value whose first key starts with
//!   `$` holds expression operators applied to that path; any other value is
//!   handed to the default operator.

use bson::{Bson, Document};

use crate::error::{QueryError, invalid};

/// A single operator invocation.
#[derive(Debug, Clone, Copy)]
pub struct Call<'a> {
    /// Operator name including the `$`, or empty for the default operator.
    pub operator: &'a str,
    /// Absolute field path, empty for top-level operators.
    pub path: &'a str,
    /// Operator argument.
    pub value: &'a Bson,
    /// For expression operators, the operator document the call came from.
    pub siblings: Option<&'a Document>,
}

pub type Operator<S> = fn(&Dispatcher<S>, &mut S, Call<'_>) -> Result<(), QueryError>;

/// Operator lookup by name.
pub type Table<S> = fn(&str) -> Option<Operator<S>>;

pub struct Dispatcher<S> {
    pub top_level: Table<S>,
    pub expression: Table<S>,
    pub default: Option<Operator<S>>,
    pub expand_top_level: bool,
    pub skip_missing: bool,
}

impl<S> Dispatcher<S> {
    /// Visit every entry of `query`. `prefix` is prepended to field paths.
    pub fn process(
        &self,
        state: &mut S,
        query: &Document,
        prefix: &str,
        root: bool,
    ) -> Result<(), QueryError> {
        for (key, value) in query {
            if key.starts_with('$') {
                if !root {
                    return Err(invalid(format!("unexpected operator '{key}' in field position")));
                }
                self.top_level_call(state, key, value)?;
                continue;
            }

            let path = join(prefix, key);
            if let Bson::Document(operators) = value {
                if operators.keys().next().is_some_and(|k| k.starts_with('$')) {
                    self.expressions(state, &path, operators)?;
                    continue;
                }
            }

            match self.default {
                Some(op) => op(
                    self,
                    state,
                    Call {
                        operator: "",
                        path: &path,
                        value,
                        siblings: None,
                    },
                )?,
                None => return Err(invalid("missing default operator")),
            }
        }
        Ok(())
    }

    /// Apply every entry of an operator document to `path`.
    pub fn expressions(
        &self,
        state: &mut S,
        path: &str,
        operators: &Document,
    ) -> Result<(), QueryError> {
        for (name, value) in operators {
            if !name.starts_with('$') {
                return Err(invalid(format!(
                    "expected only operators for '{path}', found '{name}'"
                )));
            }
            match (self.expression)(name) {
                Some(op) => op(
                    self,
                    state,
                    Call {
                        operator: name,
                        path,
                        value,
                        siblings: Some(operators),
                    },
                )?,
                None if self.skip_missing => {}
                None => return Err(invalid(format!("unknown expression operator: {name}"))),
            }
        }
        Ok(())
    }

    fn top_level_call(&self, state: &mut S, name: &str, value: &Bson) -> Result<(), QueryError> {
        let Some(op) = (self.top_level)(name) else {
            if self.skip_missing {
                return Ok(());
            }
            return Err(invalid(format!("unknown top level operator: {name}")));
        };

        if !self.expand_top_level {
            return op(
                self,
                state,
                Call {
                    operator: name,
                    path: "",
                    value,
                    siblings: None,
                },
            );
        }

        let Bson::Document(entries) = value else {
            return Err(invalid(format!("{name} expects a document, found {value}")));
        };
        if entries.is_empty() {
            return Err(invalid(format!("'{name}' is empty")));
        }
        for (path, argument) in entries {
            op(
                self,
                state,
                Call {
                    operator: name,
                    path,
                    value: argument,
                    siblings: None,
                },
            )?;
        }
        Ok(())
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
