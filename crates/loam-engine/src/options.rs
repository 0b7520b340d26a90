use bson::Document;

use crate::collection::{Collection, WriteResult};
use crate::error::EngineError;

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: usize,
    pub limit: Option<usize>,
    pub projection: Option<Document>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub sort: Option<Document>,
    /// `None` updates every match.
    pub limit: Option<usize>,
    pub upsert: bool,
    pub array_filters: Vec<Document>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplaceOptions {
    pub sort: Option<Document>,
    pub upsert: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub sort: Option<Document>,
    /// `None` deletes every match.
    pub limit: Option<usize>,
}

/// One entry of a bulk write.
#[derive(Debug, Clone)]
pub enum Operation {
    Insert(Document),
    Replace {
        query: Document,
        replacement: Document,
        options: ReplaceOptions,
    },
    Update {
        query: Document,
        update: Document,
        options: UpdateOptions,
    },
    Delete {
        query: Document,
        options: DeleteOptions,
    },
}

impl Operation {
    /// Run against `coll`, upserting when nothing matched and the options ask
    /// for it.
    pub(crate) fn execute(&self, coll: &mut Collection) -> Result<WriteResult, EngineError> {
        match self {
            Operation::Insert(doc) => coll.insert(doc.clone()),
            Operation::Replace {
                query,
                replacement,
                options,
            } => {
                let result = coll.replace(query, replacement, options.sort.as_ref())?;
                if result.matched == 0 && options.upsert {
                    return coll.upsert(query, Some(replacement), None, &[]);
                }
                Ok(result)
            }
            Operation::Update {
                query,
                update,
                options,
            } => {
                let result = coll.update(
                    query,
                    update,
                    options.sort.as_ref(),
                    options.limit,
                    &options.array_filters,
                )?;
                if result.matched == 0 && options.upsert {
                    return coll.upsert(query, None, Some(update), &options.array_filters);
                }
                Ok(result)
            }
            Operation::Delete { query, options } => {
                coll.delete(query, options.sort.as_ref(), options.limit)
            }
        }
    }
}
