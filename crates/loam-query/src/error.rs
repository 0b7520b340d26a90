/// Errors raised while interpreting query, update and projection documents.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// A malformed operator argument, schema or path.
    #[error("{0}")]
    Validation(String),
    /// A recognised but unimplemented operator or option.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub(crate) fn invalid(msg: impl Into<String>) -> QueryError {
    QueryError::Validation(msg.into())
}

pub(crate) fn unsupported(msg: impl Into<String>) -> QueryError {
    QueryError::Unsupported(msg.into())
}
