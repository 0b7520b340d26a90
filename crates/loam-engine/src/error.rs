use loam_query::QueryError;
use loam_store::StoreError;

/// Coarse classification of [`EngineError`] for callers that branch on the
/// kind of failure rather than its detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    ConstraintViolation,
    NotFound,
    Io,
    Unsupported,
    Canceled,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed argument, reserved `_id` mutation or conflicting options.
    #[error("{0}")]
    Validation(String),
    /// A unique index already holds an entry with this key.
    #[error("duplicate key in index '{index}': {key}")]
    DuplicateKey { index: String, key: String },
    /// Duplicate index name or key, invalid handle.
    #[error("{0}")]
    Constraint(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("operation canceled")]
    Canceled,
    #[error("transaction is read-only")]
    ReadOnly,
    #[error("engine is closed")]
    Closed,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::ReadOnly => ErrorKind::Validation,
            Self::DuplicateKey { .. } | Self::Constraint(_) => ErrorKind::ConstraintViolation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Io,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Canceled | Self::Closed => ErrorKind::Canceled,
        }
    }
}

impl From<QueryError> for EngineError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Validation(msg) => Self::Validation(msg),
            QueryError::Unsupported(msg) => Self::Unsupported(msg),
        }
    }
}

pub(crate) fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}
