use std::fmt;

use crate::error::EngineError;

const OPLOG_DB: &str = "local";
const OPLOG_COLL: &str = "oplog";

/// A `(database, collection)` pair. An empty collection names the whole
/// database.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle {
    pub db: String,
    pub coll: String,
}

impl Handle {
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    pub fn database(db: impl Into<String>) -> Self {
        Self::new(db, "")
    }

    pub fn oplog() -> Self {
        Self::new(OPLOG_DB, OPLOG_COLL)
    }

    pub fn is_oplog(&self) -> bool {
        self.db == OPLOG_DB && self.coll == OPLOG_COLL
    }

    pub fn is_database(&self) -> bool {
        self.coll.is_empty()
    }

    /// `db.coll`, as used for snapshot keys and index specs.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.db, self.coll)
    }

    /// Split `db.coll` at the first dot.
    pub fn parse(namespace: &str) -> Option<Handle> {
        let (db, coll) = namespace.split_once('.')?;
        (!db.is_empty()).then(|| Handle::new(db, coll))
    }

    pub(crate) fn validate_database(&self) -> Result<(), EngineError> {
        if self.db.is_empty() || self.db.contains(['.', '$', '/', '\\', '\0', ' ']) {
            return Err(EngineError::Constraint(format!(
                "invalid database name '{}'",
                self.db
            )));
        }
        Ok(())
    }

    /// Check the handle names a collection a caller may write to.
    pub(crate) fn validate(&self) -> Result<(), EngineError> {
        self.validate_database()?;
        if self.coll.is_empty() || self.coll.starts_with('.') || self.coll.contains(['$', '\0']) {
            return Err(EngineError::Constraint(format!(
                "invalid collection name '{}'",
                self.coll
            )));
        }
        if self.is_oplog() {
            return Err(EngineError::Constraint("the oplog is read-only".into()));
        }
        Ok(())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.coll.is_empty() {
            f.write_str(&self.db)
        } else {
            write!(f, "{}.{}", self.db, self.coll)
        }
    }
}
