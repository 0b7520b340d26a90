pub mod clock;
pub mod compare;
pub mod dispatch;
pub mod distinct;
pub mod document;
pub mod error;
pub mod extract;
pub mod filter;
mod pattern;
pub mod project;
pub mod resolve;
mod schema;
pub mod sort;
mod types;
pub mod update;

pub use compare::{TypeClass, class_of, compare, compare_missing, equal};
pub use distinct::distinct;
pub use document::{all, get, put, unset};
pub use error::QueryError;
pub use extract::extract;
pub use filter::matches;
pub use project::project;
pub use resolve::resolve;
pub use sort::{SortDirection, SortKey, compare_by, parse_sort, sort};
pub use update::{Changes, apply};
