//! Database module: row models and SQL repositories.
//!
//! - `model`: rows as stored, with conversions into domain types.
//! - `repo`: SQL-only functions over the SQLite pool.
//!
//! The repository API is re-exported at `crate::db::*`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::PinnedVerseRow;
