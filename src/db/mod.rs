//! Database module: row models, SQL repositories and the store adapter.
//!
//! - `model`: rows as stored, plus their conversion into domain types.
//! - `repo`: SQL-only functions.
//! - `store`: [`SqliteStore`], the implementation of the persistence traits.
//!
//! The repository API is re-exported at `crate::db::*`.

pub mod model;
pub mod repo;
pub mod store;

pub use repo::*;
pub use store::SqliteStore;

pub use model::PublishedDeal;
