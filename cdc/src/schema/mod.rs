//! Schema tracking for the replicated server.
//!
//! The [`SchemaStore`] owns the catalog and evolves it as DDL statements are read from the log.
//! The [`TableCache`] maps the short-lived table ids used by row events onto that catalog.

mod cache;
mod change;
pub mod ddl;
mod model;
mod store;

pub use cache::TableCache;
pub use change::{AlterOperation, ColumnPosition, ResolvedSchemaChange};
pub use model::{Column, Database, Schema, Table, TableKey};
pub use store::{SchemaChangeEntry, SchemaStore};
