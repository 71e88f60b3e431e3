//! Physical store contract.
//!
//! The engine never issues SQL itself; it drives a [`SchemaStore`] through
//! the capability set below. Mutations go through a [`StoreSession`], which
//! owns one connection for the duration of an apply step. Dropping a session
//! without committing discards its changes and releases the connection.

use async_trait::async_trait;

use crate::column::Column;
use crate::error::SchemaResult;
use crate::table::Table;

pub mod memory;
pub mod sql;

pub use memory::{MemoryState, MemoryStore};
pub use sql::SqlStore;

#[async_trait]
pub trait SchemaStore: Send + Sync {
    type Session: StoreSession;

    /// Acquire a connection and open a session on it.
    async fn session(&self) -> SchemaResult<Self::Session>;

    /// Catalog entries with exactly this name.
    async fn find_tables_by_name(&self, name: &str) -> SchemaResult<Vec<Table>>;

    async fn find_table(&self, id: &str) -> SchemaResult<Option<Table>>;

    /// All catalog entries, ordered by name.
    async fn list_tables(&self) -> SchemaResult<Vec<Table>>;

    /// Names of applied migration units, oldest name first.
    async fn applied_migrations(&self) -> SchemaResult<Vec<String>>;
}

#[async_trait]
pub trait StoreSession: Send {
    async fn create_table(&mut self, table: &Table) -> SchemaResult<()>;

    async fn drop_table(&mut self, name: &str) -> SchemaResult<()>;

    async fn add_column(&mut self, table: &str, column: &Column) -> SchemaResult<()>;

    async fn drop_column(&mut self, table: &str, column: &str) -> SchemaResult<()>;

    async fn rename_column(&mut self, table: &str, from: &str, to: &str) -> SchemaResult<()>;

    async fn rename_table(&mut self, from: &str, to: &str) -> SchemaResult<()>;

    async fn insert_catalog_row(&mut self, table: &Table) -> SchemaResult<()>;

    /// Replace the catalog row keyed by `table.id`.
    async fn update_catalog_row(&mut self, table: &Table) -> SchemaResult<()>;

    async fn delete_catalog_row(&mut self, id: &str) -> SchemaResult<()>;

    async fn mark_applied(&mut self, migration: &str) -> SchemaResult<()>;

    async fn unmark_applied(&mut self, migration: &str) -> SchemaResult<()>;

    /// Publish every change made in this session.
    async fn commit(self) -> SchemaResult<()>;
}
