//! # tablewright: runtime schema management
//!
//! Define, evolve and retire table schemas at runtime. Declarative table
//! definitions are validated, diffed by column identity, and turned into
//! reversible migration units that keep the physical schema and the table
//! catalog in step.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use tablewright::prelude::*;
//!
//! let store = SqlStore::connect("sqlite::memory:", 1, TypeRegistry::builtin()).await?;
//! let engine = SchemaEngine::new(store, TypeRegistry::builtin(), MigrationDir::new("migrations"));
//!
//! let created = engine
//!     .create_table(TableDef::new("seals").column(ColumnDef::new("age", "int")))
//!     .await?;
//!
//! // Undo it: drops the table and its catalog row
//! engine.revert(&created.name).await?;
//! ```
//!
//! ## Pieces
//!
//! | Module      | Role                                              |
//! |-------------|---------------------------------------------------|
//! | `types`     | Type registry and value codec                     |
//! | `column`    | Column model                                      |
//! | `table`     | Table model, validation, catalog rows             |
//! | `diff`      | Id-keyed diff, inverse, sequence checks           |
//! | `migration` | Migration units and their directory               |
//! | `store`     | Store contract, SQL and in-memory stores          |
//! | `engine`    | Create / update / drop / revert                   |

pub mod column;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod migration;
pub mod store;
pub mod table;
pub mod types;

pub use column::{Column, ColumnDef};
pub use diff::{Operation, diff_tables};
pub use engine::SchemaEngine;
pub use error::{SchemaError, SchemaResult};
pub use migration::{Migration, MigrationDir};
pub use table::{AccessLevel, Table, TableDef};
pub use types::TypeRegistry;

pub mod prelude {
    pub use crate::column::{Column, ColumnDef};
    pub use crate::config::Config;
    pub use crate::diff::{Operation, UpdatePlan, diff_tables, invert, plan_update};
    pub use crate::engine::SchemaEngine;
    pub use crate::error::*;
    pub use crate::migration::{Direction, Migration, MigrationDir, MigrationKind, MigrationState};
    pub use crate::store::{MemoryState, MemoryStore, SchemaStore, SqlStore, StoreSession};
    pub use crate::table::{AccessLevel, AccessRules, Table, TableDef, validate_transition};
    pub use crate::types::{TypeInfo, TypeRegistry};
}
