//! Schema engine.
//!
//! Validates definitions, synthesizes migration units, persists them and
//! applies them against a [`SchemaStore`].
//!
//! Schema operations on one table must not run concurrently; callers
//! serialize them per table id.

use tracing::{debug, info, warn};

use crate::diff::Operation;
use crate::error::{SchemaError, SchemaResult};
use crate::migration::{Direction, Migration, MigrationDir, MigrationState};
use crate::store::{SchemaStore, StoreSession};
use crate::table::{Table, TableDef};
use crate::types::TypeRegistry;

pub struct SchemaEngine<S> {
    store: S,
    registry: TypeRegistry,
    migrations: MigrationDir,
}

impl<S: SchemaStore> SchemaEngine<S> {
    pub fn new(store: S, registry: TypeRegistry, migrations: MigrationDir) -> Self {
        Self {
            store,
            registry,
            migrations,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn migrations(&self) -> &MigrationDir {
        &self.migrations
    }

    /// Current definition of a table, from the catalog.
    pub async fn table(&self, table_id: &str) -> SchemaResult<Table> {
        self.store
            .find_table(table_id)
            .await?
            .ok_or_else(|| SchemaError::NotFound(format!("table '{}'", table_id)))
    }

    pub async fn tables(&self) -> SchemaResult<Vec<Table>> {
        self.store.list_tables().await
    }

    /// Create a table and its catalog row.
    ///
    /// Fails with [`SchemaError::Conflict`] when a table with the same name
    /// already exists; nothing is persisted or applied in that case.
    pub async fn create_table(&self, def: TableDef) -> SchemaResult<Migration> {
        let table = Table::new(def, &self.registry)?;
        if !self.store.find_tables_by_name(&table.name).await?.is_empty() {
            return Err(SchemaError::Conflict(table.name));
        }
        if self.store.find_table(&table.id).await?.is_some() {
            return Err(SchemaError::Conflict(format!("{} (id {})", table.name, table.id)));
        }

        let migration = Migration::create_table(&table);
        self.persist_and_apply(migration).await
    }

    /// Synthesize the unit `update_table` would run, without persisting or
    /// applying it.
    pub async fn plan_update(&self, table_id: &str, def: TableDef) -> SchemaResult<Migration> {
        let old = self.table(table_id).await?;
        let new = old.revise(def, &self.registry)?;

        if new.name != old.name {
            let taken = self
                .store
                .find_tables_by_name(&new.name)
                .await?
                .into_iter()
                .any(|t| t.id != old.id);
            if taken {
                return Err(SchemaError::Conflict(new.name));
            }
        }

        Migration::update_table(&old, &new)
    }

    /// Revise a table: structural changes plus a catalog replace.
    pub async fn update_table(&self, table_id: &str, def: TableDef) -> SchemaResult<Migration> {
        let migration = self.plan_update(table_id, def).await?;
        self.persist_and_apply(migration).await
    }

    /// Drop a table and its catalog row. The unit keeps the definition so
    /// reverting recreates the table.
    pub async fn drop_table(&self, table_id: &str) -> SchemaResult<Migration> {
        let table = self.table(table_id).await?;
        let migration = Migration::drop_table(&table);
        self.persist_and_apply(migration).await
    }

    /// Apply a persisted unit that is not applied yet.
    ///
    /// The catalog must still hold the definition the unit was built from;
    /// a stale unit fails with [`SchemaError::Migration`].
    pub async fn apply(&self, name: &str) -> SchemaResult<Migration> {
        let migration = self.migrations.load(name).await?;
        if self.is_applied(name).await? {
            return Err(SchemaError::Migration(format!(
                "migration '{}' is already applied",
                name
            )));
        }
        self.run(&migration, Direction::Up).await?;
        Ok(migration)
    }

    /// Run the backward operations of an applied unit.
    ///
    /// Later applied units touching the same table must be reverted first,
    /// and the catalog must hold the definition the unit produced.
    pub async fn revert(&self, name: &str) -> SchemaResult<Migration> {
        let migration = self.migrations.load(name).await?;
        let applied = self.store.applied_migrations().await?;
        if !applied.iter().any(|m| m == name) {
            return Err(SchemaError::Migration(format!(
                "migration '{}' is not applied",
                name
            )));
        }

        for later in applied.iter().filter(|m| m.as_str() > name) {
            let other = self.migrations.load(later).await?;
            if other.table_id == migration.table_id {
                return Err(SchemaError::Migration(format!(
                    "migration '{}' must be reverted before '{}'",
                    later, name
                )));
            }
        }

        self.run(&migration, Direction::Down).await?;
        Ok(migration)
    }

    pub async fn state(&self, name: &str) -> SchemaResult<MigrationState> {
        if self.is_applied(name).await? {
            return Ok(MigrationState::Applied);
        }
        self.migrations.load(name).await?;
        Ok(MigrationState::Persisted)
    }

    /// State of a unit that may not be persisted yet, e.g. the result of
    /// [`plan_update`](Self::plan_update).
    pub async fn unit_state(&self, migration: &Migration) -> SchemaResult<MigrationState> {
        if self.is_applied(&migration.name).await? {
            Ok(MigrationState::Applied)
        } else if self.migrations.contains(&migration.name).await? {
            Ok(MigrationState::Persisted)
        } else {
            Ok(MigrationState::Pending)
        }
    }

    async fn is_applied(&self, name: &str) -> SchemaResult<bool> {
        Ok(self
            .store
            .applied_migrations()
            .await?
            .iter()
            .any(|m| m == name))
    }

    async fn persist_and_apply(&self, migration: Migration) -> SchemaResult<Migration> {
        let path = self.migrations.persist(&migration).await?;
        info!(migration = %migration.name, path = %path.display(), "persisted migration");
        self.run(&migration, Direction::Up).await?;
        Ok(migration)
    }

    /// Execute one direction of a unit inside a single store session.
    ///
    /// On error the session is dropped without commit, which discards its
    /// changes and releases the connection.
    async fn run(&self, migration: &Migration, direction: Direction) -> SchemaResult<()> {
        self.check_starting_point(migration, direction).await?;

        let mut session = self.store.session().await?;
        let ops = migration.operations(direction);

        if let Err(e) = execute(
            &mut session,
            ops,
            migration.initial_table_name(direction),
        )
        .await
        {
            warn!(migration = %migration.name, ?direction, error = %e, "migration failed");
            return Err(e);
        }

        match direction {
            Direction::Up => session.mark_applied(&migration.name).await?,
            Direction::Down => session.unmark_applied(&migration.name).await?,
        }
        session.commit().await?;

        info!(
            migration = %migration.name,
            ?direction,
            operations = ops.len(),
            structural = ops.iter().filter(|op| op.is_structural()).count(),
            "migration complete"
        );
        Ok(())
    }

    /// The catalog must hold exactly the snapshot a direction starts from:
    /// `from` going up, `to` going down, absent for a missing table.
    async fn check_starting_point(
        &self,
        migration: &Migration,
        direction: Direction,
    ) -> SchemaResult<()> {
        let expected = match direction {
            Direction::Up => migration.from.as_ref(),
            Direction::Down => migration.to.as_ref(),
        };
        let current = self.store.find_table(&migration.table_id).await?;
        if current.as_ref() == expected {
            return Ok(());
        }
        let found = match (&current, expected) {
            (Some(t), None) => format!("table '{}' already exists", t.name),
            (Some(t), Some(_)) => format!(
                "table '{}' does not match the definition the unit starts from",
                t.name
            ),
            (None, _) => format!("table id '{}' is not in the catalog", migration.table_id),
        };
        let verb = match direction {
            Direction::Up => "apply",
            Direction::Down => "revert",
        };
        Err(SchemaError::Migration(format!(
            "cannot {} '{}': {}",
            verb, migration.name, found
        )))
    }
}

/// Interpret an operation list against a session, in order.
pub async fn execute<T: StoreSession>(
    session: &mut T,
    ops: &[Operation],
    initial_table: Option<&str>,
) -> SchemaResult<()> {
    let mut current = initial_table.map(str::to_string);

    for op in ops {
        debug!(%op, "applying");
        match op {
            Operation::CreateTable { table } => {
                session.create_table(table).await?;
                current = Some(table.name.clone());
            }
            Operation::DropTable { table } => {
                session.drop_table(&table.name).await?;
                current = None;
            }
            Operation::AddColumn { column } => {
                session.add_column(target(&current, op)?, column).await?;
            }
            Operation::DropColumn { column } => {
                session.drop_column(target(&current, op)?, &column.name).await?;
            }
            Operation::RenameColumn { from, to } => {
                session.rename_column(target(&current, op)?, from, to).await?;
            }
            Operation::RenameTable { from, to } => {
                session.rename_table(from, to).await?;
                current = Some(to.clone());
            }
            Operation::CatalogInsert { table } => session.insert_catalog_row(table).await?,
            Operation::CatalogReplace { table } => session.update_catalog_row(table).await?,
            Operation::CatalogDelete { table } => session.delete_catalog_row(&table.id).await?,
        }
    }
    Ok(())
}

fn target<'a>(current: &'a Option<String>, op: &Operation) -> SchemaResult<&'a str> {
    current
        .as_deref()
        .ok_or_else(|| SchemaError::Migration(format!("'{}' has no table to apply to", op)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnDef;
    use crate::store::MemoryStore;

    fn engine(dir: &std::path::Path) -> SchemaEngine<MemoryStore> {
        SchemaEngine::new(
            MemoryStore::new(),
            TypeRegistry::builtin(),
            MigrationDir::new(dir),
        )
    }

    fn seals_def() -> TableDef {
        TableDef::new("seals")
            .with_id("T1")
            .column(ColumnDef::new("age", "int").with_id("C1"))
    }

    #[tokio::test]
    async fn test_create_records_migration() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        let mig = engine.create_table(seals_def()).await.unwrap();

        assert_eq!(engine.state(&mig.name).await.unwrap(), MigrationState::Applied);
        assert_eq!(engine.migrations().names().await.unwrap(), vec![mig.name.clone()]);
        assert_eq!(engine.table("T1").await.unwrap().name, "seals");
    }

    #[tokio::test]
    async fn test_execute_tracks_renamed_table() {
        let store = MemoryStore::new();
        let registry = TypeRegistry::builtin();
        let table = Table::new(seals_def(), &registry).unwrap();
        let weight = crate::column::Column::new("weight", "float", &registry).unwrap();

        let mut session = store.session().await.unwrap();
        let ops = vec![
            Operation::CreateTable { table },
            Operation::RenameTable {
                from: "seals".into(),
                to: "pinnipeds".into(),
            },
            Operation::AddColumn { column: weight },
        ];
        execute(&mut session, &ops, None).await.unwrap();
        session.commit().await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.tables["pinnipeds"].len(), 2);
    }

    #[tokio::test]
    async fn test_execute_requires_table_for_column_ops() {
        let store = MemoryStore::new();
        let mut session = store.session().await.unwrap();
        let ops = vec![Operation::RenameColumn {
            from: "a".into(),
            to: "b".into(),
        }];
        assert!(matches!(
            execute(&mut session, &ops, None).await,
            Err(SchemaError::Migration(_))
        ));
    }
}
