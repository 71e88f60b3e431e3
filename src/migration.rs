//! Migration units and their on-disk persistence.
//!
//! A migration unit is self-contained: it carries the forward (`up`) and
//! backward (`down`) operation lists plus the table snapshots they were
//! rendered from, so it can be replayed or reverted without re-diffing.
//!
//! ```text
//! migrations/
//! ├── 20261019093400123456_create_seals.json
//! └── 20261019094112654321_update_seals.json
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::diff::{Operation, plan_update};
use crate::error::{SchemaError, SchemaResult};
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    Create,
    Update,
    Drop,
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

/// Lifecycle of a unit. Reverting an applied unit does not change its
/// content, only its applied record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Synthesized but not written to the migrations directory.
    Pending,
    Persisted,
    Applied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// A persisted, replayable schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub name: String,
    pub kind: MigrationKind,
    pub table_id: String,
    pub created_at: DateTime<Utc>,
    /// Table before the change; absent for creates.
    pub from: Option<Table>,
    /// Table after the change; absent for drops.
    pub to: Option<Table>,
    pub up: Vec<Operation>,
    pub down: Vec<Operation>,
}

impl Migration {
    fn new(kind: MigrationKind, from: Option<Table>, to: Option<Table>) -> Self {
        let created_at = next_stamp();
        let subject = to.as_ref().or(from.as_ref());
        let (table_id, table_name) = subject
            .map(|t| (t.id.clone(), t.name.clone()))
            .unwrap_or_default();
        Self {
            name: format!(
                "{}_{}_{}",
                created_at.format("%Y%m%d%H%M%S%6f"),
                kind,
                slug(&table_name)
            ),
            kind,
            table_id,
            created_at,
            from,
            to,
            up: Vec::new(),
            down: Vec::new(),
        }
    }

    /// Unit creating `table` and its catalog row.
    pub fn create_table(table: &Table) -> Self {
        let mut mig = Self::new(MigrationKind::Create, None, Some(table.clone()));
        mig.up = vec![
            Operation::CreateTable { table: table.clone() },
            Operation::CatalogInsert { table: table.clone() },
        ];
        mig.down = vec![
            Operation::DropTable { table: table.clone() },
            Operation::CatalogDelete { table: table.clone() },
        ];
        mig
    }

    /// Unit dropping `table`; the backward list recreates it from the
    /// captured definition.
    pub fn drop_table(table: &Table) -> Self {
        let mut mig = Self::new(MigrationKind::Drop, Some(table.clone()), None);
        mig.up = vec![
            Operation::DropTable { table: table.clone() },
            Operation::CatalogDelete { table: table.clone() },
        ];
        mig.down = vec![
            Operation::CreateTable { table: table.clone() },
            Operation::CatalogInsert { table: table.clone() },
        ];
        mig
    }

    /// Unit revising `old` into `new`. The catalog row is replaced even when
    /// no structural operation is needed.
    pub fn update_table(old: &Table, new: &Table) -> SchemaResult<Self> {
        let plan = plan_update(old, new)?;
        let mut mig = Self::new(MigrationKind::Update, Some(old.clone()), Some(new.clone()));
        mig.up = plan.forward;
        mig.up.push(Operation::CatalogReplace { table: new.clone() });
        mig.down = plan.backward;
        mig.down.push(Operation::CatalogReplace { table: old.clone() });
        Ok(mig)
    }

    pub fn operations(&self, direction: Direction) -> &[Operation] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }

    /// Name of the physical table before the first operation of `direction`
    /// runs, if it exists.
    pub fn initial_table_name(&self, direction: Direction) -> Option<&str> {
        match direction {
            Direction::Up => self.from.as_ref(),
            Direction::Down => self.to.as_ref(),
        }
        .map(|t| t.name.as_str())
    }
}

static LAST_STAMP: AtomicI64 = AtomicI64::new(i64::MIN);

/// Current time in microseconds, strictly after every stamp already handed
/// out by this process, so unit names stay unique and ordered.
fn next_stamp() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let prev = match LAST_STAMP.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last.saturating_add(1)))
    }) {
        Ok(prev) | Err(prev) => prev,
    };
    let micros = now.max(prev.saturating_add(1));
    DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
}

/// Lowercase, filename-safe form of a table name.
fn slug(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if s.is_empty() { "table".to_string() } else { s }
}

/// Directory of persisted migration units, one JSON file each.
#[derive(Debug, Clone)]
pub struct MigrationDir {
    root: PathBuf,
}

impl MigrationDir {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> SchemaResult<PathBuf> {
        if name.is_empty()
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
        {
            return Err(SchemaError::Migration(format!(
                "invalid migration name '{}'",
                name
            )));
        }
        Ok(self.root.join(format!("{}.json", name)))
    }

    /// Write a unit. Existing files are never overwritten.
    pub async fn persist(&self, migration: &Migration) -> SchemaResult<PathBuf> {
        let path = self.path_for(&migration.name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let body = serde_json::to_string_pretty(migration)?;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => SchemaError::Migration(format!(
                    "migration '{}' is already persisted",
                    migration.name
                )),
                _ => SchemaError::Io(e),
            })?;
        file.write_all(body.as_bytes()).await?;
        file.flush().await?;
        Ok(path)
    }

    /// Whether a unit with this name is persisted.
    pub async fn contains(&self, name: &str) -> SchemaResult<bool> {
        let path = self.path_for(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    pub async fn load(&self, name: &str) -> SchemaResult<Migration> {
        let path = self.path_for(name)?;
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SchemaError::NotFound(format!("migration '{}'", name)));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&body)?)
    }

    /// Names of all persisted units, oldest first.
    pub async fn names(&self) -> SchemaResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// All persisted units, oldest first.
    pub async fn list(&self) -> SchemaResult<Vec<Migration>> {
        let mut migrations = Vec::new();
        for name in self.names().await? {
            migrations.push(self.load(&name).await?);
        }
        Ok(migrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnDef;
    use crate::table::TableDef;
    use crate::types::TypeRegistry;

    fn seals() -> Table {
        Table::new(
            TableDef::new("Seals!")
                .with_id("T1")
                .column(ColumnDef::new("age", "int").with_id("C1")),
            &TypeRegistry::builtin(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_unit() {
        let table = seals();
        let mig = Migration::create_table(&table);
        assert_eq!(mig.kind, MigrationKind::Create);
        assert_eq!(mig.table_id, "T1");
        assert!(mig.name.ends_with("_create_seals_"));
        assert!(matches!(mig.up[0], Operation::CreateTable { .. }));
        assert!(matches!(mig.down[1], Operation::CatalogDelete { .. }));
        assert_eq!(mig.initial_table_name(Direction::Up), None);
        assert_eq!(mig.initial_table_name(Direction::Down), Some("Seals!"));
    }

    #[test]
    fn test_back_to_back_units_get_ordered_names() {
        let table = seals();
        let names: Vec<String> = (0..50)
            .map(|_| Migration::create_table(&table).name)
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, names);
    }

    #[test]
    fn test_drop_unit_recreates_on_down() {
        let table = seals();
        let mig = Migration::drop_table(&table);
        assert_eq!(
            mig.down,
            vec![
                Operation::CreateTable { table: table.clone() },
                Operation::CatalogInsert { table },
            ]
        );
    }

    #[test]
    fn test_update_unit_always_replaces_catalog() {
        let table = seals();
        let mut next = table.clone();
        next.rules.delete_rule = crate::table::AccessLevel::Admin;
        let mig = Migration::update_table(&table, &next).unwrap();
        assert_eq!(mig.up, vec![Operation::CatalogReplace { table: next }]);
        assert_eq!(mig.down, vec![Operation::CatalogReplace { table }]);
    }

    #[tokio::test]
    async fn test_persist_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MigrationDir::new(tmp.path().join("migrations"));
        assert!(dir.names().await.unwrap().is_empty());

        let first = Migration::create_table(&seals());
        let second = Migration::drop_table(&seals());
        dir.persist(&first).await.unwrap();
        dir.persist(&second).await.unwrap();

        assert_eq!(dir.load(&first.name).await.unwrap(), first);
        assert!(dir.contains(&second.name).await.unwrap());
        assert!(!dir.contains("20000101000000000000_create_x").await.unwrap());
        let listed = dir.list().await.unwrap();
        assert_eq!(listed, vec![first.clone(), second]);

        let err = dir.persist(&first).await.unwrap_err();
        assert!(matches!(err, SchemaError::Migration(_)));
    }

    #[tokio::test]
    async fn test_load_missing_and_invalid_names() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = MigrationDir::new(tmp.path());
        assert!(matches!(
            dir.load("nope").await,
            Err(SchemaError::NotFound(_))
        ));
        assert!(matches!(
            dir.load("../etc/passwd").await,
            Err(SchemaError::Migration(_))
        ));
    }
}
