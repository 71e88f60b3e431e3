//! In-process store.
//!
//! Physical tables are modelled as ordered `(column, type)` lists next to a
//! catalog of serialized rows. Sessions stage their changes on a private copy
//! and publish it on commit, so a failed apply leaves the store untouched.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{SchemaStore, StoreSession};
use crate::column::Column;
use crate::error::{SchemaError, SchemaResult};
use crate::table::{CatalogRow, Table};

/// Full contents of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryState {
    /// Physical tables: name -> ordered (column name, declared type).
    pub tables: BTreeMap<String, Vec<(String, String)>>,
    /// Catalog rows keyed by table id.
    pub catalog: BTreeMap<String, CatalogRow>,
    /// Applied migration names, in application order.
    pub applied: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_on: Arc<Mutex<Option<String>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub fn snapshot(&self) -> MemoryState {
        lock(&self.state).clone()
    }

    /// Make every later session fail the named capability (e.g.
    /// `"add_column"`). `None` clears it.
    pub fn fail_on(&self, capability: Option<&str>) {
        *lock(&self.fail_on) = capability.map(str::to_string);
    }

    fn rows(&self) -> SchemaResult<Vec<Table>> {
        let rows: Vec<CatalogRow> = lock(&self.state).catalog.values().cloned().collect();
        rows.into_iter().map(CatalogRow::into_table).collect()
    }
}

#[async_trait]
impl SchemaStore for MemoryStore {
    type Session = MemorySession;

    async fn session(&self) -> SchemaResult<MemorySession> {
        Ok(MemorySession {
            staged: self.snapshot(),
            shared: Arc::clone(&self.state),
            fail_on: lock(&self.fail_on).clone(),
        })
    }

    async fn find_tables_by_name(&self, name: &str) -> SchemaResult<Vec<Table>> {
        Ok(self.rows()?.into_iter().filter(|t| t.name == name).collect())
    }

    async fn find_table(&self, id: &str) -> SchemaResult<Option<Table>> {
        let row = lock(&self.state).catalog.get(id).cloned();
        row.map(CatalogRow::into_table).transpose()
    }

    async fn list_tables(&self) -> SchemaResult<Vec<Table>> {
        let mut tables = self.rows()?;
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    async fn applied_migrations(&self) -> SchemaResult<Vec<String>> {
        let mut names = lock(&self.state).applied.clone();
        names.sort();
        Ok(names)
    }
}

/// Session staging changes on a copy of the store state.
#[derive(Debug)]
pub struct MemorySession {
    staged: MemoryState,
    shared: Arc<Mutex<MemoryState>>,
    fail_on: Option<String>,
}

impl MemorySession {
    fn guard(&self, capability: &str) -> SchemaResult<()> {
        match &self.fail_on {
            Some(name) if name == capability => Err(SchemaError::Store(format!(
                "injected failure in {}",
                capability
            ))),
            _ => Ok(()),
        }
    }

    fn columns_mut(&mut self, table: &str) -> SchemaResult<&mut Vec<(String, String)>> {
        self.staged
            .tables
            .get_mut(table)
            .ok_or_else(|| SchemaError::Store(format!("no such table: {}", table)))
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn create_table(&mut self, table: &Table) -> SchemaResult<()> {
        self.guard("create_table")?;
        if self.staged.tables.contains_key(&table.name) {
            return Err(SchemaError::Store(format!("table {} already exists", table.name)));
        }
        let columns = table
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.data_type.clone()))
            .collect();
        self.staged.tables.insert(table.name.clone(), columns);
        Ok(())
    }

    async fn drop_table(&mut self, name: &str) -> SchemaResult<()> {
        self.guard("drop_table")?;
        self.staged
            .tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SchemaError::Store(format!("no such table: {}", name)))
    }

    async fn add_column(&mut self, table: &str, column: &Column) -> SchemaResult<()> {
        self.guard("add_column")?;
        let columns = self.columns_mut(table)?;
        if columns.iter().any(|(name, _)| *name == column.name) {
            return Err(SchemaError::Store(format!(
                "duplicate column name: {}",
                column.name
            )));
        }
        columns.push((column.name.clone(), column.data_type.clone()));
        Ok(())
    }

    async fn drop_column(&mut self, table: &str, column: &str) -> SchemaResult<()> {
        self.guard("drop_column")?;
        let columns = self.columns_mut(table)?;
        let before = columns.len();
        columns.retain(|(name, _)| name != column);
        if columns.len() == before {
            return Err(SchemaError::Store(format!("no such column: {}", column)));
        }
        Ok(())
    }

    async fn rename_column(&mut self, table: &str, from: &str, to: &str) -> SchemaResult<()> {
        self.guard("rename_column")?;
        let columns = self.columns_mut(table)?;
        if columns.iter().any(|(name, _)| name == to) {
            return Err(SchemaError::Store(format!("duplicate column name: {}", to)));
        }
        let col = columns
            .iter_mut()
            .find(|(name, _)| name == from)
            .ok_or_else(|| SchemaError::Store(format!("no such column: {}", from)))?;
        col.0 = to.to_string();
        Ok(())
    }

    async fn rename_table(&mut self, from: &str, to: &str) -> SchemaResult<()> {
        self.guard("rename_table")?;
        if self.staged.tables.contains_key(to) {
            return Err(SchemaError::Store(format!("table {} already exists", to)));
        }
        let columns = self
            .staged
            .tables
            .remove(from)
            .ok_or_else(|| SchemaError::Store(format!("no such table: {}", from)))?;
        self.staged.tables.insert(to.to_string(), columns);
        Ok(())
    }

    async fn insert_catalog_row(&mut self, table: &Table) -> SchemaResult<()> {
        self.guard("insert_catalog_row")?;
        if self.staged.catalog.contains_key(&table.id) {
            return Err(SchemaError::Store(format!(
                "catalog row {} already exists",
                table.id
            )));
        }
        let row = CatalogRow::from_table(table)?;
        self.staged.catalog.insert(table.id.clone(), row);
        Ok(())
    }

    async fn update_catalog_row(&mut self, table: &Table) -> SchemaResult<()> {
        self.guard("update_catalog_row")?;
        let row = CatalogRow::from_table(table)?;
        match self.staged.catalog.get_mut(&table.id) {
            Some(slot) => {
                *slot = row;
                Ok(())
            }
            None => Err(SchemaError::Store(format!("no catalog row {}", table.id))),
        }
    }

    async fn delete_catalog_row(&mut self, id: &str) -> SchemaResult<()> {
        self.guard("delete_catalog_row")?;
        self.staged
            .catalog
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchemaError::Store(format!("no catalog row {}", id)))
    }

    async fn mark_applied(&mut self, migration: &str) -> SchemaResult<()> {
        self.guard("mark_applied")?;
        if self.staged.applied.iter().any(|m| m == migration) {
            return Err(SchemaError::Store(format!(
                "migration {} already recorded",
                migration
            )));
        }
        self.staged.applied.push(migration.to_string());
        Ok(())
    }

    async fn unmark_applied(&mut self, migration: &str) -> SchemaResult<()> {
        self.guard("unmark_applied")?;
        self.staged.applied.retain(|m| m != migration);
        Ok(())
    }

    async fn commit(self) -> SchemaResult<()> {
        *lock(&self.shared) = self.staged;
        Ok(())
    }
}
