//! SQL store backed by a sqlx `AnyPool`.
//!
//! Works against PostgreSQL and SQLite URLs. Each session is a database
//! transaction; both backends run DDL transactionally, so the physical and
//! catalog writes of one apply step commit or roll back together.

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Row, Transaction};
use tracing::debug;

use super::{SchemaStore, StoreSession};
use crate::column::Column;
use crate::error::{SchemaError, SchemaResult};
use crate::table::{CatalogRow, Table};
use crate::types::TypeRegistry;

/// Catalog of table definitions.
pub const CATALOG_TABLE: &str = "_tablewright_tables";
/// Applied migration units.
pub const HISTORY_TABLE: &str = "_tablewright_migrations";

const CATALOG_COLUMNS: &str =
    "id, name, columns, list_rule, view_rule, create_rule, update_rule, delete_rule";

/// A schema store over a PostgreSQL or SQLite database.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    registry: TypeRegistry,
}

impl SqlStore {
    /// Connect and make sure the catalog and history tables exist.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let store = SqlStore::connect("sqlite::memory:", 1, TypeRegistry::builtin()).await?;
    /// ```
    pub async fn connect(
        url: &str,
        max_connections: u32,
        registry: TypeRegistry,
    ) -> SchemaResult<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| SchemaError::Store(format!("connect failed: {}", e)))?;

        let store = Self::from_pool(pool, registry);
        store.bootstrap().await?;
        Ok(store)
    }

    pub fn from_pool(pool: AnyPool, registry: TypeRegistry) -> Self {
        Self { pool, registry }
    }

    /// Create the catalog and history tables if missing.
    pub async fn bootstrap(&self) -> SchemaResult<()> {
        let catalog = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             id TEXT PRIMARY KEY NOT NULL, \
             name TEXT NOT NULL UNIQUE, \
             columns TEXT NOT NULL, \
             list_rule TEXT NOT NULL, \
             view_rule TEXT NOT NULL, \
             create_rule TEXT NOT NULL, \
             update_rule TEXT NOT NULL, \
             delete_rule TEXT NOT NULL)",
            CATALOG_TABLE
        );
        let history = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             name TEXT PRIMARY KEY NOT NULL, \
             applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
            HISTORY_TABLE
        );
        sqlx::query(&catalog).execute(&self.pool).await?;
        sqlx::query(&history).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn select_tables(&self, filter: Option<(&str, &str)>) -> SchemaResult<Vec<Table>> {
        let rows: Vec<AnyRow> = match filter {
            Some((column, value)) => {
                let sql = format!(
                    "SELECT {} FROM {} WHERE {} = $1 ORDER BY name",
                    CATALOG_COLUMNS, CATALOG_TABLE, column
                );
                sqlx::query(&sql).bind(value).fetch_all(&self.pool).await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM {} ORDER BY name",
                    CATALOG_COLUMNS, CATALOG_TABLE
                );
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(row_to_table).collect()
    }
}

/// Convert a catalog row to a Table.
fn row_to_table(row: &AnyRow) -> SchemaResult<Table> {
    CatalogRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        columns: row.try_get("columns")?,
        list_rule: row.try_get("list_rule")?,
        view_rule: row.try_get("view_rule")?,
        create_rule: row.try_get("create_rule")?,
        update_rule: row.try_get("update_rule")?,
        delete_rule: row.try_get("delete_rule")?,
    }
    .into_table()
}

/// Double-quote an identifier.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Column clause for DDL: quoted name plus physical type.
pub fn column_sql(column: &Column, registry: &TypeRegistry) -> SchemaResult<String> {
    let info = registry.get(&column.data_type).ok_or_else(|| {
        SchemaError::Store(format!(
            "no physical type for '{}' ({})",
            column.name, column.data_type
        ))
    })?;
    Ok(format!("{} {}", quote(&column.name), info.sql_type))
}

/// CREATE TABLE statement including the system columns.
pub fn create_table_sql(table: &Table, registry: &TypeRegistry) -> SchemaResult<String> {
    let mut defs = vec![
        "\"id\" TEXT PRIMARY KEY NOT NULL".to_string(),
        "\"created_at\" TIMESTAMP DEFAULT CURRENT_TIMESTAMP".to_string(),
        "\"updated_at\" TIMESTAMP DEFAULT CURRENT_TIMESTAMP".to_string(),
    ];
    for col in &table.columns {
        defs.push(column_sql(col, registry)?);
    }
    Ok(format!("CREATE TABLE {} ({})", quote(&table.name), defs.join(", ")))
}

#[async_trait]
impl SchemaStore for SqlStore {
    type Session = SqlSession;

    async fn session(&self) -> SchemaResult<SqlSession> {
        let tx = self.pool.begin().await?;
        Ok(SqlSession {
            tx,
            registry: self.registry.clone(),
        })
    }

    async fn find_tables_by_name(&self, name: &str) -> SchemaResult<Vec<Table>> {
        self.select_tables(Some(("name", name))).await
    }

    async fn find_table(&self, id: &str) -> SchemaResult<Option<Table>> {
        Ok(self.select_tables(Some(("id", id))).await?.into_iter().next())
    }

    async fn list_tables(&self) -> SchemaResult<Vec<Table>> {
        self.select_tables(None).await
    }

    async fn applied_migrations(&self) -> SchemaResult<Vec<String>> {
        let sql = format!("SELECT name FROM {} ORDER BY name", HISTORY_TABLE);
        let rows: Vec<AnyRow> = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(SchemaError::from))
            .collect()
    }
}

/// One transaction on one pooled connection.
pub struct SqlSession {
    tx: Transaction<'static, Any>,
    registry: TypeRegistry,
}

impl SqlSession {
    async fn exec(&mut self, sql: &str) -> SchemaResult<()> {
        debug!(sql, "executing");
        sqlx::query(sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    /// Bind a catalog row to `$1..$8` and run `sql`; returns rows affected.
    async fn write_catalog(&mut self, sql: &str, table: &Table) -> SchemaResult<u64> {
        let row = CatalogRow::from_table(table)?;
        debug!(sql, table = %table.name, "writing catalog");
        let result = sqlx::query(sql)
            .bind(row.id)
            .bind(row.name)
            .bind(row.columns)
            .bind(row.list_rule)
            .bind(row.view_rule)
            .bind(row.create_rule)
            .bind(row.update_rule)
            .bind(row.delete_rule)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }
}

fn expect_one_row(affected: u64, id: &str) -> SchemaResult<()> {
    match affected {
        1 => Ok(()),
        0 => Err(SchemaError::Store(format!("no catalog row {}", id))),
        n => Err(SchemaError::Store(format!("{} catalog rows for {}", n, id))),
    }
}

#[async_trait]
impl StoreSession for SqlSession {
    async fn create_table(&mut self, table: &Table) -> SchemaResult<()> {
        let sql = create_table_sql(table, &self.registry)?;
        self.exec(&sql).await
    }

    async fn drop_table(&mut self, name: &str) -> SchemaResult<()> {
        self.exec(&format!("DROP TABLE {}", quote(name))).await
    }

    async fn add_column(&mut self, table: &str, column: &Column) -> SchemaResult<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote(table),
            column_sql(column, &self.registry)?
        );
        self.exec(&sql).await
    }

    async fn drop_column(&mut self, table: &str, column: &str) -> SchemaResult<()> {
        let sql = format!("ALTER TABLE {} DROP COLUMN {}", quote(table), quote(column));
        self.exec(&sql).await
    }

    async fn rename_column(&mut self, table: &str, from: &str, to: &str) -> SchemaResult<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            quote(table),
            quote(from),
            quote(to)
        );
        self.exec(&sql).await
    }

    async fn rename_table(&mut self, from: &str, to: &str) -> SchemaResult<()> {
        let sql = format!("ALTER TABLE {} RENAME TO {}", quote(from), quote(to));
        self.exec(&sql).await
    }

    async fn insert_catalog_row(&mut self, table: &Table) -> SchemaResult<()> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            CATALOG_TABLE, CATALOG_COLUMNS
        );
        self.write_catalog(&sql, table).await?;
        Ok(())
    }

    async fn update_catalog_row(&mut self, table: &Table) -> SchemaResult<()> {
        let sql = format!(
            "UPDATE {} SET name = $2, columns = $3, list_rule = $4, view_rule = $5, \
             create_rule = $6, update_rule = $7, delete_rule = $8 WHERE id = $1",
            CATALOG_TABLE
        );
        let affected = self.write_catalog(&sql, table).await?;
        expect_one_row(affected, &table.id)
    }

    async fn delete_catalog_row(&mut self, id: &str) -> SchemaResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", CATALOG_TABLE);
        let result = sqlx::query(&sql).bind(id).execute(&mut *self.tx).await?;
        expect_one_row(result.rows_affected(), id)
    }

    async fn mark_applied(&mut self, migration: &str) -> SchemaResult<()> {
        let sql = format!("INSERT INTO {} (name) VALUES ($1)", HISTORY_TABLE);
        sqlx::query(&sql).bind(migration).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn unmark_applied(&mut self, migration: &str) -> SchemaResult<()> {
        let sql = format!("DELETE FROM {} WHERE name = $1", HISTORY_TABLE);
        sqlx::query(&sql).bind(migration).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self) -> SchemaResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
