//! SqlStore against an in-memory SQLite database.

use pretty_assertions::assert_eq;
use sqlx::Row;
use tablewright::prelude::*;

const SYSTEM: [&str; 3] = ["id", "created_at", "updated_at"];

async fn engine(dir: &std::path::Path) -> SchemaEngine<SqlStore> {
    let registry = TypeRegistry::builtin();
    let store = SqlStore::connect("sqlite::memory:", 1, registry.clone())
        .await
        .unwrap();
    SchemaEngine::new(store, registry, MigrationDir::new(dir))
}

/// Physical column names of `table`, in declaration order. Empty when the
/// table does not exist.
async fn columns(engine: &SchemaEngine<SqlStore>, table: &str) -> Vec<String> {
    sqlx::query("SELECT name FROM pragma_table_info($1) ORDER BY cid")
        .bind(table)
        .fetch_all(engine.store().pool())
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect()
}

fn with_system(names: &[&str]) -> Vec<String> {
    SYSTEM.iter().chain(names).map(|n| n.to_string()).collect()
}

fn seals() -> TableDef {
    TableDef::new("seals")
        .with_id("T1")
        .column(ColumnDef::new("age", "int").with_id("C1"))
        .column(ColumnDef::new("fur", "text").with_id("C3"))
}

#[tokio::test]
async fn create_writes_table_and_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path()).await;
    let mig = engine.create_table(seals()).await.unwrap();

    assert_eq!(columns(&engine, "seals").await, with_system(&["age", "fur"]));
    let table = engine.table("T1").await.unwrap();
    assert_eq!(table.name, "seals");
    assert_eq!(table.column_by_id("C1").map(|c| c.name.as_str()), Some("age"));
    assert_eq!(table.column_by_name("fur").map(|c| c.id.as_str()), Some("C3"));
    assert_eq!(
        engine.store().applied_migrations().await.unwrap(),
        vec![mig.name.clone()]
    );
}

#[tokio::test]
async fn update_and_revert_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path()).await;
    engine.create_table(seals()).await.unwrap();
    let original = engine.table("T1").await.unwrap();

    let def = TableDef::new("pinnipeds")
        .column(ColumnDef::new("years", "int").with_id("C1"))
        .column(ColumnDef::new("weight", "float"));
    let mig = engine.update_table("T1", def).await.unwrap();

    assert_eq!(
        columns(&engine, "pinnipeds").await,
        with_system(&["years", "weight"])
    );
    assert!(columns(&engine, "seals").await.is_empty());
    assert_eq!(engine.table("T1").await.unwrap().name, "pinnipeds");

    engine.revert(&mig.name).await.unwrap();
    assert_eq!(columns(&engine, "seals").await, with_system(&["age", "fur"]));
    assert!(columns(&engine, "pinnipeds").await.is_empty());
    assert_eq!(engine.table("T1").await.unwrap(), original);
}

#[tokio::test]
async fn failed_step_rolls_back_the_whole_unit() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path()).await;
    engine.create_table(seals()).await.unwrap();
    let original = engine.table("T1").await.unwrap();

    // Physical schema drifted from the catalog behind the engine's back.
    sqlx::query("ALTER TABLE \"seals\" RENAME COLUMN \"age\" TO \"aged\"")
        .execute(engine.store().pool())
        .await
        .unwrap();

    // Drops "fur" first, then fails renaming the missing "age".
    let def = TableDef::new("seals").column(ColumnDef::new("years", "int").with_id("C1"));
    let err = engine.update_table("T1", def).await.unwrap_err();
    assert!(matches!(err, SchemaError::Store(_)));

    assert_eq!(columns(&engine, "seals").await, with_system(&["aged", "fur"]));
    assert_eq!(engine.table("T1").await.unwrap(), original);
    assert_eq!(engine.store().applied_migrations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn drop_then_revert_restores_table() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path()).await;
    engine.create_table(seals()).await.unwrap();
    let original = engine.table("T1").await.unwrap();

    let mig = engine.drop_table("T1").await.unwrap();
    assert!(columns(&engine, "seals").await.is_empty());
    assert!(engine.tables().await.unwrap().is_empty());

    engine.revert(&mig.name).await.unwrap();
    assert_eq!(columns(&engine, "seals").await, with_system(&["age", "fur"]));
    assert_eq!(engine.tables().await.unwrap(), vec![original]);
}

#[tokio::test]
async fn name_conflict_is_checked_against_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path()).await;
    engine.create_table(seals()).await.unwrap();

    let err = engine
        .create_table(TableDef::new("seals").column(ColumnDef::new("length", "float")))
        .await
        .unwrap_err();
    assert!(matches!(err, SchemaError::Conflict(_)));
    assert_eq!(engine.tables().await.unwrap().len(), 1);
}

#[tokio::test]
async fn catalog_writes_require_an_existing_row() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine(tmp.path()).await;
    let ghost = Table::new(
        TableDef::new("ghosts")
            .with_id("GX")
            .column(ColumnDef::new("name", "text")),
        engine.registry(),
    )
    .unwrap();

    let mut session = engine.store().session().await.unwrap();
    let err = session.update_catalog_row(&ghost).await.unwrap_err();
    assert!(matches!(err, SchemaError::Store(ref msg) if msg == "no catalog row GX"));
    let err = session.delete_catalog_row("GX").await.unwrap_err();
    assert!(matches!(err, SchemaError::Store(ref msg) if msg == "no catalog row GX"));
    drop(session);

    assert!(engine.tables().await.unwrap().is_empty());
}
