//! Table model and validation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::column::{Column, ColumnDef, new_id};
use crate::error::{SchemaError, SchemaResult};
use crate::types::TypeRegistry;

/// Authorization level required for an API action, most permissive first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Public,
    Authenticated,
    Owner,
    Admin,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 4] = [
        AccessLevel::Public,
        AccessLevel::Authenticated,
        AccessLevel::Owner,
        AccessLevel::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Authenticated => "authenticated",
            Self::Owner => "owner",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<_> = Self::ALL.iter().map(|l| l.as_str()).collect();
                format!("'{}' is not one of {}", s, allowed.join(", "))
            })
    }
}

/// Per-action access rules: read-all, read-one, create, update, delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRules {
    #[serde(default)]
    pub list_rule: AccessLevel,
    #[serde(default)]
    pub view_rule: AccessLevel,
    #[serde(default)]
    pub create_rule: AccessLevel,
    #[serde(default)]
    pub update_rule: AccessLevel,
    #[serde(default)]
    pub delete_rule: AccessLevel,
}

/// A validated table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: String,
    pub name: String,
    pub columns: Vec<Column>,
    #[serde(flatten)]
    pub rules: AccessRules,
}

/// Caller-supplied table definition, as read from JSON.
///
/// Rules are plain strings here so an out-of-range value surfaces as a
/// validation error instead of a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDef {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_rule: Option<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn column(mut self, col: ColumnDef) -> Self {
        self.columns.push(col);
        self
    }
}

impl Table {
    /// Build and validate a table from a definition, generating missing ids.
    ///
    /// # Example
    ///
    /// ```
    /// use tablewright::{ColumnDef, Table, TableDef, TypeRegistry};
    ///
    /// let registry = TypeRegistry::builtin();
    /// let def = TableDef::new("seals").column(ColumnDef::new("age", "int"));
    /// let table = Table::new(def, &registry).unwrap();
    /// assert_eq!(table.columns.len(), 1);
    /// ```
    pub fn new(def: TableDef, registry: &TypeRegistry) -> SchemaResult<Self> {
        let id = def.id.unwrap_or_else(new_id);
        let rule = |raw: Option<String>, label: &str| -> SchemaResult<AccessLevel> {
            match raw {
                None => Ok(AccessLevel::default()),
                Some(s) => s
                    .parse()
                    .map_err(|e| SchemaError::validation(&def.name, format!("{}: {}", label, e))),
            }
        };
        let rules = AccessRules {
            list_rule: rule(def.list_rule, "list_rule")?,
            view_rule: rule(def.view_rule, "view_rule")?,
            create_rule: rule(def.create_rule, "create_rule")?,
            update_rule: rule(def.update_rule, "update_rule")?,
            delete_rule: rule(def.delete_rule, "delete_rule")?,
        };

        let table = Self {
            id,
            name: def.name,
            columns: def.columns.into_iter().map(ColumnDef::into_column).collect(),
            rules,
        };
        table.validate(registry)?;
        Ok(table)
    }

    /// Build the next revision of this table. The definition inherits this
    /// table's id when it does not carry one.
    pub fn revise(&self, mut def: TableDef, registry: &TypeRegistry) -> SchemaResult<Self> {
        def.id.get_or_insert_with(|| self.id.clone());
        Self::new(def, registry)
    }

    /// Re-run every table invariant.
    pub fn validate(&self, registry: &TypeRegistry) -> SchemaResult<()> {
        let fail = |rule: String| Err(SchemaError::validation(&self.name, rule));

        if self.id.trim().is_empty() {
            return fail("table id is empty".into());
        }
        if self.name.trim().is_empty() {
            return fail("table name is empty".into());
        }
        if self.columns.is_empty() {
            return fail("table has no columns".into());
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for col in &self.columns {
            if let Err(rule) = col.check(registry) {
                return fail(rule);
            }
            if !names.insert(col.name.as_str()) {
                return fail(format!("duplicate column name '{}'", col.name));
            }
            if !ids.insert(col.id.as_str()) {
                return fail(format!("duplicate column id '{}'", col.id));
            }
        }
        Ok(())
    }

    pub fn column_by_id(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Export as an editable definition (ids included).
    pub fn to_def(&self) -> TableDef {
        TableDef {
            id: Some(self.id.clone()),
            name: self.name.clone(),
            columns: self.columns.iter().map(ColumnDef::from).collect(),
            list_rule: Some(self.rules.list_rule.to_string()),
            view_rule: Some(self.rules.view_rule.to_string()),
            create_rule: Some(self.rules.create_rule.to_string()),
            update_rule: Some(self.rules.update_rule.to_string()),
            delete_rule: Some(self.rules.delete_rule.to_string()),
        }
    }

    /// Encode the declared columns of a row for storage.
    pub fn encode_row(&self, registry: &TypeRegistry, mut row: Map<String, Value>) -> Map<String, Value> {
        for col in &self.columns {
            if let Some(value) = row.remove(&col.name) {
                row.insert(col.name.clone(), registry.encode(&col.data_type, value));
            }
        }
        row
    }

    /// Decode the declared columns of a stored row. Undecodable values are
    /// kept as stored; system and unknown columns pass through.
    pub fn decode_row(&self, registry: &TypeRegistry, mut row: Map<String, Value>) -> Map<String, Value> {
        for col in &self.columns {
            if let Some(value) = row.remove(&col.name) {
                row.insert(col.name.clone(), registry.decode(&col.data_type, value));
            }
        }
        row
    }
}

/// Check that `new` is an allowed revision of `old`.
///
/// The table id must be unchanged, and a column kept across the revision
/// (same id) must keep its declared type.
pub fn validate_transition(old: &Table, new: &Table) -> SchemaResult<()> {
    if old.id != new.id {
        return Err(SchemaError::transition(
            &old.name,
            format!("table id changed from '{}' to '{}'", old.id, new.id),
        ));
    }
    for new_col in &new.columns {
        if let Some(old_col) = old.column_by_id(&new_col.id)
            && old_col.data_type != new_col.data_type
        {
            return Err(SchemaError::transition(
                &old.name,
                format!(
                    "column '{}' changes type from '{}' to '{}'; type changes are not supported",
                    old_col.name, old_col.data_type, new_col.data_type
                ),
            ));
        }
    }
    Ok(())
}

/// A catalog row: the table's attributes with its columns as a JSON blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub id: String,
    pub name: String,
    pub columns: String,
    pub list_rule: String,
    pub view_rule: String,
    pub create_rule: String,
    pub update_rule: String,
    pub delete_rule: String,
}

impl CatalogRow {
    pub fn from_table(table: &Table) -> SchemaResult<Self> {
        Ok(Self {
            id: table.id.clone(),
            name: table.name.clone(),
            columns: serde_json::to_string(&table.columns)?,
            list_rule: table.rules.list_rule.to_string(),
            view_rule: table.rules.view_rule.to_string(),
            create_rule: table.rules.create_rule.to_string(),
            update_rule: table.rules.update_rule.to_string(),
            delete_rule: table.rules.delete_rule.to_string(),
        })
    }

    /// Rebuild the table. Registry validation is left to the caller.
    pub fn into_table(self) -> SchemaResult<Table> {
        let rule = |raw: &str| -> SchemaResult<AccessLevel> {
            raw.parse()
                .map_err(|e: String| SchemaError::validation(&self.name, e))
        };
        let rules = AccessRules {
            list_rule: rule(&self.list_rule)?,
            view_rule: rule(&self.view_rule)?,
            create_rule: rule(&self.create_rule)?,
            update_rule: rule(&self.update_rule)?,
            delete_rule: rule(&self.delete_rule)?,
        };
        let columns: Vec<Column> = serde_json::from_str(&self.columns)?;
        Ok(Table {
            id: self.id,
            name: self.name,
            columns,
            rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        TypeRegistry::builtin()
    }

    fn seals() -> Table {
        Table::new(
            TableDef::new("seals")
                .with_id("T1")
                .column(ColumnDef::new("age", "int").with_id("C1")),
            &registry(),
        )
        .unwrap()
    }

    fn rule_of(err: SchemaError) -> String {
        match err {
            SchemaError::Validation { rule, .. } => rule,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_valid_table() {
        let table = seals();
        assert_eq!(table.id, "T1");
        assert_eq!(table.rules, AccessRules::default());
        assert!(table.validate(&registry()).is_ok());
    }

    #[test]
    fn test_generates_ids() {
        let table = Table::new(
            TableDef::new("seals").column(ColumnDef::new("age", "int")),
            &registry(),
        )
        .unwrap();
        assert!(!table.id.is_empty());
        assert!(!table.columns[0].id.is_empty());
    }

    #[test]
    fn test_rejects_empty_columns() {
        let err = Table::new(TableDef::new("seals"), &registry()).unwrap_err();
        assert_eq!(rule_of(err), "table has no columns");
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let def = TableDef::new("seals")
            .column(ColumnDef::new("age", "int"))
            .column(ColumnDef::new("age", "float"));
        let err = Table::new(def, &registry()).unwrap_err();
        assert_eq!(rule_of(err), "duplicate column name 'age'");
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let def = TableDef::new("seals")
            .column(ColumnDef::new("age", "int").with_id("C1"))
            .column(ColumnDef::new("years", "int").with_id("C1"));
        let err = Table::new(def, &registry()).unwrap_err();
        assert_eq!(rule_of(err), "duplicate column id 'C1'");
    }

    #[test]
    fn test_rejects_reserved_name() {
        let def = TableDef::new("seals").column(ColumnDef::new("created_at", "datetime"));
        let err = Table::new(def, &registry()).unwrap_err();
        assert_eq!(rule_of(err), "column name 'created_at' is reserved");
    }

    #[test]
    fn test_rejects_unknown_type() {
        let def = TableDef::new("seals").column(ColumnDef::new("age", "uint"));
        let err = Table::new(def, &registry()).unwrap_err();
        assert_eq!(rule_of(err), "column 'age' has unknown type 'uint'");
    }

    #[test]
    fn test_rejects_invalid_rule() {
        let mut def = TableDef::new("seals").column(ColumnDef::new("age", "int"));
        def.delete_rule = Some("everyone".into());
        let err = Table::new(def, &registry()).unwrap_err();
        assert!(rule_of(err).starts_with("delete_rule: 'everyone' is not one of"));
    }

    #[test]
    fn test_rejects_missing_table_id_and_name() {
        let err = Table::new(
            TableDef::new("").column(ColumnDef::new("age", "int")),
            &registry(),
        )
        .unwrap_err();
        assert_eq!(rule_of(err), "table name is empty");

        let mut table = seals();
        table.id = String::new();
        assert_eq!(rule_of(table.validate(&registry()).unwrap_err()), "table id is empty");
    }

    #[test]
    fn test_rejects_missing_column_fields() {
        let mut table = seals();
        table.columns[0].id = String::new();
        assert!(table.validate(&registry()).is_err());

        let mut table = seals();
        table.columns[0].name = String::new();
        assert!(table.validate(&registry()).is_err());

        let mut table = seals();
        table.columns[0].data_type = String::new();
        assert_eq!(
            rule_of(table.validate(&registry()).unwrap_err()),
            "column 'age' has an empty type"
        );
    }

    #[test]
    fn test_revise_keeps_id() {
        let table = seals();
        let next = table
            .revise(
                TableDef::new("pinnipeds").column(ColumnDef::new("age", "int").with_id("C1")),
                &registry(),
            )
            .unwrap();
        assert_eq!(next.id, "T1");
        assert!(validate_transition(&table, &next).is_ok());
    }

    #[test]
    fn test_transition_rejects_id_change() {
        let old = seals();
        let mut new = seals();
        new.id = "T2".into();
        assert!(matches!(
            validate_transition(&old, &new),
            Err(SchemaError::Transition { .. })
        ));
    }

    #[test]
    fn test_transition_rejects_type_change() {
        let old = seals();
        let mut new = seals();
        new.columns[0].data_type = "float".into();
        let err = validate_transition(&old, &new).unwrap_err();
        assert!(err.to_string().contains("type changes are not supported"));
    }

    #[test]
    fn test_catalog_row_round_trip() {
        let mut table = seals();
        table.rules.update_rule = AccessLevel::Owner;
        let row = CatalogRow::from_table(&table).unwrap();
        assert_eq!(row.update_rule, "owner");
        assert_eq!(row.into_table().unwrap(), table);
    }

    #[test]
    fn test_decode_row_keeps_undecodable_values() {
        let table = Table::new(
            TableDef::new("seals")
                .column(ColumnDef::new("tags", "json"))
                .column(ColumnDef::new("meta", "json")),
            &registry(),
        )
        .unwrap();
        let mut row = Map::new();
        row.insert("id".into(), json!("r1"));
        row.insert("tags".into(), json!(r#"["a","b"]"#));
        row.insert("meta".into(), json!("{broken"));

        let decoded = table.decode_row(&registry(), row);
        assert_eq!(decoded["id"], json!("r1"));
        assert_eq!(decoded["tags"], json!(["a", "b"]));
        assert_eq!(decoded["meta"], json!("{broken"));
    }

    #[test]
    fn test_encode_row() {
        let table = Table::new(
            TableDef::new("seals").column(ColumnDef::new("tags", "json")),
            &registry(),
        )
        .unwrap();
        let mut row = Map::new();
        row.insert("tags".into(), json!(["a"]));
        let encoded = table.encode_row(&registry(), row);
        assert_eq!(encoded["tags"], json!(r#"["a"]"#));
    }

    #[test]
    fn test_access_level_parse() {
        assert_eq!("admin".parse::<AccessLevel>(), Ok(AccessLevel::Admin));
        assert!("Admin".parse::<AccessLevel>().is_err());
    }
}
