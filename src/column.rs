//! Column model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{SchemaError, SchemaResult};
use crate::types::TypeRegistry;

/// Column names managed by the store itself on every table.
pub const RESERVED_NAMES: &[&str] = &["id", "created_at", "updated_at"];

/// One typed field of a table.
///
/// `id` is the column's identity across revisions; renaming a column keeps
/// its id, so the diff engine can tell a rename from a drop plus add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// Reserved for per-type constraints. Carried, never interpreted.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub options: Map<String, Value>,
}

impl Column {
    /// Create a validated column with a freshly generated id.
    ///
    /// # Example
    ///
    /// ```
    /// use tablewright::{Column, TypeRegistry};
    ///
    /// let registry = TypeRegistry::builtin();
    /// let col = Column::new("weight", "float", &registry).unwrap();
    /// assert_eq!(col.data_type, "float");
    /// ```
    pub fn new(name: &str, data_type: &str, registry: &TypeRegistry) -> SchemaResult<Self> {
        let col = Self {
            id: new_id(),
            name: name.to_string(),
            data_type: data_type.to_string(),
            options: Map::new(),
        };
        col.check(registry)
            .map_err(|rule| SchemaError::column_validation(name, rule))?;
        Ok(col)
    }

    /// Replace the generated id, e.g. to keep identity with a stored revision.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    /// Check the column-local invariants, returning the violated rule.
    pub(crate) fn check(&self, registry: &TypeRegistry) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err(format!("column '{}' has an empty id", self.name));
        }
        if self.name.trim().is_empty() {
            return Err(format!("column '{}' has an empty name", self.id));
        }
        if self.data_type.trim().is_empty() {
            return Err(format!("column '{}' has an empty type", self.name));
        }
        if RESERVED_NAMES.contains(&self.name.as_str()) {
            return Err(format!("column name '{}' is reserved", self.name));
        }
        if !registry.contains(&self.data_type) {
            return Err(format!(
                "column '{}' has unknown type '{}'",
                self.name, self.data_type
            ));
        }
        Ok(())
    }
}

/// Caller-supplied column definition. A missing id means "new column".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnDef {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Unchecked conversion; validation happens at the table level.
    pub(crate) fn into_column(self) -> Column {
        Column {
            id: self.id.unwrap_or_else(new_id),
            name: self.name,
            data_type: self.data_type,
            options: self.options,
        }
    }
}

impl From<&Column> for ColumnDef {
    fn from(col: &Column) -> Self {
        Self {
            id: Some(col.id.clone()),
            name: col.name.clone(),
            data_type: col.data_type.clone(),
            options: col.options.clone(),
        }
    }
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}
