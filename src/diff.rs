//! Schema diff.
//!
//! Computes the structural operations that turn one revision of a table into
//! the next. Columns are matched by id, never by name, so a renamed column is
//! a rename and not a drop plus an add.
//!
//! The diff is symmetric: running it with the revisions swapped yields the
//! inverse of every operation, which is what rollbacks are built from.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::column::Column;
use crate::error::{SchemaError, SchemaResult};
use crate::table::{Table, validate_transition};

/// One step of a migration, applied by the runner in list order.
///
/// Column operations address the table under the name it carries at that
/// point of the sequence; the runner tracks it across `RenameTable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateTable { table: Table },
    DropTable { table: Table },
    AddColumn { column: Column },
    /// Carries the full definition so the drop can be inverted.
    DropColumn { column: Column },
    RenameColumn { from: String, to: String },
    RenameTable { from: String, to: String },
    CatalogInsert { table: Table },
    /// Replace the catalog row keyed by `table.id`.
    CatalogReplace { table: Table },
    CatalogDelete { table: Table },
}

impl Operation {
    /// The operation undoing this one. `CatalogReplace` has no inverse on its
    /// own since it does not capture the row it overwrites.
    pub fn inverse(&self) -> Option<Operation> {
        let op = match self {
            Self::CreateTable { table } => Self::DropTable { table: table.clone() },
            Self::DropTable { table } => Self::CreateTable { table: table.clone() },
            Self::AddColumn { column } => Self::DropColumn { column: column.clone() },
            Self::DropColumn { column } => Self::AddColumn { column: column.clone() },
            Self::RenameColumn { from, to } => Self::RenameColumn {
                from: to.clone(),
                to: from.clone(),
            },
            Self::RenameTable { from, to } => Self::RenameTable {
                from: to.clone(),
                to: from.clone(),
            },
            Self::CatalogInsert { table } => Self::CatalogDelete { table: table.clone() },
            Self::CatalogDelete { table } => Self::CatalogInsert { table: table.clone() },
            Self::CatalogReplace { .. } => return None,
        };
        Some(op)
    }

    /// True for operations touching the physical schema rather than the catalog.
    pub fn is_structural(&self) -> bool {
        !matches!(
            self,
            Self::CatalogInsert { .. } | Self::CatalogReplace { .. } | Self::CatalogDelete { .. }
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { table } => write!(
                f,
                "create table {} ({} columns)",
                table.name,
                table.columns.len()
            ),
            Self::DropTable { table } => write!(f, "drop table {}", table.name),
            Self::AddColumn { column } => {
                write!(f, "add column {} {}", column.name, column.data_type)
            }
            Self::DropColumn { column } => write!(f, "drop column {}", column.name),
            Self::RenameColumn { from, to } => write!(f, "rename column {} -> {}", from, to),
            Self::RenameTable { from, to } => write!(f, "rename table {} -> {}", from, to),
            Self::CatalogInsert { table } => write!(f, "catalog insert {}", table.id),
            Self::CatalogReplace { table } => write!(f, "catalog replace {}", table.id),
            Self::CatalogDelete { table } => write!(f, "catalog delete {}", table.id),
        }
    }
}

/// Compute the structural operations turning `old` into `new`.
///
/// Order: drops (in `old` column order), then adds and renames (in `new`
/// column order), then the table rename. Catalog writes are left to the
/// caller. A kept column's type is not inspected here; see
/// [`validate_transition`].
pub fn diff_tables(old: &Table, new: &Table) -> Vec<Operation> {
    let mut ops = Vec::new();

    for old_col in &old.columns {
        if new.column_by_id(&old_col.id).is_none() {
            ops.push(Operation::DropColumn {
                column: old_col.clone(),
            });
        }
    }

    for new_col in &new.columns {
        match old.column_by_id(&new_col.id) {
            None => ops.push(Operation::AddColumn {
                column: new_col.clone(),
            }),
            Some(old_col) if old_col.name != new_col.name => {
                ops.push(Operation::RenameColumn {
                    from: old_col.name.clone(),
                    to: new_col.name.clone(),
                })
            }
            Some(_) => {}
        }
    }

    // Last, so column operations resolve against the current name.
    if old.name != new.name {
        ops.push(Operation::RenameTable {
            from: old.name.clone(),
            to: new.name.clone(),
        });
    }

    ops
}

/// Invert an operation list, last operation first. Operations without an
/// inverse are skipped.
pub fn invert(ops: &[Operation]) -> Vec<Operation> {
    ops.iter().rev().filter_map(Operation::inverse).collect()
}

/// Replay column operations over `start`'s column names and fail if any
/// intermediate state is inconsistent: a duplicate name, or a rename/drop of
/// a column that is not there.
pub fn check_sequence(start: &Table, ops: &[Operation]) -> SchemaResult<()> {
    let mut names: HashSet<&str> = start.columns.iter().map(|c| c.name.as_str()).collect();
    let conflict = |reason: String| Err(SchemaError::transition(&start.name, reason));

    for op in ops {
        match op {
            Operation::AddColumn { column } => {
                if !names.insert(column.name.as_str()) {
                    return conflict(format!("{} collides with an existing column", op));
                }
            }
            Operation::DropColumn { column } => {
                if !names.remove(column.name.as_str()) {
                    return conflict(format!("{} targets a missing column", op));
                }
            }
            Operation::RenameColumn { from, to } => {
                if !names.remove(from.as_str()) {
                    return conflict(format!("{} targets a missing column", op));
                }
                if !names.insert(to.as_str()) {
                    return conflict(format!("{} collides with an existing column", op));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Forward and backward structural operations for one table revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePlan {
    pub forward: Vec<Operation>,
    pub backward: Vec<Operation>,
}

/// Validate a revision and diff it in both directions.
///
/// The backward list is the diff with the revisions swapped, and both lists
/// are checked to replay without intermediate name conflicts.
pub fn plan_update(old: &Table, new: &Table) -> SchemaResult<UpdatePlan> {
    validate_transition(old, new)?;
    let forward = diff_tables(old, new);
    let backward = diff_tables(new, old);
    check_sequence(old, &forward)?;
    check_sequence(new, &backward)?;
    Ok(UpdatePlan { forward, backward })
}
