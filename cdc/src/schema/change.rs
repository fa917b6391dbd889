use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::schema::{Column, Database, Schema, Table};

/// Where a new or modified column is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnPosition {
    /// Appended for new columns, unchanged for modified ones.
    Default,
    First,
    After(String),
}

/// A single clause of an `ALTER TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AlterOperation {
    AddColumn {
        column: Column,
        position: ColumnPosition,
    },
    DropColumn {
        name: String,
    },
    /// Covers both `MODIFY` and `CHANGE`, the latter may rename the column.
    ModifyColumn {
        name: String,
        column: Column,
        position: ColumnPosition,
    },
    RenameTable {
        database: String,
        name: String,
    },
    /// An empty list drops the primary key.
    SetPrimaryKey {
        columns: Vec<String>,
    },
    SetCharset {
        charset: String,
    },
}

/// A schema mutation resolved against the current [`Schema`].
///
/// Creating something that already exists is a no-op because the binlog may replay creations
/// the model has already seen. Altering or dropping something absent fails with
/// [`ErrorKind::SchemaChangeInvalid`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResolvedSchemaChange {
    DatabaseCreate {
        database: String,
        charset: Option<String>,
    },
    DatabaseAlter {
        database: String,
        charset: String,
    },
    DatabaseDrop {
        database: String,
    },
    TableCreate {
        table: Table,
    },
    TableAlter {
        database: String,
        table: String,
        operations: Vec<AlterOperation>,
    },
    TableDrop {
        database: String,
        table: String,
    },
}

impl ResolvedSchemaChange {
    /// Database the change targets, used for filtering.
    pub fn database(&self) -> &str {
        match self {
            ResolvedSchemaChange::DatabaseCreate { database, .. }
            | ResolvedSchemaChange::DatabaseAlter { database, .. }
            | ResolvedSchemaChange::DatabaseDrop { database }
            | ResolvedSchemaChange::TableAlter { database, .. }
            | ResolvedSchemaChange::TableDrop { database, .. } => database,
            ResolvedSchemaChange::TableCreate { table } => &table.database,
        }
    }

    /// Table the change targets, `None` for database level changes.
    pub fn table(&self) -> Option<&str> {
        match self {
            ResolvedSchemaChange::DatabaseCreate { .. }
            | ResolvedSchemaChange::DatabaseAlter { .. }
            | ResolvedSchemaChange::DatabaseDrop { .. } => None,
            ResolvedSchemaChange::TableCreate { table } => Some(&table.name),
            ResolvedSchemaChange::TableAlter { table, .. }
            | ResolvedSchemaChange::TableDrop { table, .. } => Some(table),
        }
    }

    /// Applies the change to `schema`.
    ///
    /// On error the schema is left untouched.
    pub fn apply(&self, schema: &mut Schema) -> CdcResult<()> {
        match self {
            ResolvedSchemaChange::DatabaseCreate { database, charset } => {
                if schema.has_database(database) {
                    debug!(database, "database already exists, skipping create");
                    return Ok(());
                }

                let mut created = Database::new(database.clone());
                created.charset = charset.clone();
                schema.databases.push(created);
            }
            ResolvedSchemaChange::DatabaseAlter { database, charset } => {
                let Some(target) = schema.find_database_mut(database) else {
                    bail!(
                        ErrorKind::SchemaChangeInvalid,
                        "Cannot alter a database that does not exist",
                        database
                    );
                };
                target.charset = Some(charset.clone());
            }
            ResolvedSchemaChange::DatabaseDrop { database } => {
                let Some(index) = schema
                    .databases
                    .iter()
                    .position(|candidate| candidate.name.eq_ignore_ascii_case(database))
                else {
                    bail!(
                        ErrorKind::SchemaChangeInvalid,
                        "Cannot drop a database that does not exist",
                        database
                    );
                };
                schema.databases.remove(index);
            }
            ResolvedSchemaChange::TableCreate { table } => {
                let Some(database) = schema.find_database_mut(&table.database) else {
                    bail!(
                        ErrorKind::SchemaChangeInvalid,
                        "Cannot create a table in a database that does not exist",
                        format!("{}.{}", table.database, table.name)
                    );
                };

                if database.has_table(&table.name) {
                    debug!(
                        database = %table.database,
                        table = %table.name,
                        "table already exists, skipping create"
                    );
                    return Ok(());
                }

                let mut created = table.clone();
                if created.charset.is_none() {
                    created.charset = database.charset.clone();
                }
                database.tables.push(created);
            }
            ResolvedSchemaChange::TableAlter {
                database,
                table,
                operations,
            } => {
                let Some(current) = schema.find_table(database, table) else {
                    bail!(
                        ErrorKind::SchemaChangeInvalid,
                        "Cannot alter a table that does not exist",
                        format!("{database}.{table}")
                    );
                };

                let mut altered = current.clone();
                let mut destination = None;
                for operation in operations {
                    if let Some(renamed) = apply_alter_operation(&mut altered, operation, schema)? {
                        destination = Some(renamed);
                    }
                }

                let target_database = destination.unwrap_or_else(|| database.clone());
                if !schema.has_database(&target_database) {
                    bail!(
                        ErrorKind::SchemaChangeInvalid,
                        "Cannot move a table into a database that does not exist",
                        target_database
                    );
                }

                if let Some(source) = schema.find_database_mut(database) {
                    source.remove_table(table);
                }
                if let Some(target) = schema.find_database_mut(&target_database) {
                    target.tables.push(altered);
                }
            }
            ResolvedSchemaChange::TableDrop { database, table } => {
                let dropped = schema
                    .find_database_mut(database)
                    .and_then(|target| target.remove_table(table));

                if dropped.is_none() {
                    bail!(
                        ErrorKind::SchemaChangeInvalid,
                        "Cannot drop a table that does not exist",
                        format!("{database}.{table}")
                    );
                }
            }
        }

        Ok(())
    }
}

/// Applies one clause to `table`, returning the destination database when the clause renames
/// the table.
fn apply_alter_operation(
    table: &mut Table,
    operation: &AlterOperation,
    schema: &Schema,
) -> CdcResult<Option<String>> {
    match operation {
        AlterOperation::AddColumn { column, position } => {
            if table.has_column(&column.name) {
                bail!(
                    ErrorKind::SchemaChangeInvalid,
                    "Cannot add a column that already exists",
                    format!("{}.{}.{}", table.database, table.name, column.name)
                );
            }

            let index = insertion_index(table, position, table.columns.len())?;
            table.columns.insert(index, column.clone());
        }
        AlterOperation::DropColumn { name } => {
            let Some(index) = table.column_index(name) else {
                bail!(
                    ErrorKind::SchemaChangeInvalid,
                    "Cannot drop a column that does not exist",
                    format!("{}.{}.{}", table.database, table.name, name)
                );
            };

            table.columns.remove(index);
            table
                .primary_key
                .retain(|column| !column.eq_ignore_ascii_case(name));
        }
        AlterOperation::ModifyColumn {
            name,
            column,
            position,
        } => {
            let Some(index) = table.column_index(name) else {
                bail!(
                    ErrorKind::SchemaChangeInvalid,
                    "Cannot modify a column that does not exist",
                    format!("{}.{}.{}", table.database, table.name, name)
                );
            };

            let renamed = !column.name.eq_ignore_ascii_case(name);
            if renamed && table.has_column(&column.name) {
                bail!(
                    ErrorKind::SchemaChangeInvalid,
                    "Cannot rename a column onto an existing column",
                    format!("{}.{}.{}", table.database, table.name, column.name)
                );
            }

            table.columns.remove(index);
            let target = insertion_index(table, position, index)?;
            table.columns.insert(target, column.clone());

            if renamed {
                for key in table.primary_key.iter_mut() {
                    if key.eq_ignore_ascii_case(name) {
                        *key = column.name.clone();
                    }
                }
            }
        }
        AlterOperation::RenameTable { database, name } => {
            if schema.find_table(database, name).is_some() {
                bail!(
                    ErrorKind::SchemaChangeInvalid,
                    "Cannot rename a table onto an existing table",
                    format!("{database}.{name}")
                );
            }

            table.database = database.clone();
            table.name = name.clone();
            return Ok(Some(database.clone()));
        }
        AlterOperation::SetPrimaryKey { columns } => {
            if let Some(missing) = columns.iter().find(|column| !table.has_column(column)) {
                bail!(
                    ErrorKind::SchemaChangeInvalid,
                    "Primary key references a column that does not exist",
                    format!("{}.{}.{}", table.database, table.name, missing)
                );
            }

            table.primary_key = columns.clone();
        }
        AlterOperation::SetCharset { charset } => {
            table.charset = Some(charset.clone());
        }
    }

    Ok(None)
}

fn insertion_index(table: &Table, position: &ColumnPosition, default: usize) -> CdcResult<usize> {
    match position {
        ColumnPosition::Default => Ok(default.min(table.columns.len())),
        ColumnPosition::First => Ok(0),
        ColumnPosition::After(anchor) => match table.column_index(anchor) {
            Some(index) => Ok(index + 1),
            None => bail!(
                ErrorKind::SchemaChangeInvalid,
                "Column position references a column that does not exist",
                format!("{}.{}.{}", table.database, table.name, anchor)
            ),
        },
    }
}
