use serde::{Deserialize, Serialize};

/// A column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Declared type as written in the DDL, lowercased, e.g. `varchar(255)`.
    pub column_type: String,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Identity of a table inside a [`Schema`], stable across schema mutations that do not rename
/// it. Names are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    database: String,
    table: String,
}

impl TableKey {
    pub fn new(database: &str, table: &str) -> Self {
        Self {
            database: database.to_lowercase(),
            table: table.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub database: String,
    pub name: String,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub charset: Option<String>,
}

impl Table {
    pub fn new(database: impl Into<String>, name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            database: database.into(),
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            charset: None,
        }
    }

    pub fn with_primary_key(mut self, primary_key: Vec<String>) -> Self {
        self.primary_key = primary_key;
        self
    }

    pub fn key(&self) -> TableKey {
        TableKey::new(&self.database, &self.name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub charset: Option<String>,
    pub tables: Vec<Table>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            charset: None,
            tables: Vec::new(),
        }
    }

    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|table| table.name.eq_ignore_ascii_case(name))
    }

    pub fn find_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables
            .iter_mut()
            .find(|table| table.name.eq_ignore_ascii_case(name))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.find_table(name).is_some()
    }

    /// Removes and returns the table called `name`.
    pub fn remove_table(&mut self, name: &str) -> Option<Table> {
        let index = self
            .tables
            .iter()
            .position(|table| table.name.eq_ignore_ascii_case(name))?;
        Some(self.tables.remove(index))
    }
}

/// In-memory catalog of every database, table and column the replicator knows about.
///
/// Only [`crate::schema::ResolvedSchemaChange::apply`] mutates a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub databases: Vec<Database>,
}

impl Schema {
    pub fn new(databases: Vec<Database>) -> Self {
        Self { databases }
    }

    pub fn find_database(&self, name: &str) -> Option<&Database> {
        self.databases
            .iter()
            .find(|database| database.name.eq_ignore_ascii_case(name))
    }

    pub fn find_database_mut(&mut self, name: &str) -> Option<&mut Database> {
        self.databases
            .iter_mut()
            .find(|database| database.name.eq_ignore_ascii_case(name))
    }

    pub fn has_database(&self, name: &str) -> bool {
        self.find_database(name).is_some()
    }

    pub fn find_table(&self, database: &str, table: &str) -> Option<&Table> {
        self.find_database(database)?.find_table(table)
    }
}
