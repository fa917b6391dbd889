use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::error::CdcResult;
use crate::schema::ddl::resolve_statement;
use crate::schema::{ResolvedSchemaChange, Schema, Table};
use crate::types::Position;

/// A DDL statement that changed the schema, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChangeEntry {
    /// Schema version produced by this statement.
    pub schema_id: u64,
    pub sql: String,
    pub database: String,
    pub position: Position,
    pub changes: Vec<ResolvedSchemaChange>,
}

#[derive(Debug)]
struct Inner {
    schema: Schema,
    schema_id: u64,
    history: Vec<SchemaChangeEntry>,
}

/// Versioned catalog of the replicated server.
///
/// Every statement that resolves to at least one change bumps the schema id, so records carry
/// the version they were decoded against. Clones share the same catalog.
#[derive(Debug, Clone)]
pub struct SchemaStore {
    inner: Arc<Mutex<Inner>>,
}

impl SchemaStore {
    pub fn new(schema: Schema) -> Self {
        let inner = Inner {
            schema,
            schema_id: 1,
            history: Vec::new(),
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Returns a copy of the current catalog.
    pub fn schema(&self) -> Schema {
        self.lock().schema.clone()
    }

    pub fn schema_id(&self) -> u64 {
        self.lock().schema_id
    }

    pub fn find_table(&self, database: &str, table: &str) -> Option<Arc<Table>> {
        self.lock()
            .schema
            .find_table(database, table)
            .cloned()
            .map(Arc::new)
    }

    pub fn history(&self) -> Vec<SchemaChangeEntry> {
        self.lock().history.clone()
    }

    /// Interprets `sql`, applies the resulting changes and returns them.
    ///
    /// The changes are applied all-or-nothing: if any of them does not fit the current
    /// catalog, the catalog and the schema id are left untouched.
    pub fn process_sql(
        &self,
        sql: &str,
        database: &str,
        position: &Position,
    ) -> CdcResult<Vec<ResolvedSchemaChange>> {
        let mut inner = self.lock();

        let changes = resolve_statement(sql, database, &inner.schema)?;
        if changes.is_empty() {
            return Ok(changes);
        }

        let mut schema = inner.schema.clone();
        for change in &changes {
            change.apply(&mut schema)?;
        }

        inner.schema = schema;
        inner.schema_id += 1;
        let schema_id = inner.schema_id;
        inner.history.push(SchemaChangeEntry {
            schema_id,
            sql: sql.to_string(),
            database: database.to_string(),
            position: position.clone(),
            changes: changes.clone(),
        });

        info!(schema_id, %position, changes = changes.len(), "applied schema change");

        Ok(changes)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
