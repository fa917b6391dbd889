use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::filter::Filter;
use crate::schema::{SchemaStore, Table};
use crate::types::TableId;

/// Maps the table ids announced by table-map events onto tables of the schema.
///
/// Ids are only meaningful within one log file and may be reassigned after DDL, so the cache is
/// cleared on rotation and on every schema change.
#[derive(Debug, Default)]
pub struct TableCache {
    tables: HashMap<TableId, Arc<Table>>,
    blacklisted: HashSet<TableId>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the mapping announced by a table-map event.
    ///
    /// Blacklisted tables are remembered as such and never resolved. A table unknown to the
    /// schema is not cached, so its rows are dropped until a later table-map resolves it.
    pub fn process_table_map(
        &mut self,
        table_id: TableId,
        database: &str,
        table: &str,
        schema: &SchemaStore,
        filter: &Filter,
    ) {
        if self.tables.contains_key(&table_id) || self.blacklisted.contains(&table_id) {
            return;
        }

        if filter.is_table_blacklisted(database, table) {
            debug!(table_id, database, table, "table is blacklisted, not caching");
            self.blacklisted.insert(table_id);
            return;
        }

        match schema.find_table(database, table) {
            Some(resolved) => {
                self.tables.insert(table_id, resolved);
            }
            None => {
                warn!(
                    table_id,
                    database,
                    table,
                    "table-map event references a table missing from the schema"
                );
            }
        }
    }

    pub fn get(&self, table_id: TableId) -> Option<Arc<Table>> {
        self.tables.get(&table_id).cloned()
    }

    pub fn is_blacklisted(&self, table_id: TableId) -> bool {
        self.blacklisted.contains(&table_id)
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.blacklisted.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, Database, Schema};
    use config::shared::FilterRuleSpec;

    fn store() -> SchemaStore {
        let mut shop = Database::new("shop");
        shop.tables.push(Table::new("shop", "orders", vec![Column::new("id", "int")]));
        shop.tables.push(Table::new("shop", "secrets", vec![Column::new("id", "int")]));
        SchemaStore::new(Schema::new(vec![shop]))
    }

    fn filter() -> Filter {
        let rule: FilterRuleSpec = "blacklist: shop.secrets".parse().unwrap();
        Filter::new("maxwell", &[rule]).unwrap()
    }

    #[test]
    fn resolves_known_tables() {
        let mut cache = TableCache::new();
        cache.process_table_map(7, "shop", "orders", &store(), &filter());

        assert_eq!(cache.get(7).unwrap().name, "orders");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn skips_blacklisted_and_unknown_tables() {
        let mut cache = TableCache::new();
        cache.process_table_map(8, "shop", "secrets", &store(), &filter());
        cache.process_table_map(9, "shop", "missing", &store(), &filter());

        assert!(cache.get(8).is_none());
        assert!(cache.is_blacklisted(8));
        assert!(cache.get(9).is_none());
        assert!(!cache.is_blacklisted(9));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut cache = TableCache::new();
        cache.process_table_map(7, "shop", "orders", &store(), &filter());
        cache.process_table_map(8, "shop", "secrets", &store(), &filter());

        cache.clear();

        assert!(cache.is_empty());
        assert!(!cache.is_blacklisted(8));
    }
}
