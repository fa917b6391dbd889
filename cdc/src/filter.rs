//! Inclusion and exclusion decisions for databases, tables and rows.

use config::shared::{FilterAction, FilterRuleSpec, PatternSpec, ReplicatorConfig, ValueSpec};
use regex::Regex;

use crate::error::CdcResult;
use crate::types::RowData;

/// Outcome of a filter evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Include,
    Exclude,
    /// Excluded by table rules, but a column-value rule may still admit individual rows once
    /// they are decoded.
    Maybe,
}

#[derive(Debug)]
enum NamePattern {
    Any,
    Literal(String),
    Regex(Regex),
}

impl NamePattern {
    fn compile(spec: &PatternSpec) -> CdcResult<Self> {
        Ok(match spec {
            PatternSpec::Any => NamePattern::Any,
            PatternSpec::Literal(name) => NamePattern::Literal(name.clone()),
            PatternSpec::Regex(pattern) => NamePattern::Regex(Regex::new(pattern)?),
        })
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Any => true,
            NamePattern::Literal(literal) => literal == name,
            NamePattern::Regex(regex) => regex.is_match(name),
        }
    }
}

#[derive(Debug)]
enum ValuePattern {
    Null,
    Literal(String),
    Regex(Regex),
}

#[derive(Debug)]
struct ColumnPredicate {
    column: String,
    value: ValuePattern,
}

impl ColumnPredicate {
    fn matches(&self, row: &RowData) -> bool {
        let Some(value) = row.get(&self.column) else {
            return false;
        };

        match (&self.value, value.as_filter_text()) {
            (ValuePattern::Null, None) => true,
            (ValuePattern::Literal(literal), Some(text)) => *literal == text,
            (ValuePattern::Regex(regex), Some(text)) => regex.is_match(&text),
            _ => false,
        }
    }
}

#[derive(Debug)]
struct FilterRule {
    action: FilterAction,
    database: NamePattern,
    table: NamePattern,
    column: Option<ColumnPredicate>,
}

impl FilterRule {
    fn compile(spec: &FilterRuleSpec) -> CdcResult<Self> {
        let column = match &spec.column {
            Some((column, value)) => {
                let value = match value {
                    ValueSpec::Null => ValuePattern::Null,
                    ValueSpec::Literal(literal) => ValuePattern::Literal(literal.clone()),
                    ValueSpec::Regex(pattern) => ValuePattern::Regex(Regex::new(pattern)?),
                };
                Some(ColumnPredicate {
                    column: column.clone(),
                    value,
                })
            }
            None => None,
        };

        Ok(Self {
            action: spec.action,
            database: NamePattern::compile(&spec.database)?,
            table: NamePattern::compile(&spec.table)?,
            column,
        })
    }

    fn matches_table(&self, database: &str, table: &str) -> bool {
        self.database.matches(database) && self.table.matches(table)
    }
}

/// Compiled filter rules plus the always-on system rules.
///
/// User rules are evaluated in order and the last matching rule wins; with no matching rule a
/// table is included.
#[derive(Debug)]
pub struct Filter {
    control_database: String,
    rules: Vec<FilterRule>,
}

impl Filter {
    pub fn new(control_database: impl Into<String>, rules: &[FilterRuleSpec]) -> CdcResult<Self> {
        let rules = rules
            .iter()
            .map(FilterRule::compile)
            .collect::<CdcResult<Vec<_>>>()?;

        Ok(Self {
            control_database: control_database.into(),
            rules,
        })
    }

    pub fn from_config(config: &ReplicatorConfig) -> CdcResult<Self> {
        let rules = config.filter_rules()?;
        Self::new(config.control_database.clone(), &rules)
    }

    /// A filter without user rules.
    pub fn include_all(control_database: impl Into<String>) -> Self {
        Self {
            control_database: control_database.into(),
            rules: Vec::new(),
        }
    }

    /// Vendor health-check and heartbeat tables that are never replicated.
    pub fn is_system_blacklisted(database: &str, table: &str) -> bool {
        database == "mysql" && (table == "ha_health_check" || table.starts_with("rds_heartbeat"))
    }

    pub fn is_control_database(&self, database: &str) -> bool {
        database.eq_ignore_ascii_case(&self.control_database)
    }

    /// Returns `true` when the table must not even be tracked in the table cache.
    pub fn is_table_blacklisted(&self, database: &str, table: &str) -> bool {
        if Self::is_system_blacklisted(database, table) {
            return true;
        }

        self.rules.iter().any(|rule| {
            rule.action == FilterAction::Blacklist
                && rule.column.is_none()
                && rule.matches_table(database, table)
        })
    }

    /// Decides whether rows of `database.table` are replicated.
    ///
    /// Without `row`, column-value rules cannot be evaluated, so an exclusion that such a rule
    /// could overturn for one of `columns` is reported as [`FilterDecision::Maybe`].
    pub fn decide(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        row: Option<&RowData>,
    ) -> FilterDecision {
        if Self::is_system_blacklisted(database, table) {
            return FilterDecision::Exclude;
        }
        if self.is_control_database(database) {
            return FilterDecision::Include;
        }

        let mut included = true;
        for rule in &self.rules {
            if !rule.matches_table(database, table) {
                continue;
            }

            match (&rule.column, row) {
                (None, _) => included = rule.action == FilterAction::Include,
                (Some(predicate), Some(row)) if predicate.matches(row) => included = true,
                (Some(_), _) => {}
            }
        }

        if included {
            return FilterDecision::Include;
        }

        let could_include_by_value = row.is_none()
            && self.rules.iter().any(|rule| {
                rule.column.as_ref().is_some_and(|predicate| {
                    rule.matches_table(database, table)
                        && columns
                            .iter()
                            .any(|column| column.eq_ignore_ascii_case(&predicate.column))
                })
            });

        if could_include_by_value {
            FilterDecision::Maybe
        } else {
            FilterDecision::Exclude
        }
    }

    /// Row-level check, once the row is decoded.
    pub fn includes_row(&self, database: &str, table: &str, row: &RowData) -> bool {
        self.decide(database, table, &[], Some(row)) == FilterDecision::Include
    }

    /// Decides whether a schema change on `database` (and `table`, when table level) is
    /// emitted as a record.
    pub fn includes_schema_change(&self, database: &str, table: Option<&str>) -> bool {
        match table {
            Some(table) => {
                !self.is_table_blacklisted(database, table)
                    && self.decide(database, table, &[], None) == FilterDecision::Include
            }
            None => {
                if self.is_control_database(database) {
                    return true;
                }
                // A database level change is emitted unless a table-agnostic rule excludes the
                // whole database.
                let mut included = true;
                for rule in &self.rules {
                    if rule.column.is_none()
                        && matches!(rule.table, NamePattern::Any)
                        && rule.database.matches(database)
                    {
                        included = rule.action == FilterAction::Include;
                    }
                }
                included
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn filter(rules: &[&str]) -> Filter {
        let specs = rules
            .iter()
            .map(|rule| rule.parse::<FilterRuleSpec>().unwrap())
            .collect::<Vec<_>>();
        Filter::new("maxwell", &specs).unwrap()
    }

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn defaults_to_include() {
        let filter = Filter::include_all("maxwell");
        assert_eq!(
            filter.decide("shop", "orders", &[], None),
            FilterDecision::Include
        );
    }

    #[test]
    fn last_matching_rule_wins() {
        let filter = filter(&["exclude: *.*", "include: shop.*", "exclude: shop.audit"]);

        assert_eq!(filter.decide("shop", "orders", &[], None), FilterDecision::Include);
        assert_eq!(filter.decide("shop", "audit", &[], None), FilterDecision::Exclude);
        assert_eq!(filter.decide("crm", "users", &[], None), FilterDecision::Exclude);
    }

    #[test]
    fn regex_patterns_match_anywhere() {
        let filter = filter(&["exclude: /^tmp_/.*"]);

        assert_eq!(filter.decide("tmp_1", "x", &[], None), FilterDecision::Exclude);
        assert_eq!(filter.decide("shop", "x", &[], None), FilterDecision::Include);
    }

    #[test]
    fn system_rules_override_user_rules() {
        let filter = filter(&["include: mysql.*", "exclude: *.*"]);

        assert_eq!(
            filter.decide("mysql", "rds_heartbeat2", &[], None),
            FilterDecision::Exclude
        );
        assert_eq!(
            filter.decide("mysql", "ha_health_check", &[], None),
            FilterDecision::Exclude
        );
        assert_eq!(
            filter.decide("maxwell", "heartbeats", &[], None),
            FilterDecision::Include
        );
        assert!(filter.is_table_blacklisted("mysql", "ha_health_check"));
    }

    #[test]
    fn column_rules_turn_exclusions_into_maybe_until_rows_are_known() {
        let filter = filter(&["exclude: shop.*", "include: shop.orders.status=paid"]);

        assert_eq!(
            filter.decide("shop", "orders", &columns(&["id", "status"]), None),
            FilterDecision::Maybe
        );
        assert_eq!(
            filter.decide("shop", "orders", &columns(&["id"]), None),
            FilterDecision::Exclude
        );

        let paid: RowData = [("id", Value::from(1i64)), ("status", Value::from("paid"))]
            .into_iter()
            .collect();
        let open: RowData = [("id", Value::from(2i64)), ("status", Value::from("open"))]
            .into_iter()
            .collect();
        assert!(filter.includes_row("shop", "orders", &paid));
        assert!(!filter.includes_row("shop", "orders", &open));
    }

    #[test]
    fn null_predicates_match_null_values() {
        let filter = filter(&["exclude: *.*", "include: shop.orders.deleted_at=null"]);

        let live: RowData = [("deleted_at", Value::Null)].into_iter().collect();
        let deleted: RowData = [("deleted_at", Value::from("2024-01-01"))]
            .into_iter()
            .collect();
        assert!(filter.includes_row("shop", "orders", &live));
        assert!(!filter.includes_row("shop", "orders", &deleted));
    }

    #[test]
    fn blacklist_rules_skip_table_tracking() {
        let filter = filter(&["blacklist: shop.secrets"]);

        assert!(filter.is_table_blacklisted("shop", "secrets"));
        assert!(!filter.is_table_blacklisted("shop", "orders"));
        assert_eq!(filter.decide("shop", "secrets", &[], None), FilterDecision::Exclude);
    }

    #[test]
    fn schema_changes_follow_table_and_database_rules() {
        let filter = filter(&["exclude: *.*", "include: included.*"]);

        assert!(filter.includes_schema_change("included", Some("t2")));
        assert!(!filter.includes_schema_change("excluded", Some("t2")));
        assert!(filter.includes_schema_change("included", None));
        assert!(!filter.includes_schema_change("excluded", None));
        assert!(filter.includes_schema_change("maxwell", None));
    }
}
