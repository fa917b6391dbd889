//! Interpretation of logged DDL statements.
//!
//! Table statements are parsed with the MySQL dialect of `sqlparser`. Database statements,
//! `RENAME TABLE` and charset-only `ALTER TABLE` are matched directly since the dialect does not
//! cover their MySQL forms. Everything else (`CREATE INDEX`, `GRANT`, views, routines, temporary
//! tables, ...) resolves to no change. A recognized statement that cannot be parsed is a
//! [`ErrorKind::MalformedSchemaStatement`].

use std::sync::OnceLock;

use regex::Regex;
use sqlparser::ast::{
    AlterTableOperation, ColumnDef, ColumnOption, CreateTable, DataType, Ident,
    MySQLColumnPosition, ObjectName, ObjectType, Statement, TableConstraint,
};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};
use crate::schema::{AlterOperation, Column, ColumnPosition, ResolvedSchemaChange, Schema, Table};

const NAME: &str = r"(?:`[^`]+`|[\w$]+)";

/// Resolves `sql` against `schema` into the changes it implies, in statement order.
///
/// `default_database` is the session database the statement ran in, used for unqualified
/// table names.
pub fn resolve_statement(
    sql: &str,
    default_database: &str,
    schema: &Schema,
) -> CdcResult<Vec<ResolvedSchemaChange>> {
    let patterns = patterns()?;
    let text = patterns.normalize(sql);
    let resolver = Resolver {
        sql,
        default_database,
        schema,
        patterns,
    };

    match classify(&text) {
        StatementKind::Ignored => Ok(Vec::new()),
        StatementKind::CreateDatabase => resolver.create_database(&text),
        StatementKind::AlterDatabase => resolver.alter_database(&text),
        StatementKind::DropDatabase => resolver.drop_database(&text),
        StatementKind::RenameTables => resolver.rename_tables(&text),
        StatementKind::Table => resolver.table_statement(&text),
    }
}

/// Returns `true` for `CREATE TABLE ...`, the only DDL honored inside a transaction.
pub fn is_create_table(sql: &str) -> bool {
    matches!(
        leading_keywords(sql).as_slice(),
        [create, table, ..] if create == "CREATE" && table == "TABLE"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    CreateDatabase,
    AlterDatabase,
    DropDatabase,
    RenameTables,
    /// `CREATE`, `ALTER` or `DROP TABLE`, handed to the SQL parser.
    Table,
    Ignored,
}

fn classify(text: &str) -> StatementKind {
    let keywords = leading_keywords(text);
    let keywords: Vec<&str> = keywords.iter().map(String::as_str).collect();

    match keywords.as_slice() {
        ["CREATE", "DATABASE" | "SCHEMA", ..] => StatementKind::CreateDatabase,
        ["ALTER", "DATABASE" | "SCHEMA", ..] => StatementKind::AlterDatabase,
        ["DROP", "DATABASE" | "SCHEMA", ..] => StatementKind::DropDatabase,
        ["RENAME", "TABLE" | "TABLES", ..] => StatementKind::RenameTables,
        ["CREATE" | "ALTER" | "DROP", "TABLE", ..] => StatementKind::Table,
        _ => StatementKind::Ignored,
    }
}

fn leading_keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .take(2)
        .map(str::to_ascii_uppercase)
        .collect()
}

#[derive(Debug)]
struct Patterns {
    executable_comment: Regex,
    leading_comments: Regex,
    name_part: Regex,
    create_database: Regex,
    alter_database: Regex,
    drop_database: Regex,
    rename_tables: Regex,
    rename_pair: Regex,
    table_charset: Regex,
    charset: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> CdcResult<&'static Patterns> {
    if let Some(patterns) = PATTERNS.get() {
        return Ok(patterns);
    }

    let patterns = Patterns::compile()?;
    Ok(PATTERNS.get_or_init(|| patterns))
}

impl Patterns {
    fn compile() -> CdcResult<Self> {
        let qualified = format!(r"({NAME}(?:\s*\.\s*{NAME})?)");
        let charset = r#"(?:CHARACTER\s+SET|CHARSET)\s*=?\s*['"`]?(\w+)"#;

        Ok(Self {
            executable_comment: Regex::new(r"(?s)/\*!\d*(.*?)\*/")?,
            leading_comments: Regex::new(r"^(?s)(?:\s+|/\*.*?\*/|(?:--|#)[^\n]*)*")?,
            name_part: Regex::new(r"`([^`]+)`|([\w$]+)")?,
            create_database: Regex::new(&format!(
                r"(?is)^CREATE\s+(?:DATABASE|SCHEMA)\s+(IF\s+NOT\s+EXISTS\s+)?({NAME})"
            ))?,
            alter_database: Regex::new(&format!(
                r"(?is)^ALTER\s+(?:DATABASE|SCHEMA)\s+(?:({NAME})\s+)??(?:DEFAULT\s+)?{charset}"
            ))?,
            drop_database: Regex::new(&format!(
                r"(?is)^DROP\s+(?:DATABASE|SCHEMA)\s+(IF\s+EXISTS\s+)?({NAME})"
            ))?,
            rename_tables: Regex::new(r"(?is)^RENAME\s+TABLES?\s+(.+)$")?,
            rename_pair: Regex::new(&format!(r"(?is)^\s*{qualified}\s+TO\s+{qualified}\s*$"))?,
            table_charset: Regex::new(&format!(
                concat!(
                    r"(?is)^ALTER\s+TABLE\s+{qualified}\s+(?:CONVERT\s+TO\s+|DEFAULT\s+)?",
                    r"{charset}(?:\s+COLLATE\s*=?\s*\S+)?\s*$",
                ),
                qualified = qualified,
                charset = charset,
            ))?,
            charset: Regex::new(&format!("(?i){charset}"))?,
        })
    }

    /// Unwraps `/*!40101 ... */` bodies, which MySQL executes, and drops leading comments and
    /// the trailing delimiter.
    fn normalize(&self, sql: &str) -> String {
        let unwrapped = self.executable_comment.replace_all(sql, " ${1} ");
        let start = self
            .leading_comments
            .find(&unwrapped)
            .map_or(0, |comments| comments.end());

        unwrapped[start..]
            .trim_end()
            .trim_end_matches(';')
            .to_string()
    }
}

struct Resolver<'a> {
    sql: &'a str,
    default_database: &'a str,
    schema: &'a Schema,
    patterns: &'a Patterns,
}

impl Resolver<'_> {
    fn create_database(&self, text: &str) -> CdcResult<Vec<ResolvedSchemaChange>> {
        let Some(captures) = self.patterns.create_database.captures(text) else {
            return self.malformed("Expected a database name");
        };
        let database = unquote(&captures[2]);
        let charset = self
            .patterns
            .charset
            .captures(&text[captures[0].len()..])
            .map(|charset| charset[1].to_lowercase());

        if captures.get(1).is_some() && self.schema.has_database(&database) {
            return Ok(Vec::new());
        }

        Ok(vec![ResolvedSchemaChange::DatabaseCreate { database, charset }])
    }

    /// Only charset changes matter, other database options resolve to nothing.
    fn alter_database(&self, text: &str) -> CdcResult<Vec<ResolvedSchemaChange>> {
        let Some(captures) = self.patterns.alter_database.captures(text) else {
            return Ok(Vec::new());
        };
        let database = match captures.get(1) {
            Some(name) => unquote(name.as_str()),
            None => self.default_database()?,
        };

        Ok(vec![ResolvedSchemaChange::DatabaseAlter {
            database,
            charset: captures[2].to_lowercase(),
        }])
    }

    fn drop_database(&self, text: &str) -> CdcResult<Vec<ResolvedSchemaChange>> {
        let Some(captures) = self.patterns.drop_database.captures(text) else {
            return self.malformed("Expected a database name");
        };
        let database = unquote(&captures[2]);

        if captures.get(1).is_some() && !self.schema.has_database(&database) {
            return Ok(Vec::new());
        }

        Ok(vec![ResolvedSchemaChange::DatabaseDrop { database }])
    }

    fn rename_tables(&self, text: &str) -> CdcResult<Vec<ResolvedSchemaChange>> {
        let Some(captures) = self.patterns.rename_tables.captures(text) else {
            return self.malformed("Expected tables to rename");
        };

        captures[1]
            .split(',')
            .map(|pair| {
                let Some(names) = self.patterns.rename_pair.captures(pair) else {
                    return self.malformed("Expected `old TO new` in RENAME TABLE");
                };
                let (database, table) = self.qualified_name(&names[1])?;
                let (new_database, new_name) = self.qualified_name(&names[2])?;

                Ok(ResolvedSchemaChange::TableAlter {
                    database,
                    table,
                    operations: vec![AlterOperation::RenameTable {
                        database: new_database,
                        name: new_name,
                    }],
                })
            })
            .collect()
    }

    fn table_statement(&self, text: &str) -> CdcResult<Vec<ResolvedSchemaChange>> {
        if let Some(changes) = self.alter_table_charset(text)? {
            return Ok(changes);
        }

        let statements = match Parser::parse_sql(&MySqlDialect {}, text) {
            Ok(statements) => statements,
            Err(err) => bail!(
                ErrorKind::MalformedSchemaStatement,
                "Could not parse schema statement",
                self.sql,
                source: err
            ),
        };

        let mut changes = Vec::new();
        for statement in statements {
            changes.extend(self.resolve_parsed(statement)?);
        }

        Ok(changes)
    }

    fn resolve_parsed(&self, statement: Statement) -> CdcResult<Vec<ResolvedSchemaChange>> {
        match statement {
            Statement::CreateTable(create) => self.create_table(create),
            Statement::AlterTable {
                name, operations, ..
            } => self.alter_table(&name, operations),
            Statement::Drop {
                object_type: ObjectType::Table,
                if_exists,
                names,
                ..
            } => self.drop_tables(if_exists, &names),
            _ => Ok(Vec::new()),
        }
    }

    fn create_table(&self, create: CreateTable) -> CdcResult<Vec<ResolvedSchemaChange>> {
        if create.temporary {
            return Ok(Vec::new());
        }

        let (database, name) = self.table_name(&create.name)?;
        if create.if_not_exists && self.schema.find_table(&database, &name).is_some() {
            return Ok(Vec::new());
        }

        if let Some(like) = &create.like {
            let (source_database, source_name) = self.table_name(like)?;
            let Some(source) = self.schema.find_table(&source_database, &source_name) else {
                bail!(
                    ErrorKind::SchemaChangeInvalid,
                    "CREATE TABLE ... LIKE references a table that does not exist",
                    format!("{source_database}.{source_name}")
                );
            };

            let mut table = source.clone();
            table.database = database;
            table.name = name;
            return Ok(vec![ResolvedSchemaChange::TableCreate { table }]);
        }

        let mut table = Table::new(database, name, Vec::new());
        for definition in &create.columns {
            let (column, inline_primary_key) = column_from_definition(definition);
            if inline_primary_key {
                table.primary_key = vec![column.name.clone()];
            }
            table.columns.push(column);
        }

        for constraint in &create.constraints {
            if let TableConstraint::PrimaryKey { columns, .. } = constraint {
                table.primary_key = idents(columns);
            }
        }
        table.charset = create.default_charset.map(|charset| charset.to_lowercase());

        Ok(vec![ResolvedSchemaChange::TableCreate { table }])
    }

    fn alter_table(
        &self,
        name: &ObjectName,
        operations: Vec<AlterTableOperation>,
    ) -> CdcResult<Vec<ResolvedSchemaChange>> {
        let (database, table) = self.table_name(name)?;

        let mut resolved = Vec::new();
        for operation in operations {
            if let Some(operation) = self.alter_operation(&database, &table, operation)? {
                resolved.push(operation);
            }
        }

        // Only indexes, constraints or storage options changed, the shape is unaffected.
        if resolved.is_empty() && self.schema.find_table(&database, &table).is_some() {
            return Ok(Vec::new());
        }

        Ok(vec![ResolvedSchemaChange::TableAlter {
            database,
            table,
            operations: resolved,
        }])
    }

    fn alter_operation(
        &self,
        database: &str,
        table: &str,
        operation: AlterTableOperation,
    ) -> CdcResult<Option<AlterOperation>> {
        let operation = match operation {
            AlterTableOperation::AddColumn {
                column_def,
                column_position,
                ..
            } => {
                let (column, _) = column_from_definition(&column_def);
                AlterOperation::AddColumn {
                    column,
                    position: column_position_of(column_position),
                }
            }
            AlterTableOperation::AddConstraint(TableConstraint::PrimaryKey { columns, .. }) => {
                AlterOperation::SetPrimaryKey {
                    columns: idents(&columns),
                }
            }
            AlterTableOperation::DropPrimaryKey => AlterOperation::SetPrimaryKey {
                columns: Vec::new(),
            },
            AlterTableOperation::DropColumn { column_name, .. } => AlterOperation::DropColumn {
                name: column_name.value,
            },
            AlterTableOperation::ModifyColumn {
                col_name,
                data_type,
                options,
                column_position,
                ..
            } => {
                let (column, _) = column_from_parts(&col_name, &data_type, &options);
                AlterOperation::ModifyColumn {
                    name: col_name.value,
                    column,
                    position: column_position_of(column_position),
                }
            }
            AlterTableOperation::ChangeColumn {
                old_name,
                new_name,
                data_type,
                options,
                column_position,
                ..
            } => {
                let (column, _) = column_from_parts(&new_name, &data_type, &options);
                AlterOperation::ModifyColumn {
                    name: old_name.value,
                    column,
                    position: column_position_of(column_position),
                }
            }
            AlterTableOperation::RenameColumn {
                old_column_name,
                new_column_name,
                ..
            } => {
                let name = old_column_name.value;
                let Some(existing) = self
                    .schema
                    .find_table(database, table)
                    .and_then(|current| current.column_index(&name).map(|i| &current.columns[i]))
                else {
                    bail!(
                        ErrorKind::SchemaChangeInvalid,
                        "Cannot rename a column that does not exist",
                        format!("{database}.{table}.{name}")
                    );
                };

                let mut column = existing.clone();
                column.name = new_column_name.value;
                AlterOperation::ModifyColumn {
                    name,
                    column,
                    position: ColumnPosition::Default,
                }
            }
            AlterTableOperation::RenameTable { table_name } => {
                let (database, name) = self.table_name(&table_name)?;
                AlterOperation::RenameTable { database, name }
            }
            _ => return Ok(None),
        };

        Ok(Some(operation))
    }

    fn drop_tables(
        &self,
        if_exists: bool,
        names: &[ObjectName],
    ) -> CdcResult<Vec<ResolvedSchemaChange>> {
        let mut changes = Vec::new();
        for name in names {
            let (database, table) = self.table_name(name)?;
            if !if_exists || self.schema.find_table(&database, &table).is_some() {
                changes.push(ResolvedSchemaChange::TableDrop { database, table });
            }
        }

        Ok(changes)
    }

    /// `ALTER TABLE t [CONVERT TO | DEFAULT] CHARACTER SET x [COLLATE y]` alone, which the
    /// parser rejects.
    fn alter_table_charset(&self, text: &str) -> CdcResult<Option<Vec<ResolvedSchemaChange>>> {
        let Some(captures) = self.patterns.table_charset.captures(text) else {
            return Ok(None);
        };
        let (database, table) = self.qualified_name(&captures[1])?;

        Ok(Some(vec![ResolvedSchemaChange::TableAlter {
            database,
            table,
            operations: vec![AlterOperation::SetCharset {
                charset: captures[2].to_lowercase(),
            }],
        }]))
    }

    fn table_name(&self, name: &ObjectName) -> CdcResult<(String, String)> {
        match name.0.as_slice() {
            [table] => Ok((self.default_database()?, table.value.clone())),
            [database, table] => Ok((database.value.clone(), table.value.clone())),
            _ => self.malformed("Expected a table name"),
        }
    }

    fn qualified_name(&self, text: &str) -> CdcResult<(String, String)> {
        let parts: Vec<String> = self
            .patterns
            .name_part
            .captures_iter(text)
            .filter_map(|part| part.get(1).or_else(|| part.get(2)))
            .map(|part| part.as_str().to_string())
            .collect();

        match <[String; 2]>::try_from(parts) {
            Ok([database, table]) => Ok((database, table)),
            Err(parts) => match <[String; 1]>::try_from(parts) {
                Ok([table]) => Ok((self.default_database()?, table)),
                Err(_) => self.malformed("Expected a table name"),
            },
        }
    }

    fn default_database(&self) -> CdcResult<String> {
        if self.default_database.is_empty() {
            bail!(
                ErrorKind::MalformedSchemaStatement,
                "Statement references a table without a database and no database is selected",
                self.sql
            );
        }

        Ok(self.default_database.to_string())
    }

    fn malformed<T>(&self, description: &'static str) -> CdcResult<T> {
        bail!(ErrorKind::MalformedSchemaStatement, description, self.sql)
    }
}

fn column_from_definition(definition: &ColumnDef) -> (Column, bool) {
    column_from_parts(
        &definition.name,
        &definition.data_type,
        definition.options.iter().map(|option| &option.option),
    )
}

/// Builds a column, returning it with whether it was declared `PRIMARY KEY` inline.
fn column_from_parts<'a>(
    name: &Ident,
    data_type: &DataType,
    options: impl IntoIterator<Item = &'a ColumnOption>,
) -> (Column, bool) {
    let mut column = Column::new(name.value.clone(), data_type.to_string().to_lowercase());
    let mut primary_key = false;

    for option in options {
        match option {
            ColumnOption::NotNull => column.nullable = false,
            ColumnOption::Unique {
                is_primary: true, ..
            } => {
                primary_key = true;
                column.nullable = false;
            }
            _ => {}
        }
    }

    (column, primary_key)
}

fn column_position_of(position: Option<MySQLColumnPosition>) -> ColumnPosition {
    match position {
        None => ColumnPosition::Default,
        Some(MySQLColumnPosition::First) => ColumnPosition::First,
        Some(MySQLColumnPosition::After(column)) => ColumnPosition::After(column.value),
    }
}

fn idents(idents: &[Ident]) -> Vec<String> {
    idents.iter().map(|ident| ident.value.clone()).collect()
}

fn unquote(name: &str) -> String {
    name.trim_matches('`').to_string()
}
