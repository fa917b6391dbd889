//! Textual filter rule syntax.
//!
//! Each rule reads `<action>: <database>.<table>[.<column>=<value>]`, for example
//! `exclude: *.*`, `include: shop./^orders_\d+$/` or `include: shop.orders.status=paid`.
//! Patterns are `*`, a literal name or a `/regex/`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing a single filter rule.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseFilterRuleError {
    #[error("missing `:` between action and pattern")]
    MissingSeparator,
    #[error("unknown action `{0}`, expected include, exclude or blacklist")]
    UnknownAction(String),
    #[error("missing table pattern")]
    MissingTable,
    #[error("empty pattern")]
    EmptyPattern,
    #[error("unterminated regular expression")]
    UnterminatedRegex,
    #[error("column predicates require an `=` followed by a value")]
    MissingValue,
    #[error("column predicates are only allowed on include rules")]
    PredicateOnNonInclude,
    #[error("unexpected trailing input `{0}`")]
    TrailingInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Include,
    Exclude,
    /// Like exclude, but the table is also skipped when building the table cache.
    Blacklist,
}

/// A name pattern as written in a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternSpec {
    Any,
    Literal(String),
    Regex(String),
}

/// The value side of a column predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSpec {
    Null,
    Literal(String),
    Regex(String),
}

/// A parsed filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRuleSpec {
    pub action: FilterAction,
    pub database: PatternSpec,
    pub table: PatternSpec,
    pub column: Option<(String, ValueSpec)>,
}

impl FromStr for FilterRuleSpec {
    type Err = ParseFilterRuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (action, rest) = s
            .split_once(':')
            .ok_or(ParseFilterRuleError::MissingSeparator)?;

        let action = match action.trim().to_lowercase().as_str() {
            "include" => FilterAction::Include,
            "exclude" => FilterAction::Exclude,
            "blacklist" => FilterAction::Blacklist,
            other => return Err(ParseFilterRuleError::UnknownAction(other.to_string())),
        };

        let mut cursor = Cursor::new(rest.trim());
        let database = cursor.pattern()?;
        if !cursor.eat('.') {
            return Err(ParseFilterRuleError::MissingTable);
        }
        let table = cursor.pattern()?;

        let column = if cursor.eat('.') {
            if action != FilterAction::Include {
                return Err(ParseFilterRuleError::PredicateOnNonInclude);
            }

            let column = cursor.take_until(&['=']);
            if column.is_empty() {
                return Err(ParseFilterRuleError::EmptyPattern);
            }
            if !cursor.eat('=') {
                return Err(ParseFilterRuleError::MissingValue);
            }

            Some((column.to_string(), cursor.value()?))
        } else {
            None
        };

        let trailing = cursor.remaining().trim();
        if !trailing.is_empty() {
            return Err(ParseFilterRuleError::TrailingInput(trailing.to_string()));
        }

        Ok(FilterRuleSpec {
            action,
            database,
            table,
            column,
        })
    }
}

impl fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternSpec::Any => f.write_str("*"),
            PatternSpec::Literal(name) => f.write_str(name),
            PatternSpec::Regex(regex) => write!(f, "/{regex}/"),
        }
    }
}

struct Cursor<'a> {
    input: &'a str,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, offset: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.offset..]
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.remaining().starts_with(expected) {
            self.offset += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn take_until(&mut self, stops: &[char]) -> &'a str {
        let rest = self.remaining();
        let end = rest.find(|c| stops.contains(&c)).unwrap_or(rest.len());
        self.offset += end;
        rest[..end].trim()
    }

    /// Reads a `/regex/` body, honoring `\/` escapes.
    fn regex(&mut self) -> Result<String, ParseFilterRuleError> {
        let rest = self.remaining();
        let mut escaped = false;
        for (index, c) in rest.char_indices() {
            match c {
                '\\' if !escaped => escaped = true,
                '/' if !escaped => {
                    self.offset += index + 1;
                    return Ok(rest[..index].replace("\\/", "/"));
                }
                _ => escaped = false,
            }
        }

        Err(ParseFilterRuleError::UnterminatedRegex)
    }

    fn pattern(&mut self) -> Result<PatternSpec, ParseFilterRuleError> {
        if self.eat('/') {
            return self.regex().map(PatternSpec::Regex);
        }

        match self.take_until(&['.', '=']) {
            "" => Err(ParseFilterRuleError::EmptyPattern),
            "*" => Ok(PatternSpec::Any),
            literal => Ok(PatternSpec::Literal(literal.to_string())),
        }
    }

    fn value(&mut self) -> Result<ValueSpec, ParseFilterRuleError> {
        if self.eat('/') {
            return self.regex().map(ValueSpec::Regex);
        }

        let value = self.remaining().trim();
        self.offset = self.input.len();

        match value {
            "" => Err(ParseFilterRuleError::MissingValue),
            "null" => Ok(ValueSpec::Null),
            literal => Ok(ValueSpec::Literal(
                literal.trim_matches(|c| c == '\'' || c == '"').to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wildcards_and_literals() {
        let rule: FilterRuleSpec = "exclude: *.*".parse().unwrap();
        assert_eq!(rule.action, FilterAction::Exclude);
        assert_eq!(rule.database, PatternSpec::Any);
        assert_eq!(rule.table, PatternSpec::Any);
        assert_eq!(rule.column, None);

        let rule: FilterRuleSpec = "include: shop.orders".parse().unwrap();
        assert_eq!(rule.database, PatternSpec::Literal("shop".to_string()));
        assert_eq!(rule.table, PatternSpec::Literal("orders".to_string()));
    }

    #[test]
    fn parses_regex_with_dots() {
        let rule: FilterRuleSpec = r"blacklist: /^tmp\..*$/./^x\/y$/".parse().unwrap();
        assert_eq!(rule.action, FilterAction::Blacklist);
        assert_eq!(rule.database, PatternSpec::Regex(r"^tmp\..*$".to_string()));
        assert_eq!(rule.table, PatternSpec::Regex("^x/y$".to_string()));
    }

    #[test]
    fn parses_column_predicates() {
        let rule: FilterRuleSpec = "include: shop.orders.status='paid'".parse().unwrap();
        assert_eq!(
            rule.column,
            Some(("status".to_string(), ValueSpec::Literal("paid".to_string())))
        );

        let rule: FilterRuleSpec = "include: shop.orders.deleted_at=null".parse().unwrap();
        assert_eq!(rule.column, Some(("deleted_at".to_string(), ValueSpec::Null)));
    }

    #[test]
    fn rejects_malformed_rules() {
        assert_eq!(
            "shop.orders".parse::<FilterRuleSpec>(),
            Err(ParseFilterRuleError::MissingSeparator)
        );
        assert_eq!(
            "allow: shop.orders".parse::<FilterRuleSpec>(),
            Err(ParseFilterRuleError::UnknownAction("allow".to_string()))
        );
        assert_eq!(
            "include: shop".parse::<FilterRuleSpec>(),
            Err(ParseFilterRuleError::MissingTable)
        );
        assert_eq!(
            "include: /shop.orders".parse::<FilterRuleSpec>(),
            Err(ParseFilterRuleError::UnterminatedRegex)
        );
        assert_eq!(
            "exclude: shop.orders.status=paid".parse::<FilterRuleSpec>(),
            Err(ParseFilterRuleError::PredicateOnNonInclude)
        );
        assert_eq!(
            "include: shop.orders.status".parse::<FilterRuleSpec>(),
            Err(ParseFilterRuleError::MissingValue)
        );
    }
}
