use thiserror::Error;

use crate::shared::ParseFilterRuleError;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// A filter rule could not be parsed.
    #[error("Invalid filter rule `{rule}`: {source}")]
    InvalidFilterRule {
        rule: String,
        #[source]
        source: ParseFilterRuleError,
    },
}
