//! Validation rule derivation.
//!
//! [`rules_for`] maps a field type to its rule tokens. The table does not
//! depend on requiredness; exactly one `required` or `nullable` token is
//! prepended. Checkboxes follow the same policy as every other type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::FieldType;

/// Maximum length of a single-line text answer.
pub const TEXT_MAX_LENGTH: usize = 255;

/// An atomic validation directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "arg", rename_all = "snake_case")]
pub enum Rule {
    Required,
    Nullable,
    Accepted,
    Boolean,
    Integer,
    String,
    Array,
    Email,
    Uuid,
    Max(usize),
    In(Vec<String>),
}

impl Rule {
    /// Implicit rules run even when the value is missing or empty.
    pub fn is_implicit(&self) -> bool {
        matches!(self, Rule::Required | Rule::Accepted)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => f.write_str("required"),
            Rule::Nullable => f.write_str("nullable"),
            Rule::Accepted => f.write_str("accepted"),
            Rule::Boolean => f.write_str("boolean"),
            Rule::Integer => f.write_str("integer"),
            Rule::String => f.write_str("string"),
            Rule::Array => f.write_str("array"),
            Rule::Email => f.write_str("email"),
            Rule::Uuid => f.write_str("uuid"),
            Rule::Max(n) => write!(f, "max:{n}"),
            Rule::In(values) => write!(f, "in:{}", values.join(",")),
        }
    }
}

/// Base rules for a field type, before the requiredness token.
pub fn type_rules(field_type: FieldType, options: &[String]) -> Vec<Rule> {
    match field_type {
        FieldType::Checkbox => vec![Rule::Boolean],
        FieldType::Number => vec![Rule::Integer],
        FieldType::Select | FieldType::Radio => {
            vec![Rule::String, Rule::In(options.to_vec())]
        }
        FieldType::Multiselect => vec![Rule::Array, Rule::In(options.to_vec())],
        FieldType::Text => vec![Rule::String, Rule::Max(TEXT_MAX_LENGTH)],
        FieldType::Textarea | FieldType::Phone | FieldType::Url => vec![Rule::String],
        FieldType::Email => vec![Rule::Email],
        FieldType::File => vec![Rule::Uuid],
    }
}

/// Full ordered rule list for a field.
pub fn rules_for(field_type: FieldType, required: bool, options: &[String]) -> Vec<Rule> {
    let mut rules = Vec::with_capacity(3);
    rules.push(if required {
        Rule::Required
    } else {
        Rule::Nullable
    });
    rules.extend(type_rules(field_type, options));
    rules
}

/// Render a rule list as conventional `|`-joined tokens.
pub fn to_token_string(rules: &[Rule]) -> String {
    rules
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}
