//! Field validation.
//!
//! Submitted values are re-keyed from [`FieldId`] into [`FieldKey`]s
//! (`field_{id}`) before evaluation so field ids never collide with anything
//! else in the validator's namespace. Every field is evaluated on its own;
//! all failures are collected into a [`ValidationReport`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use email_address::EmailAddress;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::rules::Rule;
use crate::types::FieldId;

/// Prefix that namespaces field ids for the validator.
pub const FIELD_KEY_PREFIX: &str = "field_";

/// Submitted values keyed by field id.
pub type Submission = BTreeMap<FieldId, Value>;

/// A field id re-keyed into the validator namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey(FieldId);

impl FieldKey {
    pub fn new(id: FieldId) -> Self {
        Self(id)
    }

    pub fn field_id(self) -> FieldId {
        self.0
    }

    /// Parse a `field_{id}` key.
    pub fn parse(key: &str) -> Option<Self> {
        key.strip_prefix(FIELD_KEY_PREFIX)?.parse().ok().map(Self)
    }

    /// Human-readable attribute name used in messages.
    fn display_name(self) -> String {
        self.to_string().replace('_', " ")
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{FIELD_KEY_PREFIX}{}", self.0)
    }
}

/// Re-key a submission into the validator namespace.
pub fn rekey(submission: &Submission) -> BTreeMap<FieldKey, Value> {
    submission
        .iter()
        .map(|(id, value)| (FieldKey::new(*id), value.clone()))
        .collect()
}

/// Checks one value against a rule list.
pub trait RuleEvaluator: Send + Sync {
    /// Messages for every violated rule. Empty means the value passed.
    fn check(&self, attribute: &str, value: Option<&Value>, rules: &[Rule]) -> Vec<String>;
}

/// The built-in evaluator for every rule the deriver emits.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl RuleEvaluator for StandardRules {
    fn check(&self, attribute: &str, value: Option<&Value>, rules: &[Rule]) -> Vec<String> {
        let nullable = rules.contains(&Rule::Nullable);
        let mut messages = Vec::new();

        for rule in rules {
            if *rule == Rule::Nullable {
                continue;
            }
            if !rule.is_implicit() && !is_validatable(value, nullable) {
                continue;
            }
            if let Some(message) = check_rule(rule, attribute, value) {
                messages.push(message);
                // A failed presence check makes the remaining rules meaningless.
                if rule.is_implicit() {
                    break;
                }
            }
        }

        messages
    }
}

/// Non-implicit rules skip missing values, blank strings, and nulls on
/// nullable fields.
fn is_validatable(value: Option<&Value>, nullable: bool) -> bool {
    match value {
        None => false,
        Some(Value::Null) => !nullable,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// String form of a scalar for membership checks.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some("0".to_string()),
        _ => None,
    }
}

fn check_rule(rule: &Rule, attribute: &str, value: Option<&Value>) -> Option<String> {
    let passed = match rule {
        Rule::Nullable => true,
        Rule::Required => !is_blank(value),
        Rule::Accepted => matches!(
            value,
            Some(Value::Bool(true))
        ) || value
            .and_then(scalar_text)
            .is_some_and(|s| matches!(s.as_str(), "1" | "yes" | "on" | "true")),
        Rule::Boolean => match value {
            Some(Value::Bool(_)) => true,
            Some(Value::Number(n)) => matches!(n.as_i64(), Some(0 | 1)),
            Some(Value::String(s)) => matches!(s.as_str(), "0" | "1"),
            _ => false,
        },
        Rule::Integer => match value {
            Some(Value::Number(n)) => n.is_i64() || n.is_u64(),
            Some(Value::String(s)) => s.trim().parse::<i64>().is_ok(),
            _ => false,
        },
        Rule::String => matches!(value, Some(Value::String(_))),
        Rule::Array => matches!(value, Some(Value::Array(_))),
        Rule::Email => match value {
            Some(Value::String(s)) => EmailAddress::parse_with_options(s, Default::default()).is_ok(),
            _ => false,
        },
        Rule::Uuid => match value {
            Some(Value::String(s)) => s.len() == 36 && Uuid::parse_str(s).is_ok(),
            _ => false,
        },
        Rule::Max(max) => match value {
            Some(Value::String(s)) => s.chars().count() <= *max,
            Some(Value::Array(items)) => items.len() <= *max,
            _ => true,
        },
        Rule::In(allowed) => match value {
            Some(Value::Array(items)) => items.iter().all(|item| {
                scalar_text(item).is_some_and(|s| allowed.contains(&s))
            }),
            Some(v) => scalar_text(v).is_some_and(|s| allowed.contains(&s)),
            None => false,
        },
    };

    if passed {
        None
    } else {
        Some(message_for(rule, attribute, value))
    }
}

fn message_for(rule: &Rule, attribute: &str, value: Option<&Value>) -> String {
    match rule {
        Rule::Required => format!("The {attribute} field is required."),
        Rule::Accepted => format!("The {attribute} field must be accepted."),
        Rule::Boolean => format!("The {attribute} field must be true or false."),
        Rule::Integer => format!("The {attribute} field must be an integer."),
        Rule::String => format!("The {attribute} field must be a string."),
        Rule::Array => format!("The {attribute} field must be an array."),
        Rule::Email => format!("The {attribute} field must be a valid email address."),
        Rule::Uuid => format!("The {attribute} field must be a valid UUID."),
        Rule::Max(max) => match value {
            Some(Value::Array(_)) => {
                format!("The {attribute} field must not have more than {max} items.")
            }
            _ => format!("The {attribute} field must not be greater than {max} characters."),
        },
        Rule::In(_) => format!("The selected {attribute} is invalid."),
        Rule::Nullable => format!("The {attribute} field is invalid."),
    }
}

/// Outcome of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    errors: BTreeMap<FieldId, Vec<String>>,
    validated: BTreeMap<FieldId, Value>,
}

impl ValidationReport {
    pub fn passes(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn fails(&self) -> bool {
        !self.passes()
    }

    /// Violation messages of every failing field.
    pub fn errors(&self) -> &BTreeMap<FieldId, Vec<String>> {
        &self.errors
    }

    /// Violation messages for one field; empty when it passed.
    pub fn messages_for(&self, id: FieldId) -> &[String] {
        self.errors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first_message(&self, id: FieldId) -> Option<&str> {
        self.messages_for(id).first().map(String::as_str)
    }

    /// Submitted values of the fields that passed.
    pub fn validated(&self) -> &BTreeMap<FieldId, Value> {
        &self.validated
    }

    pub fn into_validated(self) -> BTreeMap<FieldId, Value> {
        self.validated
    }
}

/// Runs keyed rule sets against keyed values.
pub struct FieldValidator {
    values: BTreeMap<FieldKey, Value>,
    rules: BTreeMap<FieldKey, Vec<Rule>>,
    attribute_names: HashMap<FieldKey, String>,
    evaluator: Arc<dyn RuleEvaluator>,
}

impl FieldValidator {
    pub fn new(values: BTreeMap<FieldKey, Value>, rules: BTreeMap<FieldKey, Vec<Rule>>) -> Self {
        Self {
            values,
            rules,
            attribute_names: HashMap::new(),
            evaluator: Arc::new(StandardRules),
        }
    }

    /// Name fields in messages by these labels instead of their keys.
    pub fn with_attribute_names(mut self, names: HashMap<FieldKey, String>) -> Self {
        self.attribute_names = names;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        for (key, rules) in &self.rules {
            let value = self.values.get(key);
            let attribute = self
                .attribute_names
                .get(key)
                .cloned()
                .unwrap_or_else(|| key.display_name());

            let messages = self.evaluator.check(&attribute, value, rules);
            if messages.is_empty() {
                if let Some(value) = value {
                    report.validated.insert(key.field_id(), value.clone());
                }
            } else {
                report.errors.insert(key.field_id(), messages);
            }
        }

        let ignored = self
            .values
            .keys()
            .filter(|k| !self.rules.contains_key(k))
            .count();
        debug!(
            fields = self.rules.len(),
            failed = report.errors.len(),
            ignored,
            "custom fields validated"
        );

        report
    }
}
