//! Extracting a batch submission from a generic request.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use serde_json::{Map, Value};
use tracing::warn;

use crate::types::FieldId;
use crate::validation::Submission;

/// Anything a submission can be read from by key.
pub trait FieldRequest {
    fn input(&self, key: &str) -> Option<&Value>;
}

impl FieldRequest for Value {
    fn input(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl FieldRequest for Map<String, Value> {
    fn input(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl FieldRequest for BTreeMap<String, Value> {
    fn input(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

impl<S: BuildHasher> FieldRequest for HashMap<String, Value, S> {
    fn input(&self, key: &str) -> Option<&Value> {
        self.get(key)
    }
}

/// Read the submission map stored under `form_name`.
///
/// The entry must be an object keyed by field id. Keys that are not field
/// ids are dropped; a missing or null entry is an empty submission.
pub fn extract_submission(request: &impl FieldRequest, form_name: &str) -> Submission {
    match request.input(form_name) {
        None | Some(Value::Null) => Submission::new(),
        Some(Value::Object(entries)) => entries
            .iter()
            .filter_map(|(key, value)| match key.parse::<FieldId>() {
                Ok(id) => Some((id, value.clone())),
                Err(_) => {
                    warn!(%key, "ignoring submission key that is not a field id");
                    None
                }
            })
            .collect(),
        Some(other) => {
            warn!(form_name, kind = json_kind(other), "submission is not an object");
            Submission::new()
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
