//! Aggregation of stored responses into a field's value.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::types::{FieldResponse, FieldType};

/// The answer to a field as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    One(Value),
    Many(Vec<Value>),
}

impl FieldValue {
    pub fn as_one(&self) -> Option<&Value> {
        match self {
            Self::One(v) => Some(v),
            Self::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Value]> {
        match self {
            Self::One(_) => None,
            Self::Many(vs) => Some(vs),
        }
    }

    pub fn into_json(self) -> Value {
        match self {
            Self::One(v) => v,
            Self::Many(vs) => Value::Array(vs),
        }
    }
}

/// Collapse responses (in insertion order) into one value.
///
/// Multiselect fields collect every response, flattening array-valued ones.
/// Every other type takes the first response; later ones are ignored.
pub fn aggregate(field_type: FieldType, responses: &[FieldResponse]) -> Option<FieldValue> {
    let first = responses.first()?;

    if field_type == FieldType::Multiselect {
        let values = responses
            .iter()
            .flat_map(|r| match &r.value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            })
            .collect();
        return Some(FieldValue::Many(values));
    }

    if responses.len() > 1 {
        debug!(
            field_id = %first.field_id,
            ignored = responses.len() - 1,
            "extra responses ignored for single-valued field"
        );
    }
    Some(FieldValue::One(first.value.clone()))
}
