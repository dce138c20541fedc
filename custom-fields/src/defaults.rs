//! Default field definitions seeded into an owner's collection.
//!
//! Hosts build a [`FieldDefaults`] in code or parse one from YAML and pass it
//! to [`OwnerFields::seed_defaults`](crate::context::OwnerFields::seed_defaults).
//! Seeding creates every default that is missing and leaves existing fields,
//! including ones the user has edited or archived, alone.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{normalize_group, CustomField, FieldDraft};

/// An ordered collection of field drafts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDefaults {
    fields: Vec<FieldDraft>,
}

impl FieldDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a default field definition.
    pub fn field(mut self, draft: FieldDraft) -> Self {
        self.fields.push(draft);
        self
    }

    /// Access the drafts in declaration order.
    pub fn fields(&self) -> &[FieldDraft] {
        &self.fields
    }

    /// Parse defaults from YAML:
    ///
    /// ```yaml
    /// fields:
    ///   - type: select
    ///     title: T-shirt size
    ///     options: [S, M, L]
    ///     required: true
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }
}

/// Whether `existing` already satisfies `draft`: same group and title.
pub(crate) fn is_seeded(draft: &FieldDraft, existing: &[CustomField]) -> bool {
    let group = normalize_group(draft.group.clone());
    existing
        .iter()
        .any(|f| f.group == group && f.title.trim() == draft.title.trim())
}
