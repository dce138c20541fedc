//! Core field and response types.
//!
//! All types serialize via serde. A [`CustomField`] describes one typed form
//! field attached to an owner; a [`FieldResponse`] stores one submitted value
//! for it. Fields are created from a [`FieldDraft`] and edited with a
//! [`FieldPatch`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FieldsError, Result};
use crate::owner::OwnerRef;
use crate::rules::{rules_for, Rule};

/// Store-assigned identifier of a field definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(u64);

impl FieldId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FieldId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u64> for FieldId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Store-assigned identifier of a response. Increases with insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseId(u64);

impl ResponseId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type of a field. Determines its validation rules and value shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Checkbox,
    Number,
    Radio,
    Select,
    Multiselect,
    Text,
    Textarea,
    Email,
    Phone,
    File,
    Url,
}

impl FieldType {
    /// Every supported type, in declaration order.
    pub const ALL: [FieldType; 11] = [
        FieldType::Checkbox,
        FieldType::Number,
        FieldType::Radio,
        FieldType::Select,
        FieldType::Multiselect,
        FieldType::Text,
        FieldType::Textarea,
        FieldType::Email,
        FieldType::Phone,
        FieldType::File,
        FieldType::Url,
    ];

    /// Stored name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checkbox => "checkbox",
            Self::Number => "number",
            Self::Radio => "radio",
            Self::Select => "select",
            Self::Multiselect => "multiselect",
            Self::Text => "text",
            Self::Textarea => "textarea",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::File => "file",
            Self::Url => "url",
        }
    }

    /// Whether values must come from the field's options.
    pub fn is_choice(self) -> bool {
        matches!(self, Self::Select | Self::Multiselect | Self::Radio)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = FieldsError;

    fn from_str(s: &str) -> Result<Self> {
        FieldType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FieldsError::UnknownFieldType {
                name: s.to_string(),
            })
    }
}

/// The ordering namespace of a field: one owner plus one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldScope {
    pub owner: OwnerRef,
    pub group: Option<String>,
}

impl FieldScope {
    pub fn new(owner: OwnerRef, group: Option<String>) -> Self {
        Self { owner, group }
    }
}

impl fmt::Display for FieldScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}/{}", self.owner, group),
            None => write!(f, "{}", self.owner),
        }
    }
}

/// A field definition attached to one owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomField {
    pub id: FieldId,
    pub owner: OwnerRef,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomField {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// The rule tokens a submitted value for this field is checked against.
    pub fn validation_rules(&self) -> Vec<Rule> {
        rules_for(self.field_type, self.required, &self.options)
    }

    /// The (owner, group) namespace this field is ordered within.
    pub fn scope(&self) -> FieldScope {
        FieldScope::new(self.owner.clone(), self.group.clone())
    }

    pub fn belongs_to(&self, owner: &OwnerRef) -> bool {
        &self.owner == owner
    }
}

/// Everything needed to create a field except its owner and order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDraft {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl FieldDraft {
    pub fn new(field_type: FieldType, title: impl Into<String>) -> Self {
        Self {
            field_type,
            title: title.into(),
            description: None,
            options: Vec::new(),
            group: None,
            required: false,
            default_value: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Check the draft and bring it into canonical form.
    ///
    /// Blank group names become the default group, options are dropped for
    /// types that do not use them, and choice types must list at least one
    /// option.
    pub fn normalize(mut self) -> Result<Self> {
        if self.title.trim().is_empty() {
            return Err(FieldsError::invalid_definition("title cannot be empty"));
        }
        self.group = normalize_group(self.group);
        if self.field_type.is_choice() {
            if self.options.is_empty() {
                return Err(FieldsError::invalid_definition(format!(
                    "{} field '{}' needs at least one option",
                    self.field_type, self.title
                )));
            }
        } else {
            self.options.clear();
        }
        Ok(self)
    }
}

/// Blank group names mean the default group.
pub fn normalize_group(group: Option<String>) -> Option<String> {
    group.filter(|g| !g.trim().is_empty())
}

/// A partial update of a field definition. Owner, group, and order are
/// not editable here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldPatch {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl FieldPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Whether the patch would change the field's type.
    pub fn changes_type_of(&self, field: &CustomField) -> bool {
        self.field_type.is_some_and(|t| t != field.field_type)
    }

    /// Apply the patch to a copy of `field`, re-checking the definition.
    pub fn apply(&self, field: &CustomField) -> Result<CustomField> {
        let mut draft = FieldDraft {
            field_type: self.field_type.unwrap_or(field.field_type),
            title: self.title.clone().unwrap_or_else(|| field.title.clone()),
            description: self.description.clone().or_else(|| field.description.clone()),
            options: self.options.clone().unwrap_or_else(|| field.options.clone()),
            group: field.group.clone(),
            required: self.required.unwrap_or(field.required),
            default_value: self
                .default_value
                .clone()
                .or_else(|| field.default_value.clone()),
        };
        draft = draft.normalize()?;

        Ok(CustomField {
            field_type: draft.field_type,
            title: draft.title,
            description: draft.description,
            options: draft.options,
            required: draft.required,
            default_value: draft.default_value,
            updated_at: Utc::now(),
            ..field.clone()
        })
    }
}

/// One stored answer to a field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldResponse {
    pub id: ResponseId,
    pub field_id: FieldId,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}
