//! User-defined custom fields attached to host entities
//!
//! `custom-fields` lets any host entity (a survey, an event, a product) own a
//! collection of typed field definitions, collect responses to them, and
//! validate submissions against rules derived from each field's type.
//!
//! # Architecture
//!
//! - **Owner-scoped**: Fields belong to an [`OwnerRef`] (kind + id); host types
//!   opt in by implementing [`HasCustomFields`]
//! - **Typed rules**: Each [`FieldType`] maps to a fixed rule list; `required`
//!   and choice options refine it
//! - **Group ordering**: Fields are ordered `1..N` within an (owner, group)
//!   scope; reorders are all-or-nothing
//! - **Soft archive**: Archived fields keep their responses but drop out of
//!   listings and validation
//! - **Pluggable storage**: [`FieldStore`] with an in-memory implementation
//!   here and SQLite in `custom-fields-sqlite`

pub mod config;
pub mod context;
pub mod defaults;
pub mod error;
pub mod memory;
pub mod ordering;
pub mod owner;
pub mod request;
pub mod rules;
pub mod store;
pub mod types;
pub mod validation;
pub mod values;

pub use config::{ConfigError, CustomFieldsConfig, TableNames};
pub use context::{CustomFieldsContext, CustomFieldsContextBuilder, OwnerFields};
pub use defaults::FieldDefaults;
pub use error::{FieldsError, Result};
pub use memory::MemoryStore;
pub use ordering::{next_order, plan_reorder, ScopeGuard, ScopeLocks};
pub use owner::{HasCustomFields, OwnerLoader, OwnerRef, OwnerRegistry};
pub use request::{extract_submission, FieldRequest};
pub use rules::{rules_for, to_token_string, Rule, TEXT_MAX_LENGTH};
pub use store::{FieldOrdering, FieldQuery, FieldStore, GroupFilter};
pub use types::{
    CustomField, FieldDraft, FieldId, FieldPatch, FieldResponse, FieldScope, FieldType, ResponseId,
};
pub use validation::{
    FieldKey, FieldValidator, RuleEvaluator, StandardRules, Submission, ValidationReport,
};
pub use values::{aggregate, FieldValue};
