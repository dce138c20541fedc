//! CustomFieldsContext: main API surface for custom fields.
//!
//! The context owns the store, configuration, owner registry, and rule
//! evaluator. Owner-scoped operations live on [`OwnerFields`], obtained with
//! [`CustomFieldsContext::owner`] or [`CustomFieldsContext::for_model`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::CustomFieldsConfig;
use crate::defaults::{is_seeded, FieldDefaults};
use crate::error::{FieldsError, Result};
use crate::ordering::ScopeLocks;
use crate::owner::{HasCustomFields, OwnerRef, OwnerRegistry};
use crate::request::{extract_submission, FieldRequest};
use crate::store::{FieldQuery, FieldStore};
use crate::types::{
    normalize_group, CustomField, FieldDraft, FieldId, FieldPatch, FieldResponse, FieldScope,
    FieldType,
};
use crate::validation::{
    rekey, FieldKey, FieldValidator, RuleEvaluator, StandardRules, Submission, ValidationReport,
};
use crate::values::{aggregate, FieldValue};

/// Builder for `CustomFieldsContext`. Created by `CustomFieldsContext::open()`.
pub struct CustomFieldsContextBuilder {
    store: Arc<dyn FieldStore>,
    config: CustomFieldsConfig,
    registry: OwnerRegistry,
    evaluator: Arc<dyn RuleEvaluator>,
}

impl CustomFieldsContextBuilder {
    pub fn with_config(mut self, config: CustomFieldsConfig) -> Self {
        self.config = config;
        self
    }

    /// Owner loaders used to confirm owners before fields are attached.
    pub fn with_registry(mut self, registry: OwnerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replace the built-in rule evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn build(self) -> Result<CustomFieldsContext> {
        self.config.validate()?;
        debug!(
            registry = ?self.registry,
            form_name = %self.config.form_name,
            "custom fields context opened"
        );
        Ok(CustomFieldsContext {
            inner: Arc::new(Inner {
                store: self.store,
                config: self.config,
                registry: self.registry,
                evaluator: self.evaluator,
                locks: ScopeLocks::new(),
            }),
        })
    }
}

struct Inner {
    store: Arc<dyn FieldStore>,
    config: CustomFieldsConfig,
    registry: OwnerRegistry,
    evaluator: Arc<dyn RuleEvaluator>,
    locks: ScopeLocks,
}

/// Shared handle to the custom fields of every owner. Cheap to clone.
#[derive(Clone)]
pub struct CustomFieldsContext {
    inner: Arc<Inner>,
}

impl CustomFieldsContext {
    /// Start building a context over `store`.
    ///
    /// ```rust,ignore
    /// let ctx = CustomFieldsContext::open(MemoryStore::new()).build()?;
    /// let survey = ctx.owner(OwnerRef::new("survey", "1"));
    /// let field = survey
    ///     .create_field(FieldDraft::new(FieldType::Email, "Contact email").required(true))
    ///     .await?;
    /// ```
    pub fn open(store: impl FieldStore + 'static) -> CustomFieldsContextBuilder {
        Self::open_shared(Arc::new(store))
    }

    /// Like [`open`](Self::open) for a store that is shared elsewhere.
    pub fn open_shared(store: Arc<dyn FieldStore>) -> CustomFieldsContextBuilder {
        CustomFieldsContextBuilder {
            store,
            config: CustomFieldsConfig::default(),
            registry: OwnerRegistry::new(),
            evaluator: Arc::new(StandardRules),
        }
    }

    /// Operations scoped to one owner.
    pub fn owner(&self, owner: OwnerRef) -> OwnerFields<'_> {
        OwnerFields { ctx: self, owner }
    }

    /// Operations scoped to a host entity.
    pub fn for_model<M: HasCustomFields>(&self, model: &M) -> OwnerFields<'_> {
        self.owner(model.owner_ref())
    }

    pub fn config(&self) -> &CustomFieldsConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn FieldStore> {
        &self.inner.store
    }

    /// Look up a field of any owner, archived or not.
    pub async fn field(&self, id: FieldId) -> Result<CustomField> {
        self.inner
            .store
            .find_field(id)
            .await?
            .ok_or(FieldsError::FieldNotFound { id })
    }

    /// Mark a field archived. Archiving an archived field refreshes the
    /// timestamp.
    pub async fn archive(&self, id: FieldId) -> Result<CustomField> {
        let field = self.inner.store.set_archived_at(id, Some(Utc::now())).await?;
        info!(field_id = %id, owner = %field.owner, "field archived");
        Ok(field)
    }

    /// Make a field active again.
    pub async fn unarchive(&self, id: FieldId) -> Result<CustomField> {
        let field = self.inner.store.set_archived_at(id, None).await?;
        info!(field_id = %id, owner = %field.owner, "field unarchived");
        Ok(field)
    }

    /// Edit a field's definition. The type is locked once responses exist;
    /// the store checks that atomically with the write.
    pub async fn update_field(&self, id: FieldId, patch: &FieldPatch) -> Result<CustomField> {
        let field = self.field(id).await?;
        let updated = patch.apply(&field)?;
        self.inner.store.save_field(&updated).await?;
        info!(field_id = %id, "field updated");
        Ok(updated)
    }

    pub async fn responses(&self, id: FieldId) -> Result<Vec<FieldResponse>> {
        self.field(id).await?;
        self.inner.store.list_responses(id).await
    }

    /// The field's answer aggregated from its responses.
    pub async fn values(&self, id: FieldId) -> Result<Option<FieldValue>> {
        let field = self.field(id).await?;
        let responses = self.inner.store.list_responses(id).await?;
        Ok(aggregate(field.field_type, &responses))
    }

    fn validator(&self, fields: &[CustomField], submission: &Submission) -> FieldValidator {
        let rules: BTreeMap<_, _> = fields
            .iter()
            .map(|f| (FieldKey::new(f.id), f.validation_rules()))
            .collect();
        let names: HashMap<_, _> = fields
            .iter()
            .map(|f| (FieldKey::new(f.id), f.title.clone()))
            .collect();
        FieldValidator::new(rekey(submission), rules)
            .with_attribute_names(names)
            .with_evaluator(self.inner.evaluator.clone())
    }
}

/// Custom field operations for one owner.
pub struct OwnerFields<'a> {
    ctx: &'a CustomFieldsContext,
    owner: OwnerRef,
}

impl OwnerFields<'_> {
    pub fn owner(&self) -> &OwnerRef {
        &self.owner
    }

    fn store(&self) -> &dyn FieldStore {
        self.ctx.inner.store.as_ref()
    }

    /// Create a field; its order is one past the last in its group.
    pub async fn create_field(&self, draft: FieldDraft) -> Result<CustomField> {
        let draft = draft.normalize()?;
        self.ctx.inner.registry.verify(&self.owner).await?;

        let scope = FieldScope::new(self.owner.clone(), draft.group.clone());
        let _guard = self.ctx.inner.locks.acquire(&scope).await;
        let field = self.store().insert_field(&self.owner, &draft).await?;

        info!(
            field_id = %field.id,
            %scope,
            field_type = %field.field_type,
            order = field.order,
            "field created"
        );
        Ok(field)
    }

    /// Fields of exactly one group, by ascending order.
    pub async fn custom_fields(
        &self,
        group: Option<&str>,
        include_archived: bool,
    ) -> Result<Vec<CustomField>> {
        let query = FieldQuery::for_owner(self.owner.clone())
            .in_group(normalize_group(group.map(String::from)))
            .include_archived(include_archived);
        self.store().list_fields(&query).await
    }

    /// Fields of every group, by group then order.
    pub async fn all_fields(&self, include_archived: bool) -> Result<Vec<CustomField>> {
        let query = FieldQuery::for_owner(self.owner.clone()).include_archived(include_archived);
        self.store().list_fields(&query).await
    }

    /// Validate a submission against every active field of this owner.
    pub async fn validate_custom_fields(&self, submission: &Submission) -> Result<ValidationReport> {
        let fields = self.all_fields(false).await?;
        Ok(self.ctx.validator(&fields, submission).validate())
    }

    /// Validate a submission against the active fields of one group.
    pub async fn validate_custom_fields_in(
        &self,
        group: Option<&str>,
        submission: &Submission,
    ) -> Result<ValidationReport> {
        let fields = self.custom_fields(group, false).await?;
        Ok(self.ctx.validator(&fields, submission).validate())
    }

    /// Validate one value against one of this owner's active fields.
    pub async fn validate_custom_field(
        &self,
        field_id: FieldId,
        value: Value,
    ) -> Result<ValidationReport> {
        let field = self.active_field(field_id).await?;
        let submission = Submission::from([(field_id, value)]);
        Ok(self
            .ctx
            .validator(std::slice::from_ref(&field), &submission)
            .validate())
    }

    /// Validate the submission found under the configured form name.
    pub async fn validate_custom_fields_request(
        &self,
        request: &impl FieldRequest,
    ) -> Result<ValidationReport> {
        let submission = extract_submission(request, &self.ctx.inner.config.form_name);
        self.validate_custom_fields(&submission).await
    }

    /// Validate, then store the submitted answers.
    ///
    /// Nothing is written unless every field passes. Each submitted field's
    /// previous responses are replaced; multiselect arrays are stored one
    /// response per element and `null` clears the field.
    pub async fn save_custom_fields(&self, submission: &Submission) -> Result<ValidationReport> {
        let fields = self.all_fields(false).await?;
        let report = self.ctx.validator(&fields, submission).validate();
        if report.fails() {
            debug!(owner = %self.owner, failed = report.errors().len(), "submission rejected");
            return Ok(report);
        }

        let types: HashMap<FieldId, FieldType> =
            fields.iter().map(|f| (f.id, f.field_type)).collect();
        let answers: Vec<(FieldId, Vec<Value>)> = report
            .validated()
            .iter()
            .filter_map(|(id, value)| {
                let field_type = types.get(id)?;
                Some((*id, response_values(*field_type, value)))
            })
            .collect();

        let written = self.store().replace_responses(&answers).await?;
        info!(
            owner = %self.owner,
            fields = answers.len(),
            responses = written.len(),
            "custom field responses saved"
        );
        Ok(report)
    }

    /// Reorder a group: `ids[i]` gets order `i + 1`.
    ///
    /// `ids` must name every active field of the group exactly once; archived
    /// fields keep their relative order after them. Nothing is written
    /// otherwise.
    pub async fn order(&self, ids: &[FieldId], group: Option<&str>) -> Result<Vec<CustomField>> {
        let scope = FieldScope::new(self.owner.clone(), normalize_group(group.map(String::from)));
        let _guard = self.ctx.inner.locks.acquire(&scope).await;
        let reordered = self.store().reorder_fields(&scope, ids).await?;
        info!(%scope, fields = reordered.len(), "fields reordered");
        Ok(reordered)
    }

    /// Create each default that this owner does not have yet.
    pub async fn seed_defaults(&self, defaults: &FieldDefaults) -> Result<Vec<CustomField>> {
        let mut existing = self.all_fields(true).await?;
        let mut created = Vec::new();
        for draft in defaults.fields() {
            if is_seeded(draft, &existing) {
                continue;
            }
            let field = self.create_field(draft.clone()).await?;
            existing.push(field.clone());
            created.push(field);
        }
        debug!(owner = %self.owner, created = created.len(), "field defaults seeded");
        Ok(created)
    }

    async fn active_field(&self, field_id: FieldId) -> Result<CustomField> {
        self.store()
            .find_field(field_id)
            .await?
            .filter(|f| f.belongs_to(&self.owner) && !f.is_archived())
            .ok_or_else(|| FieldsError::FieldDoesNotBelongToModel {
                field_id,
                owner: self.owner.clone(),
            })
    }
}

/// Values to store as responses for one validated answer.
fn response_values(field_type: FieldType, value: &Value) -> Vec<Value> {
    match (field_type, value) {
        (_, Value::Null) => Vec::new(),
        (FieldType::Multiselect, Value::Array(items)) => items.clone(),
        (_, other) => vec![other.clone()],
    }
}
