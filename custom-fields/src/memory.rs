//! In-process [`FieldStore`] backed by a single mutex.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{FieldsError, Result};
use crate::ordering::{next_order, plan_reorder};
use crate::owner::OwnerRef;
use crate::store::{sort_fields, FieldQuery, FieldStore};
use crate::types::{CustomField, FieldDraft, FieldId, FieldResponse, FieldScope, ResponseId};

#[derive(Debug, Default)]
struct MemoryState {
    fields: BTreeMap<FieldId, CustomField>,
    responses: Vec<FieldResponse>,
    last_field_id: u64,
    last_response_id: u64,
}

impl MemoryState {
    fn scope_fields(&self, scope: &FieldScope) -> Vec<CustomField> {
        let query = FieldQuery::for_scope(scope);
        self.fields
            .values()
            .filter(|f| query.matches(f))
            .cloned()
            .collect()
    }

    fn field_mut(&mut self, id: FieldId) -> Result<&mut CustomField> {
        self.fields
            .get_mut(&id)
            .ok_or(FieldsError::FieldNotFound { id })
    }

    fn push_response(&mut self, field_id: FieldId, value: Value) -> FieldResponse {
        self.last_response_id += 1;
        let response = FieldResponse {
            id: ResponseId::new(self.last_response_id),
            field_id,
            value,
            created_at: Utc::now(),
        };
        self.responses.push(response.clone());
        response
    }
}

/// Keeps everything in memory. Every operation holds the one lock for its
/// whole duration, so read-modify-write sequences are atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| FieldsError::storage("memory store lock poisoned"))
    }
}

#[async_trait]
impl FieldStore for MemoryStore {
    async fn insert_field(&self, owner: &OwnerRef, draft: &FieldDraft) -> Result<CustomField> {
        let mut state = self.state()?;
        let scope = FieldScope::new(owner.clone(), draft.group.clone());
        let order = next_order(&state.scope_fields(&scope));

        state.last_field_id += 1;
        let now = Utc::now();
        let field = CustomField {
            id: FieldId::new(state.last_field_id),
            owner: owner.clone(),
            field_type: draft.field_type,
            title: draft.title.clone(),
            description: draft.description.clone(),
            options: draft.options.clone(),
            group: draft.group.clone(),
            required: draft.required,
            default_value: draft.default_value.clone(),
            order,
            archived_at: None,
            created_at: now,
            updated_at: now,
        };
        state.fields.insert(field.id, field.clone());
        Ok(field)
    }

    async fn find_field(&self, id: FieldId) -> Result<Option<CustomField>> {
        Ok(self.state()?.fields.get(&id).cloned())
    }

    async fn list_fields(&self, query: &FieldQuery) -> Result<Vec<CustomField>> {
        let state = self.state()?;
        let mut fields: Vec<_> = state
            .fields
            .values()
            .filter(|f| query.matches(f))
            .cloned()
            .collect();
        sort_fields(&mut fields, query.ordering);
        Ok(fields)
    }

    async fn save_field(&self, field: &CustomField) -> Result<()> {
        let mut state = self.state()?;
        let retyped = state.field_mut(field.id)?.field_type != field.field_type;
        if retyped && state.responses.iter().any(|r| r.field_id == field.id) {
            return Err(FieldsError::TypeLocked { id: field.id });
        }
        let stored = state.field_mut(field.id)?;
        stored.field_type = field.field_type;
        stored.title = field.title.clone();
        stored.description = field.description.clone();
        stored.options = field.options.clone();
        stored.required = field.required;
        stored.default_value = field.default_value.clone();
        stored.updated_at = field.updated_at;
        Ok(())
    }

    async fn reorder_fields(
        &self,
        scope: &FieldScope,
        ids: &[FieldId],
    ) -> Result<Vec<CustomField>> {
        let mut state = self.state()?;
        let plan = plan_reorder(scope, &state.scope_fields(scope), ids)?;

        let now = Utc::now();
        let mut reordered = Vec::with_capacity(plan.len());
        for (id, order) in plan {
            let field = state.field_mut(id)?;
            field.order = order;
            field.updated_at = now;
            reordered.push(field.clone());
        }
        debug!(%scope, fields = reordered.len(), "memory store reordered");
        Ok(reordered)
    }

    async fn set_archived_at(
        &self,
        id: FieldId,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<CustomField> {
        let mut state = self.state()?;
        let field = state.field_mut(id)?;
        field.archived_at = archived_at;
        field.updated_at = Utc::now();
        Ok(field.clone())
    }

    async fn insert_response(&self, field_id: FieldId, value: Value) -> Result<FieldResponse> {
        let mut state = self.state()?;
        state.field_mut(field_id)?;
        Ok(state.push_response(field_id, value))
    }

    async fn list_responses(&self, field_id: FieldId) -> Result<Vec<FieldResponse>> {
        Ok(self
            .state()?
            .responses
            .iter()
            .filter(|r| r.field_id == field_id)
            .cloned()
            .collect())
    }

    async fn replace_responses(
        &self,
        answers: &[(FieldId, Vec<Value>)],
    ) -> Result<Vec<FieldResponse>> {
        let mut state = self.state()?;
        if let Some((id, _)) = answers.iter().find(|(id, _)| !state.fields.contains_key(id)) {
            return Err(FieldsError::FieldNotFound { id: *id });
        }

        state
            .responses
            .retain(|r| !answers.iter().any(|(id, _)| *id == r.field_id));

        let mut written = Vec::new();
        for (field_id, values) in answers {
            for value in values {
                written.push(state.push_response(*field_id, value.clone()));
            }
        }
        Ok(written)
    }
}
