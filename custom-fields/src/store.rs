//! Persistence interface for field definitions and responses.
//!
//! A [`FieldStore`] owns the atomicity of every write that reads before it
//! writes: order assignment on insert and reorder both happen inside the
//! store's own atomic section using the helpers in [`crate::ordering`].

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::owner::OwnerRef;
use crate::types::{CustomField, FieldDraft, FieldId, FieldResponse, FieldScope};

/// Which groups a query covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupFilter {
    /// Every group, including the default one
    Any,
    /// Exactly one group; `None` is the default group
    Only(Option<String>),
}

/// Result ordering of a field query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrdering {
    /// Ascending `order`
    Order,
    /// Default group first, then groups by name, each by ascending `order`
    GroupThenOrder,
}

/// Filter over one owner's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldQuery {
    pub owner: OwnerRef,
    pub group: GroupFilter,
    pub include_archived: bool,
    pub ordering: FieldOrdering,
}

impl FieldQuery {
    /// Active fields of every group.
    pub fn for_owner(owner: OwnerRef) -> Self {
        Self {
            owner,
            group: GroupFilter::Any,
            include_archived: false,
            ordering: FieldOrdering::GroupThenOrder,
        }
    }

    /// Every field of one scope, archived included.
    pub fn for_scope(scope: &FieldScope) -> Self {
        Self::for_owner(scope.owner.clone())
            .in_group(scope.group.clone())
            .include_archived(true)
    }

    pub fn in_group(mut self, group: Option<String>) -> Self {
        self.group = GroupFilter::Only(group);
        self.ordering = FieldOrdering::Order;
        self
    }

    pub fn include_archived(mut self, include: bool) -> Self {
        self.include_archived = include;
        self
    }

    pub fn matches(&self, field: &CustomField) -> bool {
        field.owner == self.owner
            && (self.include_archived || !field.is_archived())
            && match &self.group {
                GroupFilter::Any => true,
                GroupFilter::Only(group) => &field.group == group,
            }
    }
}

/// Sort fields the way a query asks for. Ties break on id.
pub fn sort_fields(fields: &mut [CustomField], ordering: FieldOrdering) {
    fields.sort_by(|a, b| {
        let by_group = match ordering {
            FieldOrdering::Order => Ordering::Equal,
            FieldOrdering::GroupThenOrder => a.group.cmp(&b.group),
        };
        by_group
            .then(a.order.cmp(&b.order))
            .then(a.id.cmp(&b.id))
    });
}

/// Storage backend for custom fields.
#[async_trait]
pub trait FieldStore: Send + Sync {
    /// Insert a normalized draft for `owner`, assigning the next order in its
    /// scope within the same atomic section.
    async fn insert_field(&self, owner: &OwnerRef, draft: &FieldDraft) -> Result<CustomField>;

    async fn find_field(&self, id: FieldId) -> Result<Option<CustomField>>;

    async fn list_fields(&self, query: &FieldQuery) -> Result<Vec<CustomField>>;

    /// Persist a field's editable attributes. Owner, group, order and
    /// archive state are left untouched.
    ///
    /// Fails with [`FieldsError::TypeLocked`](crate::FieldsError::TypeLocked)
    /// when the type changes while responses exist; the check and the write
    /// share one atomic section.
    async fn save_field(&self, field: &CustomField) -> Result<()>;

    /// Check `ids` against the active fields in `scope` and assign
    /// `order = index + 1`, all or nothing. Archived fields in the scope
    /// follow at `N+1..` in their previous relative order.
    async fn reorder_fields(&self, scope: &FieldScope, ids: &[FieldId])
        -> Result<Vec<CustomField>>;

    async fn set_archived_at(
        &self,
        id: FieldId,
        archived_at: Option<DateTime<Utc>>,
    ) -> Result<CustomField>;

    async fn insert_response(&self, field_id: FieldId, value: Value) -> Result<FieldResponse>;

    /// Responses of one field in insertion order.
    async fn list_responses(&self, field_id: FieldId) -> Result<Vec<FieldResponse>>;

    /// Replace the responses of each listed field, all or nothing.
    async fn replace_responses(
        &self,
        answers: &[(FieldId, Vec<Value>)],
    ) -> Result<Vec<FieldResponse>>;

    async fn count_responses(&self, field_id: FieldId) -> Result<usize> {
        Ok(self.list_responses(field_id).await?.len())
    }
}
