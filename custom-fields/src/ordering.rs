//! Field ordering within an (owner, group) scope.
//!
//! Stores call [`next_order`] and [`plan_reorder`] inside their own atomic
//! section; [`ScopeLocks`] additionally serializes writers to one scope
//! within a process.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{FieldsError, Result};
use crate::types::{CustomField, FieldId, FieldScope};

/// Order value for a new field: one past the highest in scope, 1 when empty.
pub fn next_order<'a>(scope_fields: impl IntoIterator<Item = &'a CustomField>) -> u32 {
    scope_fields
        .into_iter()
        .map(|f| f.order)
        .max()
        .unwrap_or(0)
        + 1
}

/// Validate a reorder request against the fields currently in scope and
/// return the `(id, order)` assignments to write.
///
/// `ids` must be exactly a permutation of the scope's active field ids; the
/// count check runs first. Submitted ids get `1..=N`; archived fields follow
/// at `N+1..` in their current relative order, so every field in scope keeps
/// a distinct order.
pub fn plan_reorder(
    scope: &FieldScope,
    scope_fields: &[CustomField],
    ids: &[FieldId],
) -> Result<Vec<(FieldId, u32)>> {
    let (archived, active): (Vec<&CustomField>, Vec<&CustomField>) =
        scope_fields.iter().partition(|f| f.is_archived());

    if ids.len() != active.len() {
        return Err(FieldsError::WrongNumberOfFieldsForOrdering {
            expected: active.len(),
            actual: ids.len(),
        });
    }

    let known: HashSet<FieldId> = active.iter().map(|f| f.id).collect();
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !known.contains(id) {
            return Err(FieldsError::FieldDoesNotBelongToModel {
                field_id: *id,
                owner: scope.owner.clone(),
            });
        }
        if !seen.insert(*id) {
            return Err(FieldsError::DuplicateFieldInOrdering { field_id: *id });
        }
    }

    let mut archived = archived;
    archived.sort_by_key(|f| (f.order, f.id));

    let plan: Vec<_> = ids
        .iter()
        .copied()
        .chain(archived.iter().map(|f| f.id))
        .enumerate()
        .map(|(index, id)| (id, index as u32 + 1))
        .collect();
    debug!(
        %scope,
        fields = ids.len(),
        archived = archived.len(),
        "reorder planned"
    );
    Ok(plan)
}

/// Per-scope async locks for read-modify-write sequences.
///
/// An entry lives only while some task holds or waits for its lock.
#[derive(Debug, Clone, Default)]
pub struct ScopeLocks {
    locks: Arc<DashMap<FieldScope, Arc<Mutex<()>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `scope`.
    pub async fn acquire(&self, scope: &FieldScope) -> ScopeGuard {
        let lock = self
            .locks
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ScopeGuard {
            guard: Some(lock.lock_owned().await),
            scope: scope.clone(),
            locks: self.locks.clone(),
        }
    }

    /// Number of scopes currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one scope. Dropping it releases the lock and forgets
/// the scope when nobody else is waiting.
#[derive(Debug)]
pub struct ScopeGuard {
    guard: Option<OwnedMutexGuard<()>>,
    scope: FieldScope,
    locks: Arc<DashMap<FieldScope, Arc<Mutex<()>>>>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map holds the last reference once no task holds a clone.
        self.locks
            .remove_if(&self.scope, |_, lock| Arc::strong_count(lock) == 1);
    }
}
