//! Owner references and the owner-kind registry.
//!
//! A field belongs to exactly one owner, identified by an explicit
//! `(kind, id)` pair. Hosts register one [`OwnerLoader`] per kind so the
//! context can confirm an owner exists before attaching fields to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{FieldsError, Result};

/// Discriminated reference to the entity a field is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub id: String,
}

impl OwnerRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Implemented by host entity types that carry custom fields.
///
/// ```rust,ignore
/// struct Survey { id: u64 }
///
/// impl HasCustomFields for Survey {
///     const OWNER_KIND: &'static str = "survey";
///     fn owner_id(&self) -> String { self.id.to_string() }
/// }
///
/// let fields = ctx.for_model(&survey).custom_fields(None, false).await?;
/// ```
pub trait HasCustomFields {
    /// Discriminator stored alongside every field of this entity type.
    const OWNER_KIND: &'static str;

    fn owner_id(&self) -> String;

    fn owner_ref(&self) -> OwnerRef {
        OwnerRef::new(Self::OWNER_KIND, self.owner_id())
    }
}

/// Materializes owners of one kind.
#[async_trait]
pub trait OwnerLoader: Send + Sync {
    /// Load a snapshot of the owner, or `None` when it does not exist.
    async fn load(&self, id: &str) -> Result<Option<Value>>;
}

#[async_trait]
impl<F> OwnerLoader for F
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    async fn load(&self, id: &str) -> Result<Option<Value>> {
        Ok(self(id))
    }
}

/// Lookup table from owner kind to its loader.
#[derive(Clone, Default)]
pub struct OwnerRegistry {
    loaders: HashMap<String, Arc<dyn OwnerLoader>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the loader for `kind`, replacing any previous one.
    pub fn register(mut self, kind: impl Into<String>, loader: impl OwnerLoader + 'static) -> Self {
        self.loaders.insert(kind.into(), Arc::new(loader));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.loaders.contains_key(kind)
    }

    /// Materialize the owner through its kind's loader.
    pub async fn load(&self, owner: &OwnerRef) -> Result<Value> {
        let loader = self
            .loaders
            .get(&owner.kind)
            .ok_or_else(|| FieldsError::UnknownOwnerKind {
                kind: owner.kind.clone(),
            })?;
        loader
            .load(&owner.id)
            .await?
            .ok_or_else(|| FieldsError::OwnerNotFound {
                owner: owner.clone(),
            })
    }

    /// Confirm the owner exists. An empty registry accepts every owner.
    pub async fn verify(&self, owner: &OwnerRef) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        self.load(owner).await?;
        debug!(%owner, "owner verified");
        Ok(())
    }
}

impl fmt::Debug for OwnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.loaders.keys().collect();
        kinds.sort();
        f.debug_struct("OwnerRegistry").field("kinds", &kinds).finish()
    }
}
