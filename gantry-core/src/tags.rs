//! Tags - Reconcile a resource's desired tag map against its live tags
//!
//! Live tags are fetched right before every comparison. Keys under a
//! provider-reserved prefix are left out of both sides and never touched.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use log::debug;

use crate::config::ReconcileConfig;
use crate::context::Context;
use crate::provider::{Operation, ProviderError, ProviderResult};
use crate::resource::{Resource, ResourceId};

pub type Tags = HashMap<String, String>;

/// Three-way difference between desired and live tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDelta {
    /// Desired keys missing on the provider
    pub to_add: BTreeMap<String, String>,
    /// Live keys no longer desired, with their live values
    pub to_remove: BTreeMap<String, String>,
    /// Keys on both sides with differing values: (old, new)
    pub to_change: BTreeMap<String, (String, String)>,
}

impl TagDelta {
    pub fn compute(desired: &Tags, live: &Tags, reserved_prefixes: &[String]) -> Self {
        let reserved = |k: &str| reserved_prefixes.iter().any(|p| k.starts_with(p.as_str()));
        let mut delta = Self::default();

        for (k, v) in desired.iter().filter(|(k, _)| !reserved(k.as_str())) {
            match live.get(k) {
                None => {
                    delta.to_add.insert(k.clone(), v.clone());
                }
                Some(old) if old != v => {
                    delta.to_change.insert(k.clone(), (old.clone(), v.clone()));
                }
                Some(_) => {}
            }
        }

        for (k, v) in live.iter().filter(|(k, _)| !reserved(k.as_str())) {
            if !desired.contains_key(k) {
                delta.to_remove.insert(k.clone(), v.clone());
            }
        }

        delta
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_change.is_empty()
    }

    /// Batched calls needed to apply this delta: remove, add, update, each
    /// only when it has entries
    pub fn ops(&self) -> Vec<TagOp> {
        let mut ops = Vec::new();
        if !self.to_remove.is_empty() {
            ops.push(TagOp::Remove(self.to_remove.clone()));
        }
        if !self.to_add.is_empty() {
            ops.push(TagOp::Add(self.to_add.clone()));
        }
        if !self.to_change.is_empty() {
            ops.push(TagOp::Update(
                self.to_change
                    .iter()
                    .map(|(k, (_, new))| (k.clone(), new.clone()))
                    .collect(),
            ));
        }
        ops
    }

    /// The live tags as they would be after every op has been applied
    pub fn apply_to(&self, live: &Tags) -> Tags {
        let mut tags = live.clone();
        for op in self.ops() {
            op.apply(&mut tags);
        }
        tags
    }
}

/// One batched tag call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOp {
    Remove(BTreeMap<String, String>),
    Add(BTreeMap<String, String>),
    Update(BTreeMap<String, String>),
}

impl TagOp {
    pub fn tags(&self) -> &BTreeMap<String, String> {
        match self {
            TagOp::Remove(t) | TagOp::Add(t) | TagOp::Update(t) => t,
        }
    }

    fn apply(&self, tags: &mut Tags) {
        match self {
            TagOp::Remove(removed) => {
                for k in removed.keys() {
                    tags.remove(k);
                }
            }
            TagOp::Add(set) | TagOp::Update(set) => {
                tags.extend(set.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
    }
}

impl fmt::Display for TagOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            TagOp::Remove(_) => "remove",
            TagOp::Add(_) => "add",
            TagOp::Update(_) => "update",
        };
        let keys: Vec<_> = self.tags().keys().map(String::as_str).collect();
        write!(f, "{} tags [{}]", verb, keys.join(", "))
    }
}

/// Provider tag calls for a taggable resource type
#[async_trait]
pub trait TagApi: Send + Sync {
    /// Current tags on the live object, read fresh
    async fn fetch_tags(&self, ctx: &Context, identifier: &str) -> ProviderResult<Tags>;

    async fn apply_tag_op(&self, ctx: &Context, identifier: &str, op: &TagOp) -> ProviderResult<()>;
}

/// Fetch live tags and return the ops that bring them to `desired`
pub async fn reconcile_tags<F, Fut>(
    resource_id: &ResourceId,
    desired: &Tags,
    reserved_prefixes: &[String],
    live_fetch: F,
) -> ProviderResult<Vec<TagOp>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ProviderResult<Tags>>,
{
    let live = live_fetch().await.map_err(|e| {
        e.for_resource(resource_id.clone())
            .in_operation(Operation::Tag)
    })?;
    Ok(TagDelta::compute(desired, &live, reserved_prefixes).ops())
}

/// Runs tag reconciliation after creates and updates
#[derive(Debug, Clone)]
pub struct TagReconciler {
    reserved_prefixes: Vec<String>,
}

impl TagReconciler {
    pub fn new(reserved_prefixes: Vec<String>) -> Self {
        Self { reserved_prefixes }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.reserved_tag_prefixes.clone())
    }

    /// Bring the live tags of `resource` in line with its desired tags.
    /// Returns the ops that were applied.
    pub async fn reconcile(
        &self,
        ctx: &Context,
        resource: &Resource,
        api: &dyn TagApi,
    ) -> ProviderResult<Vec<TagOp>> {
        let Some(identifier) = resource.identifier.as_deref() else {
            return Err(ProviderError::new("cannot tag a resource without an identifier")
                .for_resource(resource.id.clone())
                .in_operation(Operation::Tag));
        };

        let ops = reconcile_tags(&resource.id, &resource.tags, &self.reserved_prefixes, || {
            api.fetch_tags(ctx, identifier)
        })
        .await?;

        for op in &ops {
            debug!("{}: {}", resource.id, op);
            api.apply_tag_op(ctx, identifier, op).await.map_err(|e| {
                e.for_resource(resource.id.clone())
                    .in_operation(Operation::Tag)
            })?;
        }

        Ok(ops)
    }
}

impl Default for TagReconciler {
    fn default() -> Self {
        Self::from_config(&ReconcileConfig::default())
    }
}
