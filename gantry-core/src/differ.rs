//! Differ - Compare previous state with desired config to find Changes
//!
//! Resources are paired by their plugin's primary key. Paired resources are
//! compared property by property using the schema: output properties are
//! never compared, block sets are paired by each member's own key, and a
//! changed immutable property marks the change as a replacement. Nested
//! members keep their own updatability: changing an immutable property of a
//! paired member replaces the owning resource too.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::classify::{Classification, classify};
use crate::provider::{PluginRegistry, UnknownResourceType};
use crate::resource::{Block, Diffable, Resource, ResourceId, Value};
use crate::schema::{AttributeType, ResourceSchema};
use crate::tags::TagDelta;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// Minimal member delta of a standalone block set
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDelta {
    pub attribute: String,
    pub added: Vec<Block>,
    pub removed: Vec<Block>,
}

/// One resource-level change
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub id: ResourceId,
    pub kind: ChangeKind,
    /// Top-level properties that differ; empty for Create and Delete
    pub changed: BTreeSet<String>,
    /// The resource must be deleted and created again
    pub replace: bool,
    /// Changed immutable properties behind `replace`
    pub forcing: BTreeSet<String>,
    /// Previous state (Update, Delete)
    pub from: Option<Resource>,
    /// Desired config (Create, Update)
    pub to: Option<Resource>,
    pub block_deltas: Vec<BlockDelta>,
}

impl Change {
    pub fn create(to: Resource) -> Self {
        Self {
            id: to.id.clone(),
            kind: ChangeKind::Create,
            changed: BTreeSet::new(),
            replace: false,
            forcing: BTreeSet::new(),
            from: None,
            to: Some(to),
            block_deltas: Vec::new(),
        }
    }

    pub fn delete(from: Resource) -> Self {
        Self {
            id: from.id.clone(),
            kind: ChangeKind::Delete,
            changed: BTreeSet::new(),
            replace: false,
            forcing: BTreeSet::new(),
            from: Some(from),
            to: None,
            block_deltas: Vec::new(),
        }
    }

    pub fn update(from: Resource, to: Resource, changed: BTreeSet<String>) -> Self {
        Self {
            id: to.id.clone(),
            kind: ChangeKind::Update,
            changed,
            replace: false,
            forcing: BTreeSet::new(),
            from: Some(from),
            to: Some(to),
            block_deltas: Vec::new(),
        }
    }

    pub fn is_replacement(&self) -> bool {
        self.kind == ChangeKind::Update && self.replace
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("two resources share the primary key '{0}'")]
    DuplicateKey(String),

    #[error(transparent)]
    UnknownResourceType(#[from] UnknownResourceType),
}

/// Compute the changes turning `previous` into `desired`, sorted by resource id
pub fn diff(
    previous: &[Resource],
    desired: &[Resource],
    registry: &PluginRegistry,
) -> Result<Vec<Change>, DiffError> {
    let previous = index(previous, registry)?;
    let desired = index(desired, registry)?;
    let mut changes = Vec::new();

    for (key, to) in &desired {
        match previous.get(key) {
            None => changes.push(Change::create((*to).clone())),
            Some(from) => {
                if let Some(change) = diff_resource(from, to, registry)? {
                    changes.push(change);
                }
            }
        }
    }

    for (key, from) in &previous {
        if desired.contains_key(key) {
            continue;
        }
        let schema = schema_for(*from, registry)?;
        if is_computed_only(from, schema) {
            continue;
        }
        changes.push(Change::delete((*from).clone()));
    }

    changes.sort_by(|a, b| a.id.cmp(&b.id).then(a.kind.cmp(&b.kind)));
    Ok(changes)
}

/// Compare one matched pair. `None` when nothing but tags differs.
pub fn diff_resource(
    from: &Resource,
    to: &Resource,
    registry: &PluginRegistry,
) -> Result<Option<Change>, DiffError> {
    let schema = schema_for(to, registry)?;
    let changed = changed_properties(schema, &from.attributes, &to.attributes);
    if changed.is_empty() {
        return Ok(None);
    }

    let plugin = registry.plugin(&to.id.resource_type)?;
    let mut forcing = Classification::for_diffable(to, registry)?.forcing_replacement(&changed);
    for name in &changed {
        if let Some(attr) = schema.get(name)
            && !attr.is_standalone_set()
            && let (Some(a), Some(b)) = (from.attributes.get(name), to.attributes.get(name))
            && nested_forces_replacement(&attr.attr_type, a, b)
        {
            forcing.insert(name.clone());
        }
    }
    forcing.retain(|p| !plugin.tolerates_immutable_change(p));

    let block_deltas = schema
        .standalone_sets()
        .into_iter()
        .filter(|a| changed.contains(&a.name))
        .filter_map(|a| {
            let nested = a.attr_type.block_schema()?;
            let delta = block_delta(
                &a.name,
                nested,
                set_members(from.attributes.get(&a.name)),
                set_members(to.attributes.get(&a.name)),
            );
            Some(delta)
        })
        .collect();

    let mut change = Change::update(from.clone(), to.clone(), changed);
    change.replace = !forcing.is_empty();
    change.forcing = forcing;
    change.block_deltas = block_deltas;
    Ok(Some(change))
}

/// Paired resources whose tag maps differ but which have no other change.
/// Keys under `reserved_prefixes` are ignored.
pub fn tag_drift<'a>(
    previous: &[Resource],
    desired: &'a [Resource],
    changes: &[Change],
    reserved_prefixes: &[String],
) -> Vec<&'a Resource> {
    let changed: BTreeSet<_> = changes.iter().map(|c| &c.id).collect();
    let previous: HashMap<_, _> = previous.iter().map(|r| (&r.id, r)).collect();

    let mut drifted: Vec<_> = desired
        .iter()
        .filter(|r| !r.read_only && !changed.contains(&r.id))
        .filter(|r| {
            previous
                .get(&r.id)
                .is_some_and(|p| !TagDelta::compute(&r.tags, &p.tags, reserved_prefixes).is_empty())
        })
        .collect();
    drifted.sort_by(|a, b| a.id.cmp(&b.id));
    drifted
}

fn index<'a>(
    resources: &'a [Resource],
    registry: &PluginRegistry,
) -> Result<BTreeMap<String, &'a Resource>, DiffError> {
    let mut indexed = BTreeMap::new();
    for resource in resources.iter().filter(|r| !r.is_data_source()) {
        let key = registry.plugin(&resource.id.resource_type)?.primary_key(resource);
        if indexed.insert(key.clone(), resource).is_some() {
            return Err(DiffError::DuplicateKey(key));
        }
    }
    Ok(indexed)
}

fn schema_for<'r>(diffable: &dyn Diffable, registry: &'r PluginRegistry) -> Result<&'r ResourceSchema, DiffError> {
    registry
        .schema(diffable.diffable_type())
        .ok_or_else(|| UnknownResourceType(diffable.diffable_type().to_string()).into())
}

/// Known only through refresh: every property it has is an output
fn is_computed_only(resource: &Resource, schema: &ResourceSchema) -> bool {
    !resource.attributes.is_empty() && resource.attributes.keys().all(|k| schema.is_output(k))
}

/// Top-level property names whose values differ.
///
/// A property absent from `to` is compared against its schema default; with
/// no default it is not managed and never reported.
fn changed_properties(
    schema: &ResourceSchema,
    from: &HashMap<String, Value>,
    to: &HashMap<String, Value>,
) -> BTreeSet<String> {
    let names: BTreeSet<&String> = from.keys().chain(to.keys()).collect();
    let mut changed = BTreeSet::new();

    for name in names {
        // Skip internal attributes (starting with _)
        if name.starts_with('_') || schema.is_output(name) {
            continue;
        }
        let attr = schema.get(name);
        let default = attr.and_then(|a| a.default.as_ref());

        let Some(desired) = to.get(name).or(default) else {
            continue;
        };
        let differs = match from.get(name).or(default) {
            None => true,
            Some(current) => match attr {
                Some(a) => values_differ(&a.attr_type, current, desired),
                None => current != desired,
            },
        };
        if differs {
            changed.insert(name.clone());
        }
    }

    changed
}

fn values_differ(attr_type: &AttributeType, from: &Value, to: &Value) -> bool {
    match (attr_type, from, to) {
        (AttributeType::Block(schema), Value::Block(a), Value::Block(b)) => {
            blocks_differ(schema, a, b)
        }
        (AttributeType::BlockList(schema), Value::BlockList(a), Value::BlockList(b)) => {
            a.len() != b.len()
                || a.iter()
                    .zip(b)
                    .any(|(x, y)| blocks_differ(schema, x, y))
        }
        (AttributeType::BlockSet(schema), Value::BlockSet(a), Value::BlockSet(b)) => {
            let a = keyed(schema, a);
            let b = keyed(schema, b);
            a.len() != b.len()
                || a.iter().any(|(key, x)| match b.get(key) {
                    Some(y) => blocks_differ(schema, x, y),
                    None => true,
                })
        }
        _ => from != to,
    }
}

fn blocks_differ(schema: &ResourceSchema, from: &Block, to: &Block) -> bool {
    !changed_properties(schema, &from.attributes, &to.attributes).is_empty()
}

/// Whether a paired nested member changed a property its schema does not
/// let change in place. Added and removed members never force.
fn nested_forces_replacement(attr_type: &AttributeType, from: &Value, to: &Value) -> bool {
    match (attr_type, from, to) {
        (AttributeType::Block(schema), Value::Block(a), Value::Block(b)) => {
            member_forces_replacement(schema, a, b)
        }
        (AttributeType::BlockList(schema), Value::BlockList(a), Value::BlockList(b)) => a
            .iter()
            .zip(b)
            .any(|(x, y)| member_forces_replacement(schema, x, y)),
        (AttributeType::BlockSet(schema), Value::BlockSet(a), Value::BlockSet(b)) => {
            let b = keyed(schema, b);
            keyed(schema, a)
                .iter()
                .any(|(key, x)| b.get(key).is_some_and(|y| member_forces_replacement(schema, x, y)))
        }
        _ => false,
    }
}

fn member_forces_replacement(schema: &ResourceSchema, from: &Block, to: &Block) -> bool {
    let changed = changed_properties(schema, &from.attributes, &to.attributes);
    if !classify(schema).forcing_replacement(&changed).is_empty() {
        return true;
    }
    changed.iter().any(|name| {
        match (schema.get(name), from.attributes.get(name), to.attributes.get(name)) {
            (Some(attr), Some(a), Some(b)) => nested_forces_replacement(&attr.attr_type, a, b),
            _ => false,
        }
    })
}

fn keyed<'a>(schema: &ResourceSchema, blocks: &'a [Block]) -> BTreeMap<String, &'a Block> {
    blocks.iter().map(|b| (b.primary_key(schema), b)).collect()
}

fn set_members(value: Option<&Value>) -> &[Block] {
    match value {
        Some(Value::BlockSet(blocks)) => blocks,
        _ => &[],
    }
}

/// Members to add and remove; a changed member appears in both lists
fn block_delta(
    attribute: &str,
    schema: &ResourceSchema,
    from: &[Block],
    to: &[Block],
) -> BlockDelta {
    let from = keyed(schema, from);
    let to = keyed(schema, to);

    let removed = from
        .iter()
        .filter(|(key, old)| to.get(*key).is_none_or(|new| blocks_differ(schema, old, new)))
        .map(|(_, b)| (*b).clone())
        .collect();
    let added = to
        .iter()
        .filter(|(key, new)| from.get(*key).is_none_or(|old| blocks_differ(schema, old, new)))
        .map(|(_, b)| (*b).clone())
        .collect();

    BlockDelta {
        attribute: attribute.to_string(),
        added,
        removed,
    }
}
