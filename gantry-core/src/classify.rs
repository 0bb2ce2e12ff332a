//! Classify - Bucket a diffable's properties by how they may change

use std::collections::BTreeSet;

use crate::provider::{PluginRegistry, UnknownResourceType};
use crate::resource::{Block, Diffable};
use crate::schema::ResourceSchema;

/// Property names grouped by behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Every property that may be set in desired config
    pub creatable: BTreeSet<String>,
    /// Can change in place (including standalone block sets)
    pub updatable: BTreeSet<String>,
    /// A change forces replacement
    pub immutable: BTreeSet<String>,
    /// Provider-assigned, never compared
    pub output: BTreeSet<String>,
}

impl Classification {
    /// The changed properties that force the owner to be replaced
    pub fn forcing_replacement<'a, I>(&self, changed: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        changed
            .into_iter()
            .filter(|name| self.immutable.contains(*name))
            .cloned()
            .collect()
    }

    /// Classify a resource through its registered schema
    pub fn for_diffable(
        diffable: &dyn Diffable,
        registry: &PluginRegistry,
    ) -> Result<Self, UnknownResourceType> {
        registry
            .schema(diffable.diffable_type())
            .map(classify)
            .ok_or_else(|| UnknownResourceType(diffable.diffable_type().to_string()))
    }

    /// Classify a block through the schema its owning resource type declares
    pub fn for_block(
        resource_type: &str,
        block: &Block,
        registry: &PluginRegistry,
    ) -> Result<Self, UnknownResourceType> {
        registry
            .block_schema(resource_type, block.diffable_type())
            .map(classify)
            .ok_or_else(|| UnknownResourceType(format!("{}/{}", resource_type, block.diffable_type())))
    }
}

/// Classify the properties declared by a schema.
///
/// Properties without an updatable marker are immutable after create.
pub fn classify(schema: &ResourceSchema) -> Classification {
    let mut c = Classification::default();

    for (name, attr) in &schema.attributes {
        if attr.output {
            c.output.insert(name.clone());
            continue;
        }
        c.creatable.insert(name.clone());
        if attr.updatable || attr.is_standalone_set() {
            c.updatable.insert(name.clone());
        } else {
            c.immutable.insert(name.clone());
        }
    }

    c
}
