//! Resource - Diffable entities, their values and lifecycle

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::ResourceSchema;

/// Unique identifier for a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource type (e.g., "ec2.vpc", "ec2.subnet")
    pub resource_type: String,
    /// Resource name (stable key declared in config)
    pub name: String,
}

impl ResourceId {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.name)
    }
}

/// Typed handle to another resource.
///
/// Without an attribute the handle resolves to the target's provider
/// identifier; with one it resolves to that attribute's value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub target: ResourceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl ResourceRef {
    pub fn to(target: ResourceId) -> Self {
        Self {
            target,
            attribute: None,
        }
    }

    pub fn attribute(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: Some(attribute.into()),
        }
    }
}

/// Attribute value of a diffable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    /// Reference to another resource, resolved at execution time
    Ref(ResourceRef),
    /// Single nested diffable
    Block(Box<Block>),
    /// Ordered list of nested diffables
    BlockList(Vec<Block>),
    /// Set of nested diffables, matched by each member's primary key
    BlockSet(Vec<Block>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Collect every resource reference contained in this value
    pub fn collect_refs<'a>(&'a self, out: &mut Vec<&'a ResourceRef>) {
        match self {
            Value::Ref(r) => out.push(r),
            Value::List(items) => items.iter().for_each(|v| v.collect_refs(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_refs(out)),
            Value::Block(block) => block.collect_refs(out),
            Value::BlockList(blocks) | Value::BlockSet(blocks) => {
                blocks.iter().for_each(|b| b.collect_refs(out))
            }
            Value::String(_) | Value::Int(_) | Value::Bool(_) => {}
        }
    }
}

/// Canonical rendering: map keys and block attributes are sorted so the
/// output is stable and usable as a key.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Int(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => write_sorted(f, map),
            Value::Ref(r) => match &r.attribute {
                Some(attr) => write!(f, "{}.{}", r.target, attr),
                None => write!(f, "{}", r.target),
            },
            Value::Block(block) => write_sorted(f, &block.attributes),
            Value::BlockList(blocks) | Value::BlockSet(blocks) => {
                write!(f, "[")?;
                for (i, block) in blocks.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_sorted(f, &block.attributes)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn write_sorted(f: &mut fmt::Formatter<'_>, map: &HashMap<String, Value>) -> fmt::Result {
    let mut keys: Vec<_> = map.keys().collect();
    keys.sort();
    write!(f, "{{")?;
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{} = {}", key, map[key])?;
    }
    write!(f, "}}")
}

/// Nested diffable (subresource) owned by a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_type: String,
    pub attributes: HashMap<String, Value>,
}

impl Block {
    pub fn new(block_type: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a ResourceRef>) {
        self.attributes.values().for_each(|v| v.collect_refs(out));
    }
}

/// Lifecycle of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Pending,
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Pending => "pending",
            Lifecycle::Created => "created",
            Lifecycle::Updated => "updated",
            Lifecycle::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("{id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        id: ResourceId,
        from: Lifecycle,
        to: Lifecycle,
    },

    #[error("{id}: provider identifier is already assigned ({existing}), refusing {requested}")]
    IdentifierReassigned {
        id: ResourceId,
        existing: String,
        requested: String,
    },
}

/// Root diffable with its own provider-side identity
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    /// Provider identifier (e.g., vpc-xxx), assigned once after creation
    pub identifier: Option<String>,
    pub attributes: HashMap<String, Value>,
    pub tags: HashMap<String, String>,
    pub lifecycle: Lifecycle,
    /// If true, this is a data source (read-only) that won't be modified
    pub read_only: bool,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(resource_type, name),
            identifier: None,
            attributes: HashMap::new(),
            tags: HashMap::new(),
            lifecycle: Lifecycle::Pending,
            read_only: false,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Mark as an existing provider object (e.g., loaded from state)
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self.lifecycle = Lifecycle::Created;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Returns true if this resource is a data source (read-only)
    pub fn is_data_source(&self) -> bool {
        self.read_only
    }

    /// Record the identifier returned by the provider. Once set it never changes.
    pub fn assign_identifier(&mut self, identifier: impl Into<String>) -> Result<(), LifecycleError> {
        let identifier = identifier.into();
        match &self.identifier {
            Some(existing) if *existing != identifier => Err(LifecycleError::IdentifierReassigned {
                id: self.id.clone(),
                existing: existing.clone(),
                requested: identifier,
            }),
            _ => {
                self.identifier = Some(identifier);
                Ok(())
            }
        }
    }

    /// Move to the next lifecycle state
    pub fn transition(&mut self, to: Lifecycle) -> Result<(), LifecycleError> {
        use Lifecycle::*;
        let allowed = matches!(
            (self.lifecycle, to),
            (Pending, Created) | (Created, Updated) | (Updated, Updated) | (Created | Updated, Deleted)
        );
        if !allowed {
            return Err(LifecycleError::InvalidTransition {
                id: self.id.clone(),
                from: self.lifecycle,
                to,
            });
        }
        self.lifecycle = to;
        Ok(())
    }

    /// All references to other resources held by this resource
    pub fn references(&self) -> Vec<&ResourceRef> {
        let mut refs = Vec::new();
        for value in self.attributes.values() {
            value.collect_refs(&mut refs);
        }
        refs
    }
}

/// Any declared entity with named properties taking part in diffing
pub trait Diffable {
    fn diffable_type(&self) -> &str;

    fn attributes(&self) -> &HashMap<String, Value>;

    /// Key used to pair this diffable across the previous and desired graphs
    fn primary_key(&self, schema: &ResourceSchema) -> String;
}

impl Diffable for Resource {
    fn diffable_type(&self) -> &str {
        &self.id.resource_type
    }

    fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    fn primary_key(&self, _schema: &ResourceSchema) -> String {
        self.id.to_string()
    }
}

impl Diffable for Block {
    fn diffable_type(&self) -> &str {
        &self.block_type
    }

    fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Declared key attributes joined with '/', or every non-output
    /// attribute when the schema declares none.
    fn primary_key(&self, schema: &ResourceSchema) -> String {
        if !schema.key_attributes.is_empty() {
            return schema
                .key_attributes
                .iter()
                .map(|k| self.attributes.get(k).map(|v| v.to_string()).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("/");
        }

        let mut keys: Vec<_> = self
            .attributes
            .keys()
            .filter(|k| !schema.is_output(k))
            .collect();
        keys.sort();
        keys.into_iter()
            .map(|k| format!("{}={}", k, self.attributes[k.as_str()]))
            .collect::<Vec<_>>()
            .join(",")
    }
}
