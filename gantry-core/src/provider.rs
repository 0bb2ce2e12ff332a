//! Provider - Contracts implemented by resource type plugins
//!
//! Each concrete resource type (VPC, subnet, instance, ...) plugs into the
//! core through [`ResourcePlugin`]. The core never inspects provider request
//! or response shapes; it only calls these operations.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::finder::Finder;
use crate::resource::{Block, Resource, ResourceId};
use crate::schema::ResourceSchema;
use crate::tags::TagApi;

/// Opaque provider document as returned by a live read
pub type ProviderObject = serde_json::Value;

/// Operation a provider error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Refresh,
    Tag,
    AddBlock,
    RemoveBlock,
    Find,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Refresh => "refresh",
            Operation::Tag => "tag",
            Operation::AddBlock => "add block",
            Operation::RemoveBlock => "remove block",
            Operation::Find => "find",
        };
        f.write_str(s)
    }
}

/// Whether retrying could help
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// Eventual-consistency races and throttling
    Transient,
    #[default]
    Fatal,
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub operation: Option<Operation>,
    pub kind: ErrorKind,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}] ", id)?;
        }
        if let Some(op) = self.operation {
            write!(f, "{} failed: ", op)?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            operation: None,
            kind: ErrorKind::Fatal,
            cause: None,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            ..Self::new(message)
        }
    }

    /// Attach the resource, keeping one that is already set
    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id.get_or_insert(id);
        self
    }

    /// Attach the operation, keeping one that is already set
    pub fn in_operation(mut self, operation: Operation) -> Self {
        self.operation.get_or_insert(operation);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Operations a resource type supplies to the reconciliation core.
///
/// Plugins are expected to swallow expected not-found races right after a
/// create (return `Ok(false)` from `refresh`) instead of failing.
#[async_trait]
pub trait ResourcePlugin: Send + Sync {
    /// Resource type name (e.g., "ec2.vpc")
    fn resource_type(&self) -> &str;

    /// Property metadata for this type and its nested blocks
    fn schema(&self) -> ResourceSchema;

    /// Stable key used to match previous and desired resources
    fn primary_key(&self, resource: &Resource) -> String {
        resource.id.to_string()
    }

    /// Populate identifier and attributes from a live provider read
    fn copy_from(&self, resource: &mut Resource, object: &ProviderObject) -> ProviderResult<()>;

    /// Create the resource and return its provider identifier
    async fn create(&self, ctx: &Context, resource: &Resource) -> ProviderResult<String>;

    /// Apply in-place changes to the listed properties
    async fn update(
        &self,
        ctx: &Context,
        from: &Resource,
        to: &Resource,
        changed: &BTreeSet<String>,
    ) -> ProviderResult<()>;

    async fn delete(&self, ctx: &Context, resource: &Resource) -> ProviderResult<()>;

    /// Re-read the live object into `resource`; false means it no longer exists
    async fn refresh(&self, ctx: &Context, resource: &mut Resource) -> ProviderResult<bool>;

    /// Add one member of a standalone block set
    async fn add_block(
        &self,
        _ctx: &Context,
        resource: &Resource,
        attribute: &str,
        _block: &Block,
    ) -> ProviderResult<()> {
        Err(ProviderError::new(format!(
            "{} does not support separate calls for '{}'",
            resource.id.resource_type, attribute
        )))
    }

    /// Remove one member of a standalone block set
    async fn remove_block(
        &self,
        _ctx: &Context,
        resource: &Resource,
        attribute: &str,
        _block: &Block,
    ) -> ProviderResult<()> {
        Err(ProviderError::new(format!(
            "{} does not support separate calls for '{}'",
            resource.id.resource_type, attribute
        )))
    }

    /// Tag API for taggable resource types
    fn tagging(&self) -> Option<&dyn TagApi> {
        None
    }

    /// Whether a change to this immutable property can be handled by
    /// `update` (typically by skipping it) instead of replacing the resource
    fn tolerates_immutable_change(&self, _property: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource type '{0}'")]
pub struct UnknownResourceType(pub String);

/// Registered plugins, their schemas and finders, keyed by resource type
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn ResourcePlugin>>,
    schemas: HashMap<String, ResourceSchema>,
    /// Nested block schemas by (owning resource type, block type)
    block_schemas: HashMap<(String, String), ResourceSchema>,
    finders: HashMap<String, Arc<dyn Finder>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin together with every nested block schema it declares
    pub fn register(&mut self, plugin: Arc<dyn ResourcePlugin>) {
        let schema = plugin.schema();
        let owner = plugin.resource_type().to_string();
        self.block_schemas.retain(|(o, _), _| *o != owner);
        for nested in schema.nested_schemas() {
            self.block_schemas
                .entry((owner.clone(), nested.resource_type.clone()))
                .or_insert_with(|| nested.clone());
        }
        self.schemas.insert(plugin.resource_type().to_string(), schema);
        self.plugins
            .insert(plugin.resource_type().to_string(), plugin);
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn ResourcePlugin>) -> Self {
        self.register(plugin);
        self
    }

    pub fn register_finder(&mut self, finder: Arc<dyn Finder>) {
        self.finders
            .insert(finder.resource_type().to_string(), finder);
    }

    pub fn plugin(&self, resource_type: &str) -> Result<&Arc<dyn ResourcePlugin>, UnknownResourceType> {
        self.plugins
            .get(resource_type)
            .ok_or_else(|| UnknownResourceType(resource_type.to_string()))
    }

    pub fn schema(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    /// Schema of a block type as declared by its owning resource type
    pub fn block_schema(&self, resource_type: &str, block_type: &str) -> Option<&ResourceSchema> {
        self.block_schemas
            .get(&(resource_type.to_string(), block_type.to_string()))
    }

    pub fn finder(&self, resource_type: &str) -> Result<&Arc<dyn Finder>, UnknownResourceType> {
        self.finders
            .get(resource_type)
            .ok_or_else(|| UnknownResourceType(resource_type.to_string()))
    }

    /// Registered resource types, sorted
    pub fn resource_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.plugins.keys().map(String::as_str).collect();
        types.sort();
        types
    }
}
