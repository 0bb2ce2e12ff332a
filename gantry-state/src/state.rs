//! State file structures for persisting infrastructure state

use std::collections::{BTreeMap, HashMap};

use gantry_core::resource::{Lifecycle, Resource, ResourceId, Value};
use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, BackendResult};

/// The main state file structure that persists to the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file format version
    pub version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of Gantry that last modified this state
    pub gantry_version: String,
    pub resources: Vec<ResourceState>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_lineage(lineage: String) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage,
            gantry_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    /// Bump the serial ahead of a write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.gantry_version = env!("CARGO_PKG_VERSION").to_string();
    }

    pub fn find_resource(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources.iter().find(|r| r.matches(id))
    }

    /// Add or replace a resource, keeping its protection flag
    pub fn upsert_resource(&mut self, mut resource: ResourceState) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.resource_type == resource.resource_type && r.name == resource.name)
        {
            Some(existing) => {
                resource.protected |= existing.protected;
                *existing = resource;
            }
            None => self.resources.push(resource),
        }
    }

    pub fn remove_resource(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let pos = self.resources.iter().position(|r| r.matches(id))?;
        Some(self.resources.remove(pos))
    }

    /// Every recorded resource in core form, for diffing and refresh
    pub fn to_resources(&self) -> BackendResult<Vec<Resource>> {
        self.resources.iter().map(ResourceState::to_resource).collect()
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single managed resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource type (e.g., "ec2.vpc")
    pub resource_type: String,
    pub name: String,
    /// Provider name (e.g., "aws"), taken from the type prefix when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Provider identifier
    pub identifier: Option<String>,
    /// Attributes in declared form; references are kept unresolved
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Whether this resource is protected from deletion (e.g., the state bucket)
    #[serde(default)]
    pub protected: bool,
}

impl ResourceState {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            provider: None,
            identifier: None,
            attributes: BTreeMap::new(),
            tags: BTreeMap::new(),
            protected: false,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_protected(mut self, protected: bool) -> Self {
        self.protected = protected;
        self
    }

    pub fn matches(&self, id: &ResourceId) -> bool {
        self.resource_type == id.resource_type && self.name == id.name
    }

    pub fn from_resource(resource: &Resource) -> BackendResult<Self> {
        let attributes = resource
            .attributes
            .iter()
            .map(|(k, v)| {
                serde_json::to_value(v)
                    .map(|json| (k.clone(), json))
                    .map_err(|e| BackendError::Serialization(format!("{}.{}: {}", resource.id, k, e)))
            })
            .collect::<BackendResult<_>>()?;

        Ok(Self {
            resource_type: resource.id.resource_type.clone(),
            name: resource.id.name.clone(),
            provider: None,
            identifier: resource.identifier.clone(),
            attributes,
            tags: resource.tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            protected: false,
        })
    }

    pub fn to_resource(&self) -> BackendResult<Resource> {
        let mut attributes = HashMap::with_capacity(self.attributes.len());
        for (key, json) in &self.attributes {
            let value: Value = serde_json::from_value(json.clone()).map_err(|e| {
                BackendError::InvalidState(format!(
                    "{}.{}.{}: {}",
                    self.resource_type, self.name, key, e
                ))
            })?;
            attributes.insert(key.clone(), value);
        }

        let mut resource = Resource::new(&self.resource_type, &self.name);
        resource.attributes = attributes;
        resource.tags = self.tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if let Some(identifier) = &self.identifier {
            resource.identifier = Some(identifier.clone());
            resource.lifecycle = Lifecycle::Created;
        }
        Ok(resource)
    }

    pub fn provider_name(&self) -> &str {
        self.provider
            .as_deref()
            .unwrap_or_else(|| self.resource_type.split('.').next().unwrap_or(&self.resource_type))
    }
}
