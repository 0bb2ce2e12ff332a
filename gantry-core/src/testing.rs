//! Plugins for unit tests that only need schemas

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::provider::{PluginRegistry, ProviderObject, ProviderResult, ResourcePlugin};
use crate::resource::Resource;
use crate::schema::ResourceSchema;

pub(crate) struct SchemaPlugin {
    schema: ResourceSchema,
    tolerated: Vec<String>,
}

impl SchemaPlugin {
    pub(crate) fn new(schema: ResourceSchema) -> Self {
        Self {
            schema,
            tolerated: Vec::new(),
        }
    }

    pub(crate) fn tolerating(mut self, property: &str) -> Self {
        self.tolerated.push(property.to_string());
        self
    }
}

#[async_trait]
impl ResourcePlugin for SchemaPlugin {
    fn resource_type(&self) -> &str {
        &self.schema.resource_type
    }

    fn schema(&self) -> ResourceSchema {
        self.schema.clone()
    }

    fn copy_from(&self, _resource: &mut Resource, _object: &ProviderObject) -> ProviderResult<()> {
        Ok(())
    }

    async fn create(&self, _ctx: &Context, resource: &Resource) -> ProviderResult<String> {
        Ok(format!("{}-1", resource.id.name))
    }

    async fn update(
        &self,
        _ctx: &Context,
        _from: &Resource,
        _to: &Resource,
        _changed: &BTreeSet<String>,
    ) -> ProviderResult<()> {
        Ok(())
    }

    async fn delete(&self, _ctx: &Context, _resource: &Resource) -> ProviderResult<()> {
        Ok(())
    }

    async fn refresh(&self, _ctx: &Context, _resource: &mut Resource) -> ProviderResult<bool> {
        Ok(true)
    }

    fn tolerates_immutable_change(&self, property: &str) -> bool {
        self.tolerated.iter().any(|p| p == property)
    }
}

pub(crate) fn registry(plugins: impl IntoIterator<Item = SchemaPlugin>) -> PluginRegistry {
    plugins
        .into_iter()
        .fold(PluginRegistry::new(), |r, p| r.with_plugin(Arc::new(p)))
}
