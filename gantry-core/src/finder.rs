//! Finder - Read-only lookup of existing, unmanaged provider objects
//!
//! Found objects are turned into read-only resources through the owning
//! plugin's `copy_from`, so they can be referenced but are never diffed.

use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;

use crate::context::Context;
use crate::error::ReconcileError;
use crate::provider::{Operation, PluginRegistry, ProviderError, ProviderObject, ProviderResult};
use crate::resource::Resource;

#[async_trait]
pub trait Finder: Send + Sync {
    fn resource_type(&self) -> &str;

    async fn find_all(&self, ctx: &Context) -> ProviderResult<Vec<ProviderObject>>;

    async fn find_by_filters(
        &self,
        ctx: &Context,
        filters: &HashMap<String, String>,
    ) -> ProviderResult<Vec<ProviderObject>>;
}

impl PluginRegistry {
    /// Look up existing objects of a type, with all of `filters` applied.
    ///
    /// Each result is named after its provider identifier.
    pub async fn lookup(
        &self,
        ctx: &Context,
        resource_type: &str,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<Resource>, ReconcileError> {
        let finder = self.finder(resource_type)?;
        let plugin = self.plugin(resource_type)?;

        let objects = if filters.is_empty() {
            finder.find_all(ctx).await
        } else {
            finder.find_by_filters(ctx, filters).await
        }
        .map_err(|e| e.in_operation(Operation::Find))?;
        debug!("Found {} {} object(s)", objects.len(), resource_type);

        let mut found = Vec::with_capacity(objects.len());
        for object in &objects {
            let mut resource = Resource::new(resource_type, "").with_read_only(true);
            plugin.copy_from(&mut resource, object)?;
            let Some(identifier) = resource.identifier.clone() else {
                return Err(ProviderError::new(format!(
                    "{} object has no identifier",
                    resource_type
                ))
                .in_operation(Operation::Find)
                .into());
            };
            resource.id.name = identifier;
            found.push(resource);
        }
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}
