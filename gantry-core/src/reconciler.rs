//! Reconciler - One reconciliation run: refresh, plan, apply

use std::collections::HashMap;

use log::info;

use crate::context::Context;
use crate::differ::{diff, tag_drift};
use crate::error::ReconcileError;
use crate::executor::{ApplyReport, Executor};
use crate::graph::DependencyGraph;
use crate::plan::{Plan, plan};
use crate::provider::{Operation, PluginRegistry};
use crate::resource::{Resource, ResourceId};
use crate::store::StateStore;
use crate::validation::validate;

pub struct Reconciler<'a> {
    registry: &'a PluginRegistry,
    ctx: &'a Context,
}

impl<'a> Reconciler<'a> {
    pub fn new(registry: &'a PluginRegistry, ctx: &'a Context) -> Self {
        Self { registry, ctx }
    }

    /// Re-read every persisted resource from the provider.
    ///
    /// Resources that no longer exist are dropped from the result and from
    /// the store. Attributes holding references keep their stored form.
    pub async fn refresh(
        &self,
        previous: Vec<Resource>,
        store: &mut dyn StateStore,
    ) -> Result<Vec<Resource>, ReconcileError> {
        let mut refreshed = Vec::with_capacity(previous.len());

        for stored in previous {
            if stored.is_data_source() {
                refreshed.push(stored);
                continue;
            }
            let plugin = self.registry.plugin(&stored.id.resource_type)?;

            let mut live = stored.clone();
            let exists = plugin.refresh(self.ctx, &mut live).await.map_err(|e| {
                e.for_resource(stored.id.clone())
                    .in_operation(Operation::Refresh)
            })?;

            if !exists {
                info!("{} no longer exists, removing it from state", stored.id);
                store.remove_resource(&stored.id).await?;
                continue;
            }

            for (name, value) in &stored.attributes {
                let mut refs = Vec::new();
                value.collect_refs(&mut refs);
                if !refs.is_empty() {
                    live.attributes.insert(name.clone(), value.clone());
                }
            }
            live.identifier = stored.identifier;
            refreshed.push(live);
        }

        Ok(refreshed)
    }

    /// Validate desired config and order the changes against `previous`.
    ///
    /// No provider call is made here.
    pub fn plan(&self, previous: &[Resource], desired: &[Resource]) -> Result<Plan, ReconcileError> {
        validate(desired, self.registry).map_err(ReconcileError::Validation)?;

        let changes = diff(previous, desired, self.registry)?;
        let drifted: Vec<Resource> = {
            let by_id: HashMap<&ResourceId, &Resource> = previous.iter().map(|r| (&r.id, r)).collect();
            tag_drift(previous, desired, &changes, &self.ctx.config().reserved_tag_prefixes)
                .into_iter()
                .filter_map(|r| {
                    let mut retagged = (*by_id.get(&r.id)?).clone();
                    retagged.tags = r.tags.clone();
                    Some(retagged)
                })
                .collect()
        };

        let graph = DependencyGraph::from_resources(previous.iter().chain(desired));
        let mut plan = plan(changes, &graph)?;
        for resource in drifted {
            plan.retag(resource);
        }

        info!("{}", plan.summary());
        Ok(plan)
    }

    /// Execute `plan`, resolving references against previous state and the
    /// data sources in `desired`
    pub async fn apply(
        &self,
        plan: &Plan,
        previous: &[Resource],
        desired: &[Resource],
        store: &mut dyn StateStore,
    ) -> ApplyReport {
        let existing: Vec<Resource> = previous
            .iter()
            .chain(desired.iter().filter(|r| r.is_data_source()))
            .cloned()
            .collect();
        Executor::new(self.registry, self.ctx)
            .apply(plan, &existing, store)
            .await
    }
}
