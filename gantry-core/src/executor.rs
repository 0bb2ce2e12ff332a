//! Executor - Run a Plan's steps against resource plugins
//!
//! Steps run one at a time in plan order. A step whose prerequisites did not
//! all succeed is skipped; independent steps still run. Each successful step
//! is written to the state store immediately, and nothing is rolled back.

use std::collections::{BTreeSet, HashMap};

use log::{debug, error, info, warn};

use crate::context::Context;
use crate::differ::BlockDelta;
use crate::error::ReconcileError;
use crate::plan::{Plan, Step, StepKind};
use crate::provider::{Operation, PluginRegistry, ProviderError, ResourcePlugin};
use crate::resource::{Block, Lifecycle, Resource, ResourceId, ResourceRef, Value};
use crate::schema::ResourceSchema;
use crate::store::StateStore;
use crate::tags::{TagOp, TagReconciler};

/// Result of executing each Step
#[derive(Debug, PartialEq)]
pub enum StepOutcome {
    Created { identifier: String, tag_ops: Vec<TagOp> },
    Updated { tag_ops: Vec<TagOp> },
    Deleted,
    Retagged { tag_ops: Vec<TagOp> },
    /// Not attempted (dry run, or a prerequisite did not complete)
    Skipped { reason: String },
}

#[derive(Debug)]
pub struct StepReport {
    pub id: ResourceId,
    pub result: Result<StepOutcome, ReconcileError>,
}

/// Result of executing the entire Plan
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub steps: Vec<StepReport>,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failure_count == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ResourceId, &ReconcileError)> {
        self.steps
            .iter()
            .filter_map(|s| s.result.as_ref().err().map(|e| (&s.id, e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Succeeded,
    Failed,
    Skipped,
}

/// Executes Plans using the registered plugins
pub struct Executor<'a> {
    registry: &'a PluginRegistry,
    ctx: &'a Context,
    tags: TagReconciler,
}

impl<'a> Executor<'a> {
    pub fn new(registry: &'a PluginRegistry, ctx: &'a Context) -> Self {
        Self {
            registry,
            ctx,
            tags: TagReconciler::from_config(ctx.config()),
        }
    }

    /// Execute a Plan. `existing` are the resources references may point at
    /// before anything is created (previous state and data sources).
    pub async fn apply(&self, plan: &Plan, existing: &[Resource], store: &mut dyn StateStore) -> ApplyReport {
        let mut known: HashMap<ResourceId, Resource> = existing
            .iter()
            .map(|r| (r.id.clone(), r.clone()))
            .collect();
        let mut report = ApplyReport::default();
        let mut status = Vec::with_capacity(plan.len());

        for step in plan.steps() {
            let id = step.id().clone();

            let blocked = step
                .after
                .iter()
                .find(|&&i| status.get(i) != Some(&Status::Succeeded))
                .map(|&i| plan.steps()[i].id().clone());

            let result = if self.ctx.config().dry_run {
                Ok(StepOutcome::Skipped {
                    reason: "dry-run mode".to_string(),
                })
            } else if let Some(prerequisite) = blocked {
                warn!("Skipping {}: {} did not complete", id, prerequisite);
                Ok(StepOutcome::Skipped {
                    reason: format!("{} did not complete", prerequisite),
                })
            } else {
                self.execute_step(step, &mut known, store).await
            };

            match &result {
                Ok(StepOutcome::Skipped { .. }) => {
                    report.skipped_count += 1;
                    status.push(Status::Skipped);
                }
                Ok(_) => {
                    report.success_count += 1;
                    status.push(Status::Succeeded);
                }
                Err(e) => {
                    error!("{}", e);
                    report.failure_count += 1;
                    status.push(Status::Failed);
                }
            }
            report.steps.push(StepReport { id, result });
        }

        report
    }

    /// Execute a single Step
    async fn execute_step(
        &self,
        step: &Step,
        known: &mut HashMap<ResourceId, Resource>,
        store: &mut dyn StateStore,
    ) -> Result<StepOutcome, ReconcileError> {
        let plugin = self.registry.plugin(&step.id().resource_type)?.as_ref();
        let schema = self
            .registry
            .schema(&step.id().resource_type)
            .ok_or_else(|| crate::provider::UnknownResourceType(step.id().resource_type.clone()))?;

        match &step.kind {
            StepKind::Create { resource, .. } => self.create(plugin, schema, resource, known, store).await,
            StepKind::Update {
                from,
                to,
                changed,
                block_deltas,
            } => {
                self.update(plugin, schema, from, to, changed, block_deltas, known, store)
                    .await
            }
            StepKind::Delete { resource, replaced } => {
                if store.is_protected(&resource.id) {
                    return Err(ReconcileError::Protected(resource.id.clone()));
                }
                info!("Deleting {}", resource.id);
                let target = resolve(resource, known).unwrap_or_else(|_| resource.clone());
                plugin
                    .delete(self.ctx, &target)
                    .await
                    .map_err(failed(&resource.id, Operation::Delete))?;

                let mut deleted = resource.clone();
                deleted.transition(Lifecycle::Deleted)?;
                store.remove_resource(&deleted.id).await?;
                if !replaced {
                    known.remove(&deleted.id);
                }
                Ok(StepOutcome::Deleted)
            }
            StepKind::Retag { resource } => {
                let tag_ops = match plugin.tagging() {
                    Some(api) => self.tags.reconcile(self.ctx, resource, api).await?,
                    None => Vec::new(),
                };
                store.save_resource(resource).await?;
                Ok(StepOutcome::Retagged { tag_ops })
            }
        }
    }

    async fn create(
        &self,
        plugin: &dyn ResourcePlugin,
        schema: &ResourceSchema,
        resource: &Resource,
        known: &mut HashMap<ResourceId, Resource>,
        store: &mut dyn StateStore,
    ) -> Result<StepOutcome, ReconcileError> {
        info!("Creating {}", resource.id);
        let mut live = resolve(resource, known)?;

        // standalone members are added with their own calls once the parent exists
        let standalone: Vec<_> = schema
            .standalone_sets()
            .into_iter()
            .filter_map(|a| live.attributes.remove(&a.name).map(|v| (a.name.clone(), v)))
            .collect();

        let identifier = plugin
            .create(self.ctx, &live)
            .await
            .map_err(failed(&resource.id, Operation::Create))?;
        info!("Created {} ({})", resource.id, identifier);

        // members are recorded one at a time, as each is added
        let mut declared = resource.clone();
        for (attribute, _) in &standalone {
            declared.attributes.insert(attribute.clone(), Value::BlockSet(Vec::new()));
        }
        declared.assign_identifier(identifier.clone())?;
        declared.transition(Lifecycle::Created)?;
        live.identifier = Some(identifier.clone());
        live.lifecycle = Lifecycle::Created;
        store.save_resource(&declared).await?;

        for (attribute, value) in &standalone {
            let (Value::BlockSet(members), Some(Value::BlockSet(wanted))) =
                (value, resource.attributes.get(attribute))
            else {
                continue;
            };
            for (member, declared_member) in members.iter().zip(wanted) {
                plugin
                    .add_block(self.ctx, &live, attribute, member)
                    .await
                    .map_err(failed(&resource.id, Operation::AddBlock))?;
                if let Some(Value::BlockSet(recorded)) = declared.attributes.get_mut(attribute) {
                    recorded.push(declared_member.clone());
                }
                store.save_resource(&declared).await?;
            }
        }
        live.attributes.extend(standalone);

        let tag_ops = self.finish(plugin, schema, &mut declared, &mut live).await?;
        store.save_resource(&declared).await?;
        known.insert(live.id.clone(), live);

        Ok(StepOutcome::Created { identifier, tag_ops })
    }

    #[allow(clippy::too_many_arguments)]
    async fn update(
        &self,
        plugin: &dyn ResourcePlugin,
        schema: &ResourceSchema,
        from: &Resource,
        to: &Resource,
        changed: &BTreeSet<String>,
        block_deltas: &[BlockDelta],
        known: &mut HashMap<ResourceId, Resource>,
        store: &mut dyn StateStore,
    ) -> Result<StepOutcome, ReconcileError> {
        info!("Updating {}", to.id);
        if from.identifier.is_none() {
            return Err(ProviderError::new("resource has no identifier")
                .for_resource(to.id.clone())
                .in_operation(Operation::Update)
                .into());
        }

        let mut declared = to.clone();
        declared.identifier = from.identifier.clone();
        declared.lifecycle = from.lifecycle;
        // outputs are never declared; keep the ones already known
        for (name, value) in &from.attributes {
            if schema.is_output(name) && !declared.attributes.contains_key(name) {
                declared.attributes.insert(name.clone(), value.clone());
            }
        }

        let current = resolve(from, known)?;
        let mut live = resolve(&declared, known)?;

        let standalone: BTreeSet<&str> = schema
            .standalone_sets()
            .into_iter()
            .map(|a| a.name.as_str())
            .collect();
        let inline: BTreeSet<String> = changed
            .iter()
            .filter(|name| !standalone.contains(name.as_str()))
            .cloned()
            .collect();

        if !inline.is_empty() {
            plugin
                .update(self.ctx, &current, &live, &inline)
                .await
                .map_err(failed(&to.id, Operation::Update))?;
        }

        for delta in block_deltas {
            for block in &delta.removed {
                let block = resolve_block(&to.id, block, known)?;
                debug!("{}: removing {} member", to.id, delta.attribute);
                plugin
                    .remove_block(self.ctx, &live, &delta.attribute, &block)
                    .await
                    .map_err(failed(&to.id, Operation::RemoveBlock))?;
            }
            for block in &delta.added {
                let block = resolve_block(&to.id, block, known)?;
                debug!("{}: adding {} member", to.id, delta.attribute);
                plugin
                    .add_block(self.ctx, &live, &delta.attribute, &block)
                    .await
                    .map_err(failed(&to.id, Operation::AddBlock))?;
            }
        }

        declared.transition(Lifecycle::Updated)?;
        live.lifecycle = Lifecycle::Updated;

        let tag_ops = self.finish(plugin, schema, &mut declared, &mut live).await?;
        store.save_resource(&declared).await?;
        known.insert(live.id.clone(), live);

        Ok(StepOutcome::Updated { tag_ops })
    }

    /// Pick up provider-assigned outputs and reconcile tags
    async fn finish(
        &self,
        plugin: &dyn ResourcePlugin,
        schema: &ResourceSchema,
        declared: &mut Resource,
        live: &mut Resource,
    ) -> Result<Vec<TagOp>, ReconcileError> {
        let mut read = live.clone();
        let exists = plugin
            .refresh(self.ctx, &mut read)
            .await
            .map_err(failed(&live.id, Operation::Refresh))?;
        if exists {
            for (name, value) in read.attributes {
                if schema.is_output(&name) {
                    declared.attributes.insert(name.clone(), value.clone());
                    live.attributes.insert(name, value);
                }
            }
        }

        match plugin.tagging() {
            Some(api) => Ok(self.tags.reconcile(self.ctx, live, api).await?),
            None => Ok(Vec::new()),
        }
    }
}

fn failed(id: &ResourceId, operation: Operation) -> impl Fn(ProviderError) -> ProviderError + '_ {
    move |e| e.for_resource(id.clone()).in_operation(operation)
}

/// Replace every reference with the value it points at
fn resolve(resource: &Resource, known: &HashMap<ResourceId, Resource>) -> Result<Resource, ReconcileError> {
    let mut resolved = resource.clone();
    for value in resolved.attributes.values_mut() {
        resolve_value(&resource.id, value, known, 0)?;
    }
    Ok(resolved)
}

fn resolve_block(
    from: &ResourceId,
    block: &Block,
    known: &HashMap<ResourceId, Resource>,
) -> Result<Block, ReconcileError> {
    let mut resolved = block.clone();
    for value in resolved.attributes.values_mut() {
        resolve_value(from, value, known, 0)?;
    }
    Ok(resolved)
}

const MAX_REF_DEPTH: usize = 16;

fn resolve_value(
    from: &ResourceId,
    value: &mut Value,
    known: &HashMap<ResourceId, Resource>,
    depth: usize,
) -> Result<(), ReconcileError> {
    match value {
        Value::Ref(r) => {
            let target = lookup(from, r, known, depth)?;
            *value = target;
        }
        Value::List(items) => {
            for item in items {
                resolve_value(from, item, known, depth)?;
            }
        }
        Value::Map(map) => {
            for v in map.values_mut() {
                resolve_value(from, v, known, depth)?;
            }
        }
        Value::Block(block) => {
            for v in block.attributes.values_mut() {
                resolve_value(from, v, known, depth)?;
            }
        }
        Value::BlockList(blocks) | Value::BlockSet(blocks) => {
            for v in blocks.iter_mut().flat_map(|b| b.attributes.values_mut()) {
                resolve_value(from, v, known, depth)?;
            }
        }
        Value::String(_) | Value::Int(_) | Value::Bool(_) => {}
    }
    Ok(())
}

fn lookup(
    from: &ResourceId,
    r: &ResourceRef,
    known: &HashMap<ResourceId, Resource>,
    depth: usize,
) -> Result<Value, ReconcileError> {
    let unresolved = || ReconcileError::UnresolvedReference {
        from: from.clone(),
        target: r.target.clone(),
    };
    if depth >= MAX_REF_DEPTH {
        return Err(unresolved());
    }

    let target = known.get(&r.target).ok_or_else(unresolved)?;
    match &r.attribute {
        None => target.identifier.clone().map(Value::String).ok_or_else(unresolved),
        Some(attribute) => {
            let mut value = target.attributes.get(attribute).cloned().ok_or_else(unresolved)?;
            resolve_value(&target.id, &mut value, known, depth + 1)?;
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcileConfig;
    use crate::plan::Plan;
    use crate::provider::{ProviderObject, ProviderResult};
    use crate::schema::{AttributeSchema, AttributeType};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Records every call; creating a resource named "broken" or adding
    /// the "subnet-bad" member fails
    struct Recorder {
        schema: ResourceSchema,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ResourcePlugin for Recorder {
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
            let mut attrs: Vec<_> = resource.attributes.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            attrs.sort();
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {} {}", resource.id, attrs.join(" ")));
            if resource.id.name == "broken" {
                return Err(ProviderError::new("limit exceeded"));
            }
            Ok(format!("{}-{}", resource.id.resource_type.replace("ec2.", ""), resource.id.name))
        }

        async fn update(
            &self,
            _ctx: &Context,
            _from: &Resource,
            to: &Resource,
            changed: &BTreeSet<String>,
        ) -> ProviderResult<()> {
            let names: Vec<_> = changed.iter().map(String::as_str).collect();
            self.calls
                .lock()
                .unwrap()
                .push(format!("update {} {}", to.id, names.join(",")));
            Ok(())
        }

        async fn delete(&self, _ctx: &Context, resource: &Resource) -> ProviderResult<()> {
            self.calls.lock().unwrap().push(format!("delete {}", resource.id));
            Ok(())
        }

        async fn refresh(&self, _ctx: &Context, resource: &mut Resource) -> ProviderResult<bool> {
            if self.schema.is_output("arn") {
                let arn = format!("arn:{}", resource.identifier.clone().unwrap_or_default());
                resource.attributes.insert("arn".to_string(), Value::String(arn));
            }
            Ok(true)
        }

        async fn add_block(&self, _ctx: &Context, resource: &Resource, attribute: &str, block: &Block) -> ProviderResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("add {} {} {}", resource.id, attribute, block.attributes["subnet_id"]));
            if block.attributes["subnet_id"] == Value::string("subnet-bad") {
                return Err(ProviderError::new("invalid subnet"));
            }
            Ok(())
        }

        async fn remove_block(&self, _ctx: &Context, resource: &Resource, attribute: &str, block: &Block) -> ProviderResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("remove {} {} {}", resource.id, attribute, block.attributes["subnet_id"]));
            Ok(())
        }
    }

    fn setup() -> (PluginRegistry, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let association = ResourceSchema::new("association")
            .attribute(AttributeSchema::new("subnet_id", AttributeType::String))
            .with_key(["subnet_id"]);
        let schemas = [
            ResourceSchema::new("ec2.vpc")
                .attribute(AttributeSchema::new("cidr_block", AttributeType::String))
                .attribute(AttributeSchema::new("arn", AttributeType::String).output()),
            ResourceSchema::new("ec2.subnet")
                .attribute(AttributeSchema::new("vpc_id", AttributeType::Ref(None)))
                .attribute(AttributeSchema::new("vpc_cidr", AttributeType::String)),
            ResourceSchema::new("ec2.route_table")
                .attribute(AttributeSchema::new("name", AttributeType::String).updatable())
                .attribute(
                    AttributeSchema::new("association", AttributeType::BlockSet(Box::new(association)))
                        .standalone(),
                ),
        ];
        let mut registry = PluginRegistry::new();
        for schema in schemas {
            registry.register(Arc::new(Recorder {
                schema,
                calls: calls.clone(),
            }));
        }
        (registry, calls)
    }

    fn calls(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn create_resolves_references_and_persists_declared_form() {
        let (registry, log) = setup();
        let ctx = Context::default();
        let vpc = Resource::new("ec2.vpc", "main").with_attribute("cidr_block", Value::string("10.0.0.0/16"));
        let subnet = Resource::new("ec2.subnet", "a")
            .with_attribute("vpc_id", Value::Ref(ResourceRef::to(vpc.id.clone())))
            .with_attribute("vpc_cidr", Value::Ref(ResourceRef::attribute(vpc.id.clone(), "cidr_block")));

        let mut plan = Plan::new();
        let first = plan.push(StepKind::Create { resource: vpc.clone(), replacing: false }, vec![]);
        plan.push(StepKind::Create { resource: subnet.clone(), replacing: false }, vec![first]);

        let mut store = MemoryStore::new();
        let report = Executor::new(&registry, &ctx).apply(&plan, &[], &mut store).await;

        assert!(report.is_success());
        assert_eq!(
            calls(&log),
            vec![
                "create ec2.vpc.main cidr_block=\"10.0.0.0/16\"",
                "create ec2.subnet.a vpc_cidr=\"10.0.0.0/16\" vpc_id=\"vpc-main\"",
            ]
        );

        let saved = store.get(&subnet.id).unwrap();
        assert_eq!(saved.identifier.as_deref(), Some("subnet-a"));
        assert_eq!(saved.lifecycle, Lifecycle::Created);
        assert_eq!(saved.attributes["vpc_id"], subnet.attributes["vpc_id"]);

        // outputs picked up by the refresh after create
        let saved_vpc = store.get(&vpc.id).unwrap();
        assert_eq!(saved_vpc.attributes["arn"], Value::string("arn:vpc-main"));
    }

    #[tokio::test]
    async fn failure_skips_dependents_but_not_independent_steps() {
        let (registry, log) = setup();
        let ctx = Context::default();
        let broken = Resource::new("ec2.vpc", "broken");
        let other = Resource::new("ec2.vpc", "other");
        let subnet = Resource::new("ec2.subnet", "a").with_attribute("vpc_id", Value::Ref(ResourceRef::to(broken.id.clone())));

        let mut plan = Plan::new();
        let b = plan.push(StepKind::Create { resource: broken.clone(), replacing: false }, vec![]);
        plan.push(StepKind::Create { resource: subnet.clone(), replacing: false }, vec![b]);
        plan.push(StepKind::Create { resource: other.clone(), replacing: false }, vec![]);

        let mut store = MemoryStore::new();
        let report = Executor::new(&registry, &ctx).apply(&plan, &[], &mut store).await;

        assert_eq!(report.failure_count, 1);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(report.success_count, 1);

        let (id, err) = report.failures().next().unwrap();
        assert_eq!(id, &broken.id);
        assert_eq!(err.to_string(), "[ec2.vpc.broken] create failed: limit exceeded");
        assert!(matches!(
            &report.steps[1].result,
            Ok(StepOutcome::Skipped { reason }) if reason == "ec2.vpc.broken did not complete"
        ));
        assert_eq!(calls(&log).len(), 2);
        assert!(store.get(&other.id).is_some());
        assert!(store.get(&subnet.id).is_none());
    }

    #[tokio::test]
    async fn update_sends_inline_changes_and_block_deltas_separately() {
        let (registry, log) = setup();
        let ctx = Context::default();
        let member = |s: &str| Block::new("association").with_attribute("subnet_id", Value::string(s));
        let from = Resource::new("ec2.route_table", "rt")
            .with_identifier("rtb-1")
            .with_attribute("name", Value::string("old"))
            .with_attribute("association", Value::BlockSet(vec![member("subnet-a")]));
        let to = Resource::new("ec2.route_table", "rt")
            .with_attribute("name", Value::string("new"))
            .with_attribute("association", Value::BlockSet(vec![member("subnet-b")]));

        let mut plan = Plan::new();
        plan.push(
            StepKind::Update {
                from: from.clone(),
                to,
                changed: ["association".to_string(), "name".to_string()].into(),
                block_deltas: vec![BlockDelta {
                    attribute: "association".to_string(),
                    added: vec![member("subnet-b")],
                    removed: vec![member("subnet-a")],
                }],
            },
            vec![],
        );

        let mut store = MemoryStore::with_resources([from.clone()]);
        let report = Executor::new(&registry, &ctx).apply(&plan, &[from.clone()], &mut store).await;

        assert!(report.is_success());
        assert_eq!(
            calls(&log),
            vec![
                "update ec2.route_table.rt name",
                "remove ec2.route_table.rt association \"subnet-a\"",
                "add ec2.route_table.rt association \"subnet-b\"",
            ]
        );
        let saved = store.get(&from.id).unwrap();
        assert_eq!(saved.identifier.as_deref(), Some("rtb-1"));
        assert_eq!(saved.lifecycle, Lifecycle::Updated);
    }

    #[tokio::test]
    async fn standalone_members_are_added_after_create() {
        let (registry, log) = setup();
        let ctx = Context::default();
        let table = Resource::new("ec2.route_table", "rt").with_attribute(
            "association",
            Value::BlockSet(vec![Block::new("association").with_attribute("subnet_id", Value::string("subnet-a"))]),
        );

        let mut plan = Plan::new();
        plan.push(StepKind::Create { resource: table, replacing: false }, vec![]);
        let mut store = MemoryStore::new();
        Executor::new(&registry, &ctx).apply(&plan, &[], &mut store).await;

        assert_eq!(
            calls(&log),
            vec![
                "create ec2.route_table.rt ",
                "add ec2.route_table.rt association \"subnet-a\"",
            ]
        );
    }

    #[tokio::test]
    async fn failed_member_is_not_recorded() {
        let (registry, log) = setup();
        let ctx = Context::default();
        let member = |s: &str| Block::new("association").with_attribute("subnet_id", Value::string(s));
        let table = Resource::new("ec2.route_table", "rt").with_attribute(
            "association",
            Value::BlockSet(vec![member("subnet-ok"), member("subnet-bad")]),
        );

        let mut plan = Plan::new();
        plan.push(StepKind::Create { resource: table.clone(), replacing: false }, vec![]);
        let mut store = MemoryStore::new();
        let report = Executor::new(&registry, &ctx).apply(&plan, &[], &mut store).await;

        assert_eq!(report.failure_count, 1);
        assert_eq!(calls(&log).len(), 3);
        let saved = store.get(&table.id).unwrap().clone();
        assert_eq!(saved.identifier.as_deref(), Some("route_table-rt"));
        assert_eq!(saved.attributes["association"], Value::BlockSet(vec![member("subnet-ok")]));

        // the next diff adds the missing member again
        let changes = crate::differ::diff(&[saved], &[table], &registry).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].replace);
        assert_eq!(changes[0].block_deltas[0].added, vec![member("subnet-bad")]);
        assert!(changes[0].block_deltas[0].removed.is_empty());
    }

    #[tokio::test]
    async fn protected_resource_is_not_deleted() {
        let (registry, log) = setup();
        let ctx = Context::default();
        let vpc = Resource::new("ec2.vpc", "main").with_identifier("vpc-main");

        let mut plan = Plan::new();
        plan.push(StepKind::Delete { resource: vpc.clone(), replaced: false }, vec![]);
        let mut store = MemoryStore::with_resources([vpc.clone()]);
        store.protect(vpc.id.clone());
        let report = Executor::new(&registry, &ctx).apply(&plan, &[vpc.clone()], &mut store).await;

        assert!(matches!(report.steps[0].result, Err(ReconcileError::Protected(_))));
        assert!(calls(&log).is_empty());
        assert_eq!(store.get(&vpc.id), Some(&vpc));
    }

    #[tokio::test]
    async fn delete_removes_from_store() {
        let (registry, log) = setup();
        let ctx = Context::default();
        let vpc = Resource::new("ec2.vpc", "main").with_identifier("vpc-main");

        let mut plan = Plan::new();
        plan.push(StepKind::Delete { resource: vpc.clone(), replaced: false }, vec![]);
        let mut store = MemoryStore::with_resources([vpc.clone()]);
        let report = Executor::new(&registry, &ctx).apply(&plan, &[vpc.clone()], &mut store).await;

        assert_eq!(report.steps[0].result.as_ref().unwrap(), &StepOutcome::Deleted);
        assert_eq!(calls(&log), vec!["delete ec2.vpc.main"]);
        assert!(store.get(&vpc.id).is_none());
    }

    #[tokio::test]
    async fn unresolved_reference_fails_before_the_provider_call() {
        let (registry, log) = setup();
        let ctx = Context::default();
        let subnet = Resource::new("ec2.subnet", "a")
            .with_attribute("vpc_id", Value::Ref(ResourceRef::to(ResourceId::new("ec2.vpc", "ghost"))));

        let mut plan = Plan::new();
        plan.push(StepKind::Create { resource: subnet, replacing: false }, vec![]);
        let report = Executor::new(&registry, &ctx).apply(&plan, &[], &mut MemoryStore::new()).await;

        assert!(matches!(
            report.steps[0].result,
            Err(ReconcileError::UnresolvedReference { .. })
        ));
        assert!(calls(&log).is_empty());
    }

    #[tokio::test]
    async fn dry_run_skips_everything() {
        let (registry, log) = setup();
        let ctx = Context::new(ReconcileConfig {
            dry_run: true,
            ..Default::default()
        });

        let mut plan = Plan::new();
        plan.push(StepKind::Create { resource: Resource::new("ec2.vpc", "main"), replacing: false }, vec![]);
        let mut store = MemoryStore::new();
        let report = Executor::new(&registry, &ctx).apply(&plan, &[], &mut store).await;

        assert_eq!(report.skipped_count, 1);
        assert!(calls(&log).is_empty());
        assert_eq!(store.writes, 0);
    }
}
