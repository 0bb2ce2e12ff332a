//! Plan - Ordered steps to be executed
//!
//! Deletes come first, dependents before their dependencies. Creates and
//! updates follow, dependencies before their dependents. A replacement is
//! split into a delete in the first phase and a create in the second. A
//! resource that an updated resource depended on is deleted last, after the
//! update has moved its dependent off it. No side effects occur until the
//! Plan is applied.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::differ::{BlockDelta, Change, ChangeKind};
use crate::graph::DependencyGraph;
use crate::resource::{Resource, ResourceId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("dependency cycle involving {0}")]
    Cycle(ResourceId),

    #[error("{0}: change is missing its resource")]
    Incomplete(ResourceId),
}

/// What a step does
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Create {
        resource: Resource,
        /// Second half of a replacement
        replacing: bool,
    },
    Update {
        from: Resource,
        to: Resource,
        changed: BTreeSet<String>,
        block_deltas: Vec<BlockDelta>,
    },
    Delete {
        resource: Resource,
        /// First half of a replacement
        replaced: bool,
    },
    /// Tags drifted but nothing else changed
    Retag { resource: Resource },
}

/// One provider-facing operation and the steps it must wait for
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub kind: StepKind,
    /// Indexes of steps that must succeed first
    pub after: Vec<usize>,
}

impl Step {
    /// The resource this step acts on, in the form the plugin receives
    pub fn resource(&self) -> &Resource {
        match &self.kind {
            StepKind::Create { resource, .. }
            | StepKind::Delete { resource, .. }
            | StepKind::Retag { resource } => resource,
            StepKind::Update { to, .. } => to,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.resource().id
    }
}

/// Plan containing Steps to be executed
#[derive(Debug, Clone, Default)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step, returning its index
    pub fn push(&mut self, kind: StepKind, after: Vec<usize>) -> usize {
        self.steps.push(Step { kind, after });
        self.steps.len() - 1
    }

    /// Append a tags-only step for a resource with no other change
    pub fn retag(&mut self, resource: Resource) -> usize {
        self.push(StepKind::Retag { resource }, Vec::new())
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Generate a summary of the Plan for display
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for step in &self.steps {
            match &step.kind {
                StepKind::Create { replacing: true, .. } => summary.replace += 1,
                StepKind::Create { .. } => summary.create += 1,
                StepKind::Update { .. } | StepKind::Retag { .. } => summary.update += 1,
                StepKind::Delete { replaced: true, .. } => {}
                StepKind::Delete { .. } => summary.delete += 1,
            }
        }
        summary
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{}", format_step_brief(step))?;
        }
        write!(f, "{}", self.summary())
    }
}

/// Format a step briefly for display
fn format_step_brief(step: &Step) -> String {
    match &step.kind {
        StepKind::Create { resource, replacing: false } => format!("+ {}", resource.id),
        StepKind::Create { resource, replacing: true } => {
            format!("± {} (create replacement)", resource.id)
        }
        StepKind::Update { to, changed, .. } => {
            let names: Vec<_> = changed.iter().map(String::as_str).collect();
            format!("~ {}: {}", to.id, names.join(", "))
        }
        StepKind::Delete { resource, replaced: false } => format!("- {}", resource.id),
        StepKind::Delete { resource, replaced: true } => {
            format!("± {} (delete for replacement)", resource.id)
        }
        StepKind::Retag { resource } => format!("~ {}: tags", resource.id),
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to replace, {} to delete",
            self.create, self.update, self.replace, self.delete
        )
    }
}

/// Order changes into steps using the dependency graph
pub fn plan(changes: Vec<Change>, graph: &DependencyGraph) -> Result<Plan, PlanError> {
    let position: HashMap<ResourceId, usize> = graph
        .topological_order()?
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();
    let pos = |id: &ResourceId| position.get(id).copied().unwrap_or(usize::MAX);

    let mut deletes = Vec::new();
    let mut applies = Vec::new();
    for change in changes {
        let id = change.id.clone();
        match change.kind {
            ChangeKind::Create => {
                let resource = change.to.ok_or_else(|| PlanError::Incomplete(id))?;
                applies.push(StepKind::Create {
                    resource,
                    replacing: false,
                });
            }
            ChangeKind::Delete => {
                let resource = change.from.ok_or_else(|| PlanError::Incomplete(id))?;
                deletes.push(StepKind::Delete {
                    resource,
                    replaced: false,
                });
            }
            ChangeKind::Update => {
                let (Some(from), Some(mut to)) = (change.from, change.to) else {
                    return Err(PlanError::Incomplete(id));
                };
                if change.replace {
                    deletes.push(StepKind::Delete {
                        resource: from,
                        replaced: true,
                    });
                    to.identifier = None;
                    applies.push(StepKind::Create {
                        resource: to,
                        replacing: true,
                    });
                } else {
                    applies.push(StepKind::Update {
                        from,
                        to,
                        changed: change.changed,
                        block_deltas: change.block_deltas,
                    });
                }
            }
        }
    }

    deletes.sort_by_key(|k| std::cmp::Reverse(pos(kind_id(k))));
    applies.sort_by_key(|k| pos(kind_id(k)));

    let updated: HashSet<ResourceId> = applies
        .iter()
        .filter(|k| matches!(k, StepKind::Update { .. }))
        .map(|k| kind_id(k).clone())
        .collect();
    let (late, early): (Vec<_>, Vec<_>) = deletes.into_iter().partition(|k| {
        matches!(k, StepKind::Delete { replaced: false, .. })
            && graph
                .transitive_dependents(kind_id(k))
                .iter()
                .any(|d| updated.contains(d))
    });

    let mut plan = Plan::new();
    let mut deleted_at: HashMap<ResourceId, usize> = HashMap::new();
    push_deletes(&mut plan, graph, early, &mut deleted_at, &HashMap::new());

    let mut applied_at: HashMap<ResourceId, usize> = HashMap::new();
    for kind in applies {
        let id = kind_id(&kind).clone();
        let mut after: Vec<usize> = graph
            .transitive_dependencies(&id)
            .iter()
            .filter_map(|d| applied_at.get(d).copied())
            .collect();
        if matches!(kind, StepKind::Create { replacing: true, .. })
            && let Some(&own_delete) = deleted_at.get(&id)
        {
            after.push(own_delete);
        }
        after.sort_unstable();
        let index = plan.push(kind, after);
        applied_at.insert(id, index);
    }

    push_deletes(&mut plan, graph, late, &mut deleted_at, &applied_at);

    Ok(plan)
}

/// Each delete waits for the steps of everything that depends on it
fn push_deletes(
    plan: &mut Plan,
    graph: &DependencyGraph,
    kinds: Vec<StepKind>,
    deleted_at: &mut HashMap<ResourceId, usize>,
    applied_at: &HashMap<ResourceId, usize>,
) {
    for kind in kinds {
        let id = kind_id(&kind).clone();
        let mut after: Vec<usize> = graph
            .transitive_dependents(&id)
            .iter()
            .flat_map(|d| [deleted_at.get(d), applied_at.get(d)])
            .flatten()
            .copied()
            .collect();
        after.sort_unstable();
        after.dedup();
        let index = plan.push(kind, after);
        deleted_at.insert(id, index);
    }
}

fn kind_id(kind: &StepKind) -> &ResourceId {
    match kind {
        StepKind::Create { resource, .. }
        | StepKind::Delete { resource, .. }
        | StepKind::Retag { resource } => &resource.id,
        StepKind::Update { to, .. } => &to.id,
    }
}
