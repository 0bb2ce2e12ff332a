//! Error - Top-level error of a reconciliation run

use crate::differ::DiffError;
use crate::plan::PlanError;
use crate::provider::{ProviderError, UnknownResourceType};
use crate::resource::{LifecycleError, ResourceId};
use crate::store::StoreError;
use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Static validation failed; no provider call was made
    #[error("validation failed with {} error(s):\n{}", .0.len(), format_validation_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("timed out waiting for {resource} to reach {target}")]
    WaitTimeout { resource: ResourceId, target: String },

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    UnknownResourceType(#[from] UnknownResourceType),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("{from}: unresolved reference to {target}")]
    UnresolvedReference { from: ResourceId, target: ResourceId },

    #[error(transparent)]
    State(#[from] StoreError),

    #[error("{0} is protected from deletion")]
    Protected(ResourceId),
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
