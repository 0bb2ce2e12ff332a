//! Gantry Core
//!
//! Reconciliation core for an infrastructure tool: compares declared resources
//! against recorded state, orders the resulting changes by dependency, and
//! drives provider plugins to apply them

pub mod classify;
pub mod config;
pub mod context;
pub mod differ;
pub mod error;
pub mod executor;
pub mod finder;
pub mod graph;
pub mod plan;
pub mod provider;
pub mod reconciler;
pub mod resource;
pub mod schema;
pub mod store;
pub mod tags;
pub mod validation;
pub mod wait;

#[cfg(test)]
mod testing;
