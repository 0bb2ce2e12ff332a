//! Context - Per-run dependencies handed to every plugin call
//!
//! Provider clients are created through [`Clients`], which is owned by the
//! context and dropped with it, so nothing is cached across runs.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::ReconcileConfig;
use crate::provider::{ProviderError, ProviderResult};
use crate::wait::{NoPrompt, Prompter, Wait};

type Factory = Box<dyn Fn() -> ProviderResult<Arc<dyn Any + Send + Sync>> + Send + Sync>;

/// Typed client factory, lazily constructing one client per type per run
#[derive(Default)]
pub struct Clients {
    factories: HashMap<TypeId, Factory>,
    cache: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register how to build a client of type `T`
    pub fn register<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> ProviderResult<T> + Send + Sync + 'static,
    {
        self.factories.insert(
            TypeId::of::<T>(),
            Box::new(move || factory().map(|c| Arc::new(c) as Arc<dyn Any + Send + Sync>)),
        );
        self
    }

    /// Get the client of type `T`, building it on first use
    pub fn get<T: Send + Sync + 'static>(&self) -> ProviderResult<Arc<T>> {
        let type_id = TypeId::of::<T>();
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);

        let client = match cache.get(&type_id) {
            Some(client) => client.clone(),
            None => {
                let factory = self.factories.get(&type_id).ok_or_else(|| {
                    ProviderError::new(format!(
                        "no client registered for {}",
                        std::any::type_name::<T>()
                    ))
                })?;
                let client = factory()?;
                cache.insert(type_id, client.clone());
                client
            }
        };

        client
            .downcast::<T>()
            .map_err(|_| ProviderError::new("client factory returned the wrong type"))
    }
}

/// Context of one reconciliation run
pub struct Context {
    clients: Clients,
    config: ReconcileConfig,
    prompter: Box<dyn Prompter>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ReconcileConfig::default())
    }
}

impl Context {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            clients: Clients::new(),
            config,
            prompter: Box::new(NoPrompt),
        }
    }

    pub fn with_clients(mut self, clients: Clients) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_prompter(mut self, prompter: impl Prompter + 'static) -> Self {
        self.prompter = Box::new(prompter);
        self
    }

    pub fn client<T: Send + Sync + 'static>(&self) -> ProviderResult<Arc<T>> {
        self.clients.get::<T>()
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn prompter(&self) -> &dyn Prompter {
        self.prompter.as_ref()
    }

    /// A wait using the configured default bounds
    pub fn wait(&self) -> Wait {
        Wait::from_defaults(&self.config.wait)
    }
}
