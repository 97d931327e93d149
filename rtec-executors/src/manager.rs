//!
//! The Manager owns the components of a process and the execution contexts
//! driving them.
//!

use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tracing::{debug, info};

use rtec_core::{ComponentId, ComponentProxy};

use crate::{
    arena::ComponentArena,
    config::EcConfig,
    error::{EcError, Result},
    execution_context::ExecutionContext,
    factory::EcFactoryRegistry,
};

/// Manager
///
/// Components are registered with the manager and get a [`ComponentId`]
/// back, which is what execution contexts are handed to attach them.
pub struct Manager {
    /// Every registered component
    arena: Arc<ComponentArena>,
    /// The known context types
    registry: EcFactoryRegistry,
    /// The contexts created by this manager
    contexts: Mutex<Vec<Arc<ExecutionContext>>>,
    /// Used to name contexts that were not given a name
    created: AtomicUsize,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    /// Create a manager knowing the built-in context types
    pub fn new() -> Self {
        Self::with_registry(EcFactoryRegistry::with_builtins())
    }

    /// Create a manager with a custom set of context types
    pub fn with_registry(registry: EcFactoryRegistry) -> Self {
        Self {
            arena: Arc::new(ComponentArena::new()),
            registry,
            contexts: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    /// The component arena
    pub fn arena(&self) -> &Arc<ComponentArena> {
        &self.arena
    }

    /// The factory registry
    pub fn registry(&self) -> &EcFactoryRegistry {
        &self.registry
    }

    /// Register a component
    pub fn register_component(&self, component: Arc<dyn ComponentProxy>) -> ComponentId {
        let id = self.arena.insert(component);
        debug!(component = %id, "component registered");
        id
    }

    /// Detach a component from every context and forget about it
    pub fn unregister_component(&self, id: ComponentId) -> Result<()> {
        for ec in self.contexts().iter() {
            if ec.participant(id).is_ok() {
                ec.try_remove_component(id)?;
            }
        }
        self.arena
            .remove(id)
            .ok_or(EcError::NoSuchComponent(id))?;
        debug!(component = %id, "component unregistered");
        Ok(())
    }

    /// Create a stopped execution context from a configuration.
    ///
    /// The context is named after the `name` property when there is one.
    pub fn create_context(&self, config: &EcConfig) -> Result<Arc<ExecutionContext>> {
        let name = config.properties.get("name").cloned().unwrap_or_else(|| {
            format!(
                "{}{}",
                config.type_name,
                self.created.fetch_add(1, Ordering::AcqRel)
            )
        });
        let ec = Arc::new(self.registry.create(name, config, self.arena.clone())?);
        self.lock_contexts().push(ec.clone());
        Ok(ec)
    }

    /// Create a stopped execution context from a TOML file
    pub fn create_context_from_file(&self, path: impl AsRef<Path>) -> Result<Arc<ExecutionContext>> {
        self.create_context(&EcConfig::from_file(path)?)
    }

    /// The contexts created by this manager
    pub fn contexts(&self) -> Vec<Arc<ExecutionContext>> {
        self.lock_contexts().clone()
    }

    /// Find a context by name
    pub fn find_context(&self, name: &str) -> Option<Arc<ExecutionContext>> {
        self.lock_contexts()
            .iter()
            .find(|ec| ec.name() == name)
            .cloned()
    }

    /// Finalize a context and forget about it
    pub fn destroy_context(&self, ec: &Arc<ExecutionContext>) -> Result<()> {
        let mut contexts = self.lock_contexts();
        let index = contexts
            .iter()
            .position(|known| Arc::ptr_eq(known, ec))
            .ok_or_else(|| EcError::BadParameter(format!("unknown execution context '{}'", ec.name())))?;
        contexts.remove(index);
        drop(contexts);
        ec.finalize();
        Ok(())
    }

    /// Stop every context and move every participant to EXITING
    pub fn shutdown(&self) {
        let contexts: Vec<_> = self.lock_contexts().drain(..).collect();
        if contexts.is_empty() {
            return;
        }
        for ec in contexts.iter() {
            ec.finalize();
        }
        info!(contexts = contexts.len(), "manager shut down");
    }

    fn lock_contexts(&self) -> MutexGuard<'_, Vec<Arc<ExecutionContext>>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
