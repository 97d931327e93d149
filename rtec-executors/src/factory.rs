//!
//! The Factory Registry maps a context type name to a function building
//! its wait strategy.
//!
//! The registry is an explicit value owned by whoever creates execution
//! contexts (typically a [`Manager`](crate::Manager)), so every test and
//! every application can have its own set of strategies.
//!

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    arena::ComponentArena,
    config::EcConfig,
    error::{EcError, Result},
    execution_context::ExecutionContext,
    profile::rate_to_period,
    strategy::{ExtTriggerStrategy, PeriodicStrategy, WaitStrategy},
};

#[cfg(target_os = "linux")]
use crate::strategy::RtPreemptStrategy;

/// A function building a wait strategy with a given period from a
/// configuration
pub type StrategyFactory =
    Box<dyn Fn(Duration, &EcConfig) -> Result<Box<dyn WaitStrategy>> + Send + Sync>;

/// Factory Registry
#[derive(Default)]
pub struct EcFactoryRegistry {
    factories: RwLock<BTreeMap<String, StrategyFactory>>,
}

impl EcFactoryRegistry {
    /// Create a registry without any factory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the strategies shipped with this crate
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.insert(
            PeriodicStrategy::NAME,
            Box::new(|period, _| Ok(Box::new(PeriodicStrategy::new(period)))),
        );
        registry.insert(
            ExtTriggerStrategy::NAME,
            Box::new(|period, _| Ok(Box::new(ExtTriggerStrategy::new(period)))),
        );
        #[cfg(target_os = "linux")]
        registry.insert(
            RtPreemptStrategy::NAME,
            Box::new(|period, config| Ok(Box::new(RtPreemptStrategy::new(period, config)?))),
        );
        registry
    }

    /// Register a factory under a new name
    pub fn register(&self, name: impl Into<String>, factory: StrategyFactory) -> Result<()> {
        let name = name.into();
        let mut factories = self.write();
        if factories.contains_key(&name) {
            return Err(EcError::BadParameter(format!(
                "a factory named '{}' is already registered",
                name
            )));
        }
        debug!(factory = %name, "factory registered");
        factories.insert(name, factory);
        Ok(())
    }

    /// Remove the factory registered under `name`
    pub fn unregister(&self, name: &str) -> Result<()> {
        self.write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| EcError::UnknownContextType(name.into()))
    }

    /// Whether a factory is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// The names of every registered factory, sorted
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Create a stopped execution context from a configuration
    pub fn create(
        &self,
        name: impl Into<String>,
        config: &EcConfig,
        arena: Arc<ComponentArena>,
    ) -> Result<ExecutionContext> {
        config.validate()?;
        let period = rate_to_period(config.rate)?;
        let strategy = {
            let factories = self.read();
            let factory = factories
                .get(&config.type_name)
                .ok_or_else(|| EcError::UnknownContextType(config.type_name.clone()))?;
            factory(period, config)?
        };

        let ec = ExecutionContext::new(name, strategy, config.rate, arena)?;
        if let Some(kind) = config.execution_kind()? {
            ec.profile().set_kind(kind);
        }
        let mut properties = config.properties.clone();
        properties.insert("type".into(), config.type_name.clone());
        properties.insert("rate".into(), config.rate.to_string());
        ec.profile().set_properties(properties);

        info!(ec = ec.name(), strategy = %config.type_name, rate = config.rate, "execution context created");
        Ok(ec)
    }

    /// Stop an execution context and move its participants to EXITING
    pub fn destroy(&self, ec: ExecutionContext) {
        ec.finalize();
        debug!(ec = ec.name(), "execution context destroyed");
    }

    fn insert(&self, name: &str, factory: StrategyFactory) {
        self.write().insert(name.into(), factory);
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, StrategyFactory>> {
        self.factories.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, StrategyFactory>> {
        self.factories.write().unwrap_or_else(PoisonError::into_inner)
    }
}
