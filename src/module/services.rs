//! Typed service objects exposed by modules

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::module::traits::ModuleError;

/// Identifies a service by its concrete type
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    type_id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    pub fn of<S: Any>() -> Self {
        Self {
            type_id: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Services registered by one module's provider
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    /// Register `service`, replacing a previous one of the same type
    pub fn register<S: Any + Send + Sync>(&mut self, service: Arc<S>) {
        self.services.insert(TypeId::of::<S>(), service);
    }

    pub fn get<S: Any + Send + Sync>(&self) -> Option<Arc<S>> {
        self.services
            .get(&TypeId::of::<S>())
            .and_then(|s| Arc::clone(s).downcast::<S>().ok())
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.services.contains_key(&key.type_id)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Service registries of all bootstrapped modules
#[derive(Default)]
pub struct ModuleDirectory {
    modules: HashMap<String, ServiceRegistry>,
    prepared: bool,
}

impl ModuleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `module` was bootstrapped; usable at any stage
    pub fn has(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Whether every provider finished prepare
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Services of `module`
    ///
    /// # Panics
    /// When called before every provider finished prepare.
    pub fn find(&self, module: &str) -> Result<&ServiceRegistry, ModuleError> {
        assert!(
            self.prepared,
            "module '{}' looked up before the prepare stage finished",
            module
        );
        self.modules
            .get(module)
            .ok_or_else(|| ModuleError::ModuleNotLoaded(module.to_string()))
    }

    /// Typed service of `module`; same stage rule as [`find`](Self::find)
    pub fn service<S: Any + Send + Sync>(&self, module: &str) -> Result<Arc<S>, ModuleError> {
        self.find(module)?
            .get::<S>()
            .ok_or_else(|| ModuleError::ServiceNotFound {
                module: module.to_string(),
                service: std::any::type_name::<S>().to_string(),
            })
    }

    pub(crate) fn registry(&self, module: &str) -> Option<&ServiceRegistry> {
        self.modules.get(module)
    }

    pub(crate) fn registry_mut(&mut self, module: &str) -> &mut ServiceRegistry {
        self.modules.entry(module.to_string()).or_default()
    }

    pub(crate) fn mark_prepared(&mut self) {
        self.prepared = true;
    }
}
