//! Module system traits and interfaces
//!
//! A module is a named set of services. Exactly one provider backs each
//! enabled module; the bootstrap flow drives every provider through
//! prepare, start and notify-after-completed.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;

use crate::module::services::{ModuleDirectory, ServiceKey};

/// Module declared in the static registry
#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    /// Module name (unique identifier)
    pub name: String,
    /// Services the selected provider must register during prepare
    pub services: Vec<ServiceKey>,
}

impl ModuleDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            services: Vec::new(),
        }
    }

    pub fn with_service<S: Any>(mut self) -> Self {
        self.services.push(ServiceKey::of::<S>());
        self
    }
}

/// Implementation backing a module
#[async_trait]
pub trait ModuleProvider: Send + Sync {
    /// Names of modules that must start before this one
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    /// Create and register services
    ///
    /// Runs before any provider starts. Only declared dependencies are
    /// reachable through the context.
    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), ModuleError>;

    /// Start background work
    async fn start(&mut self, modules: &ModuleDirectory) -> Result<(), ModuleError>;

    /// Called once every provider started
    fn notify_after_completed(&mut self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Stop background work and release resources
    async fn shutdown(&mut self) {}
}

/// Handle given to a provider during prepare
pub struct PrepareContext<'a> {
    module: &'a str,
    requires: &'a [String],
    directory: &'a mut ModuleDirectory,
}

impl<'a> PrepareContext<'a> {
    pub(crate) fn new(
        module: &'a str,
        requires: &'a [String],
        directory: &'a mut ModuleDirectory,
    ) -> Self {
        Self {
            module,
            requires,
            directory,
        }
    }

    /// Module being prepared
    pub fn module(&self) -> &str {
        self.module
    }

    /// Register a service of this module
    pub fn register<S: Any + Send + Sync>(&mut self, service: Arc<S>) {
        self.directory.registry_mut(self.module).register(service);
    }

    /// Service of a declared dependency, for registering intent (e.g. listeners)
    pub fn dependency<S: Any + Send + Sync>(&self, module: &str) -> Result<Arc<S>, ModuleError> {
        if !self.requires.iter().any(|r| r == module) {
            return Err(ModuleError::Configuration(format!(
                "module {} does not declare a dependency on {}",
                self.module, module
            )));
        }
        self.directory
            .registry(module)
            .and_then(|r| r.get::<S>())
            .ok_or_else(|| ModuleError::ServiceNotFound {
                module: module.to_string(),
                service: std::any::type_name::<S>().to_string(),
            })
    }
}

/// Module system errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("Modules not found: {}", .0.join(", "))]
    ModuleNotFound(Vec<String>),

    #[error("Provider {provider} of module {module} requires module {required}, which is not enabled")]
    RequiredModuleNotFound {
        module: String,
        provider: String,
        required: String,
    },

    #[error("No provider of module {module} matches selector '{selector}'")]
    ProviderNotFound { module: String, selector: String },

    #[error("Module {module} has more than one provider: {}", .providers.join(", "))]
    DuplicateProvider {
        module: String,
        providers: Vec<String>,
    },

    #[error("Cycle dependency between modules: {}", .0.join(" -> "))]
    CycleDependency(Vec<String>),

    #[error("Module {module} did not provide service {service}")]
    ServiceNotProvided { module: String, service: String },

    #[error("Module {module} failed to prepare: {reason}")]
    PrepareFailure { module: String, reason: String },

    #[error("Module {module} failed to start: {reason}")]
    StartFailure { module: String, reason: String },

    #[error("Module {0} is not loaded")]
    ModuleNotLoaded(String),

    #[error("Service {service} not found in module {module}")]
    ServiceNotFound { module: String, service: String },

    #[error("Module configuration error: {0}")]
    Configuration(String),
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::Configuration(e.to_string())
    }
}
