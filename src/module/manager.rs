//! Module manager
//!
//! Owns the service directory and the bootstrap flow of one agent instance.

use std::any::Any;
use std::sync::Arc;
use tracing::info;

use crate::config::ModulesConfig;
use crate::module::bootstrap::BootstrapFlow;
use crate::module::registry::ModuleRegistry;
use crate::module::services::{ModuleDirectory, ServiceRegistry};
use crate::module::traits::ModuleError;

#[derive(Default)]
pub struct ModuleManager {
    directory: ModuleDirectory,
    flow: Option<BootstrapFlow>,
}

impl ModuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve, prepare, start and complete every enabled module
    ///
    /// On a start failure the providers that did start stay running until
    /// [`shutdown`](Self::shutdown) is called.
    pub async fn init(
        &mut self,
        registry: &ModuleRegistry,
        config: &ModulesConfig,
    ) -> Result<(), ModuleError> {
        if self.flow.is_some() {
            return Err(ModuleError::Configuration(
                "module manager already initialized".to_string(),
            ));
        }

        let mut flow = registry.resolve(config)?;
        info!("Bootstrapping modules: {}", flow.modules().join(", "));

        flow.prepare(&mut self.directory)?;
        self.directory.mark_prepared();
        flow.require_services(&self.directory)?;

        let flow = self.flow.insert(flow);
        flow.start(&self.directory).await?;
        flow.notify_after_completed()?;

        info!("All {} modules started", flow.len());
        Ok(())
    }

    pub fn has(&self, module: &str) -> bool {
        self.directory.has(module)
    }

    /// Services of a bootstrapped module
    ///
    /// # Panics
    /// When called before the prepare stage finished.
    pub fn find(&self, module: &str) -> Result<&ServiceRegistry, ModuleError> {
        self.directory.find(module)
    }

    pub fn service<S: Any + Send + Sync>(&self, module: &str) -> Result<Arc<S>, ModuleError> {
        self.directory.service::<S>(module)
    }

    /// Module names in start order
    pub fn modules(&self) -> Vec<&str> {
        self.flow.as_ref().map(|f| f.modules()).unwrap_or_default()
    }

    /// Providers whose start succeeded and that are not shut down yet
    pub fn started(&self) -> usize {
        self.flow.as_ref().map(|f| f.started()).unwrap_or(0)
    }

    /// Stop started providers in reverse order; safe to call repeatedly
    pub async fn shutdown(&mut self) {
        if let Some(flow) = self.flow.as_mut() {
            flow.shutdown().await;
        }
    }
}
