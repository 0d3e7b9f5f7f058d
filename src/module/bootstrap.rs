//! Ordered lifecycle of resolved providers
//!
//! Every phase completes for all providers before the next begins:
//! prepare, required-services check, start, notify-after-completed.

use tracing::{debug, info};

use crate::module::services::{ModuleDirectory, ServiceKey};
use crate::module::traits::{ModuleError, ModuleProvider, PrepareContext};

/// Selected provider of one module
pub struct ProviderSlot {
    pub(crate) module: String,
    pub(crate) provider_name: String,
    pub(crate) requires: Vec<String>,
    pub(crate) services: Vec<ServiceKey>,
    pub(crate) provider: Box<dyn ModuleProvider>,
}

/// Providers in dependency order
pub struct BootstrapFlow {
    slots: Vec<ProviderSlot>,
    started: usize,
}

impl BootstrapFlow {
    pub(crate) fn new(slots: Vec<ProviderSlot>) -> Self {
        Self { slots, started: 0 }
    }

    /// Module names in start order
    pub fn modules(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.module.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Providers whose start succeeded
    pub fn started(&self) -> usize {
        self.started
    }

    /// Prepare every provider, dependencies first
    pub fn prepare(&mut self, directory: &mut ModuleDirectory) -> Result<(), ModuleError> {
        for slot in &self.slots {
            directory.registry_mut(&slot.module);
        }
        for slot in &mut self.slots {
            debug!("Preparing module {} ({})", slot.module, slot.provider_name);
            let mut ctx = PrepareContext::new(&slot.module, &slot.requires, directory);
            slot.provider
                .prepare(&mut ctx)
                .map_err(|e| ModuleError::PrepareFailure {
                    module: slot.module.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Every declared service must have been registered
    pub fn require_services(&self, directory: &ModuleDirectory) -> Result<(), ModuleError> {
        for slot in &self.slots {
            let registry = directory.registry(&slot.module);
            for service in &slot.services {
                if !registry.map(|r| r.contains(service)).unwrap_or(false) {
                    return Err(ModuleError::ServiceNotProvided {
                        module: slot.module.clone(),
                        service: service.name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Start in dependency order; stops at the first failure
    pub async fn start(&mut self, directory: &ModuleDirectory) -> Result<(), ModuleError> {
        for slot in self.slots.iter_mut().skip(self.started) {
            info!("Starting module {} ({})", slot.module, slot.provider_name);
            slot.provider
                .start(directory)
                .await
                .map_err(|e| ModuleError::StartFailure {
                    module: slot.module.clone(),
                    reason: e.to_string(),
                })?;
            self.started += 1;
        }
        Ok(())
    }

    pub fn notify_after_completed(&mut self) -> Result<(), ModuleError> {
        for slot in &mut self.slots {
            slot.provider
                .notify_after_completed()
                .map_err(|e| ModuleError::StartFailure {
                    module: slot.module.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Shut started providers down in reverse start order
    pub async fn shutdown(&mut self) {
        while self.started > 0 {
            self.started -= 1;
            let slot = &mut self.slots[self.started];
            info!("Stopping module {}", slot.module);
            slot.provider.shutdown().await;
        }
    }
}
