//! Static module registry
//!
//! Modules and their providers are registered explicitly at startup; the
//! registry resolves the configured module set into a [`BootstrapFlow`].

pub mod dependencies;
pub(crate) mod selection;

use std::collections::HashMap;
use tracing::debug;

use crate::config::ModulesConfig;
use crate::module::bootstrap::{BootstrapFlow, ProviderSlot};
use crate::module::traits::{ModuleDefinition, ModuleError, ModuleProvider};

pub use dependencies::ModuleDependencies;

/// Creates a fresh provider instance
pub type ProviderFactory = Box<dyn Fn() -> Box<dyn ModuleProvider> + Send + Sync>;

/// Named provider of one module
pub struct ProviderEntry {
    pub(crate) name: String,
    factory: ProviderFactory,
}

impl ProviderEntry {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    definitions: Vec<ModuleDefinition>,
    providers: HashMap<String, Vec<ProviderEntry>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a module; a later declaration with the same name replaces it
    pub fn register_module(&mut self, definition: ModuleDefinition) -> &mut Self {
        self.definitions.retain(|d| d.name != definition.name);
        self.definitions.push(definition);
        self
    }

    /// Add a provider under `module` keyed by `name`
    pub fn register_provider<F>(&mut self, module: &str, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn ModuleProvider> + Send + Sync + 'static,
    {
        self.providers
            .entry(module.to_string())
            .or_default()
            .push(ProviderEntry {
                name: name.to_string(),
                factory: Box::new(factory),
            });
        self
    }

    pub fn definition(&self, module: &str) -> Option<&ModuleDefinition> {
        self.definitions.iter().find(|d| d.name == module)
    }

    pub fn providers(&self, module: &str) -> &[ProviderEntry] {
        self.providers
            .get(module)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Select providers, check requirements and order them
    ///
    /// Nothing is prepared or started here.
    pub fn resolve(&self, config: &ModulesConfig) -> Result<BootstrapFlow, ModuleError> {
        let selections = selection::select(self, config)?;

        let mut slots: Vec<ProviderSlot> = selections
            .into_iter()
            .map(|s| {
                let provider = (s.provider.factory)();
                ProviderSlot {
                    module: s.module.name.clone(),
                    provider_name: s.provider.name.clone(),
                    requires: provider.requires(),
                    services: s.module.services.clone(),
                    provider,
                }
            })
            .collect();

        for slot in &slots {
            for required in &slot.requires {
                if !slots.iter().any(|s| &s.module == required) {
                    return Err(ModuleError::RequiredModuleNotFound {
                        module: slot.module.clone(),
                        provider: slot.provider_name.clone(),
                        required: required.clone(),
                    });
                }
            }
        }

        let graph: Vec<(String, Vec<String>)> = slots
            .iter()
            .map(|s| (s.module.clone(), s.requires.clone()))
            .collect();
        let order = ModuleDependencies::resolve(&graph)?;

        let mut by_index: Vec<Option<ProviderSlot>> = slots.drain(..).map(Some).collect();
        let ordered: Vec<ProviderSlot> = order
            .into_iter()
            .filter_map(|i| by_index.get_mut(i).and_then(Option::take))
            .collect();

        debug!(
            "Resolved modules: {}",
            ordered
                .iter()
                .map(|s| format!("{}({})", s.module, s.provider_name))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(BootstrapFlow::new(ordered))
    }
}
