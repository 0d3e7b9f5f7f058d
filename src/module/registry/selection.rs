//! Selection of one provider per enabled module

use std::collections::HashSet;
use tracing::info;

use crate::config::ModulesConfig;
use crate::module::registry::{ModuleRegistry, ProviderEntry};
use crate::module::traits::{ModuleDefinition, ModuleError};

/// Enabled module with its chosen provider
pub(crate) struct Selection<'a> {
    pub module: &'a ModuleDefinition,
    pub provider: &'a ProviderEntry,
}

/// Resolve the enabled list against the registry
///
/// Unknown modules are collected and reported together before any
/// provider is chosen.
pub(crate) fn select<'a>(
    registry: &'a ModuleRegistry,
    config: &ModulesConfig,
) -> Result<Vec<Selection<'a>>, ModuleError> {
    let mut seen = HashSet::new();
    let enabled: Vec<&str> = config
        .enabled
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty() && seen.insert(*name))
        .collect();

    let missing: Vec<String> = enabled
        .iter()
        .filter(|name| registry.definition(name).is_none())
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ModuleError::ModuleNotFound(missing));
    }

    let mut selections = Vec::with_capacity(enabled.len());
    for name in enabled {
        let Some(module) = registry.definition(name) else {
            continue;
        };
        let candidates = registry.providers(name);

        let provider = match config.selector(name) {
            Some(selector) if selector == config.disable_token => {
                info!("Module {} disabled by selector", name);
                continue;
            }
            Some(selector) => candidates
                .iter()
                .find(|p| p.name == selector)
                .ok_or_else(|| ModuleError::ProviderNotFound {
                    module: name.to_string(),
                    selector: selector.clone(),
                })?,
            None => match candidates {
                [single] => single,
                [] => {
                    return Err(ModuleError::ProviderNotFound {
                        module: name.to_string(),
                        selector: String::new(),
                    })
                }
                several => {
                    return Err(ModuleError::DuplicateProvider {
                        module: name.to_string(),
                        providers: several.iter().map(|p| p.name.clone()).collect(),
                    })
                }
            },
        };

        selections.push(Selection { module, provider });
    }

    Ok(selections)
}
