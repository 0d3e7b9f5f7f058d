//! Module system of the agent
//!
//! Subsystems (collector channel, metric sender, heartbeat) are modules with
//! exactly one provider each, assembled from a static registry.
//!
//! ## Lifecycle
//!
//! 1. **Resolve**: enabled set filtered by selectors, one provider per module,
//!    dependency order computed, cycles rejected
//! 2. **Prepare**: providers create and register services
//! 3. **Check**: every declared service was registered
//! 4. **Start**: dependencies first; the first failure aborts bootstrap
//! 5. **Complete**: `notify_after_completed` in start order

pub mod bootstrap;
pub mod builtin;
pub mod manager;
pub mod registry;
pub mod services;
pub mod traits;

pub use bootstrap::BootstrapFlow;
pub use builtin::{builtin_registry, Collaborators};
pub use manager::ModuleManager;
pub use registry::{ModuleRegistry, ProviderFactory};
pub use services::{ModuleDirectory, ServiceKey, ServiceRegistry};
pub use traits::{ModuleDefinition, ModuleError, ModuleProvider, PrepareContext};
