pub mod config;
pub mod error;
pub mod filter;
pub mod glob;
pub mod lifecycle;
pub mod loader;
pub mod logging;
pub mod provider;
pub mod record;
pub mod registry;
pub mod scanner;

#[cfg(test)]
mod testing;

pub use config::{DelegationConfig, LogSettings};
pub use error::{CrossloadError, Result};
pub use filter::{Capability, Filter, FilterBuilder};
pub use lifecycle::LifecycleCoordinator;
pub use loader::{DelegatingLoader, LoadOptions, ScopedResolver};
pub use provider::{ClassProvider, ResourceProvider};
pub use record::{
    AliasMap, ContextCapabilities, ContextPolicy, DEFAULT_CONTEXT, MatchRules, Membership,
    ProviderRecord,
};
pub use registry::{ProviderRegistry, RegistrationHandle, RegistryStats};
pub use scanner::CapabilityScanner;
