pub mod directory;
pub mod host;
pub mod module;

pub use directory::{DirectoryModule, ModuleManifest};
pub use host::InMemoryHost;
pub use module::{HostedModule, StaticModule, StaticModuleBuilder};

use crossload_api::HostContainer;
use crossload_core::{
    CapabilityScanner, DelegatingLoader, DelegationConfig, LifecycleCoordinator, ProviderRegistry,
};
use std::sync::Arc;

/// A running delegation stack bound to one host container.
///
/// This acts as the central factory: it assembles the registry, the scanner,
/// the lifecycle coordinator and a default loader from one configuration.
pub struct Runtime {
    config: DelegationConfig,
    registry: Arc<ProviderRegistry>,
    coordinator: Arc<LifecycleCoordinator>,
    loader: DelegatingLoader,
}

impl Runtime {
    /// Build the stack and publish every module already active in `host`.
    pub async fn start(host: Arc<dyn HostContainer>, config: DelegationConfig) -> Self {
        let registry = Arc::new(ProviderRegistry::new(config.match_rules()));
        let coordinator = Arc::new(LifecycleCoordinator::new(
            registry.clone(),
            CapabilityScanner::from_config(&config),
            &config,
        ));
        coordinator.start(host).await;
        let loader = DelegatingLoader::new(registry.clone(), &config);
        Self {
            config,
            registry,
            coordinator,
            loader,
        }
    }

    pub fn config(&self) -> &DelegationConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }

    pub fn loader(&self) -> &DelegatingLoader {
        &self.loader
    }

    /// Stop following host events and release every blocked caller.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
        self.registry.close();
    }
}

/// Initializes the logging system for a specific component, writing under
/// the directory named by `config.logging`.
pub fn init_logging(component: &str, config: &DelegationConfig, to_stderr: bool) -> impl Drop + use<> {
    crossload_core::logging::init_logging(component, &config.logging, to_stderr)
}
