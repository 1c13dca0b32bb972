//! Keeps the registry in step with module lifecycle.
//!
//! Every event is reconciled against the module's current state rather than
//! the event kind: an Active module is (re)scanned and published, any other
//! state withdraws the records of that module instance. Events of one module
//! are serialized through a per-module gate; distinct modules are processed
//! in parallel up to `max_parallel_scans`.

use crate::config::DelegationConfig;
use crate::record::{ContextCapabilities, ProviderRecord};
use crate::registry::{ProviderRegistry, RegistrationHandle};
use crate::scanner::CapabilityScanner;
use crossload_api::{
    DelegationError, HostContainer, ModuleEvent, ModuleEventKind, ModuleId, ModuleRef, Result,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct LifecycleCoordinator {
    registry: Arc<ProviderRegistry>,
    scanner: CapabilityScanner,
    gates: DashMap<ModuleId, Arc<Mutex<()>>>,
    scan_permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        scanner: CapabilityScanner,
        config: &DelegationConfig,
    ) -> Self {
        Self {
            registry,
            scanner,
            gates: DashMap::new(),
            scan_permits: Arc::new(Semaphore::new(config.max_parallel_scans.max(1))),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn scanner(&self) -> &CapabilityScanner {
        &self.scanner
    }

    /// Publish every Active module of `host`, then follow its lifecycle
    /// events in the background until [`LifecycleCoordinator::shutdown`].
    ///
    /// Returns the number of modules published at boot.
    pub async fn start(self: &Arc<Self>, host: Arc<dyn HostContainer>) -> usize {
        // Subscribe first so no transition between boot scan and loop is lost.
        let mut events = host.subscribe();

        let mut boot = JoinSet::new();
        for module in host.list_modules() {
            if module.state().is_active() {
                let this = self.clone();
                boot.spawn(async move { this.process_module(module).await });
            }
        }
        let mut published = 0;
        while let Some(result) = boot.join_next().await {
            match result {
                Ok(count) if count > 0 => published += 1,
                Ok(_) => {}
                Err(err) => tracing::error!("Boot scan task failed: {}", err),
            }
        }
        tracing::info!("Published capabilities of {} modules at boot", published);

        let this = self.clone();
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => {
                            let worker = this.clone();
                            this.tasks.spawn(async move { worker.handle_event(event).await });
                        }
                        None => {
                            tracing::info!("Host event stream closed");
                            break;
                        }
                    }
                }
            }
        });

        published
    }

    pub async fn handle_event(&self, event: ModuleEvent) {
        let id = event.module_id();
        tracing::debug!(
            "Module {} ({}) event {:?}",
            event.module.symbolic_name(),
            id,
            event.kind
        );
        self.process_module(event.module).await;
        if event.kind == ModuleEventKind::Uninstalled {
            self.gates.remove(&id);
        }
    }

    fn gate(&self, id: ModuleId) -> Arc<Mutex<()>> {
        self.gates.entry(id).or_default().clone()
    }

    /// Reconcile `module` with the registry. Returns the number of records
    /// published, zero when the module was withdrawn or provides nothing.
    pub async fn process_module(&self, module: ModuleRef) -> usize {
        let id = module.id();
        let gate = self.gate(id);
        let _serial = gate.lock().await;

        if !module.state().is_active() {
            self.withdraw_instance(&module);
            return 0;
        }

        let records = {
            let Ok(_permit) = self.scan_permits.acquire().await else {
                return 0;
            };
            let scanner = self.scanner.clone();
            let target = module.clone();
            match tokio::task::spawn_blocking(move || scanner.scan(&target)).await {
                Ok(records) => records,
                Err(err) => {
                    tracing::error!(
                        "Scanning module {} ({}) failed: {}",
                        module.symbolic_name(),
                        id,
                        err
                    );
                    return 0;
                }
            }
        };

        // The module may have stopped while it was being scanned.
        if !module.state().is_active() {
            self.withdraw_instance(&module);
            return 0;
        }

        let count = records.len();
        self.registry.replace_module(id, records);
        if count > 0 {
            tracing::info!(
                "Registered {} provider records for {} {} ({})",
                count,
                module.symbolic_name(),
                module.version(),
                id
            );
        }
        count
    }

    /// Withdraw every record of module `id`.
    pub async fn withdraw_module(&self, id: ModuleId) -> usize {
        let gate = self.gate(id);
        let _serial = gate.lock().await;
        let removed = self.registry.unregister_module(id);
        if removed > 0 {
            tracing::info!("Withdrew {} provider records of module {}", removed, id);
        }
        removed
    }

    // Records published for a newer install of the same id are left alone.
    fn withdraw_instance(&self, module: &ModuleRef) {
        let id = module.id();
        let owned = self
            .registry
            .records_of(id)
            .iter()
            .any(|record| same_instance(record.module(), module));
        if owned {
            let removed = self.registry.unregister_module(id);
            tracing::info!(
                "Withdrew {} provider records of {} ({})",
                removed,
                module.symbolic_name(),
                id
            );
        }
    }

    /// Publish classes of `module` matching `patterns` in `context`,
    /// regardless of the module's own headers.
    pub fn inject(
        &self,
        module: &ModuleRef,
        patterns: &[String],
        context: &str,
    ) -> Result<RegistrationHandle> {
        let globs = CapabilityScanner::compile_patterns(patterns).map_err(|err| {
            DelegationError::Module {
                module: module.symbolic_name().to_string(),
                reason: err.to_string(),
            }
        })?;
        let discovered = self.scanner.discover_classes(module.as_ref());
        let caps = ContextCapabilities {
            classes: CapabilityScanner::match_patterns(&discovered, &globs),
            class_patterns: globs,
            ..ContextCapabilities::default()
        };
        tracing::info!(
            "Injecting {} classes of {} in context '{}'",
            caps.classes.len(),
            module.symbolic_name(),
            context
        );
        Ok(self
            .registry
            .register(ProviderRecord::new(module.clone(), context, caps)))
    }

    /// Publish resources of `module` matching `patterns` in `context`.
    pub fn inject_resources(
        &self,
        module: &ModuleRef,
        patterns: &[String],
        context: &str,
    ) -> RegistrationHandle {
        let caps = ContextCapabilities {
            resources: self.scanner.discover_resources(module.as_ref(), patterns),
            ..ContextCapabilities::default()
        };
        self.registry
            .register(ProviderRecord::new(module.clone(), context, caps))
    }

    /// Stop following events and wait for in-flight processing to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

fn same_instance(a: &ModuleRef, b: &ModuleRef) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
