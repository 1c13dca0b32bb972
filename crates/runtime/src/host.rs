//! Reference host container.
//!
//! Owns installed modules, drives their lifecycle state and broadcasts a
//! [`ModuleEvent`] to every subscriber after each state change.

use crate::directory::{DirectoryModule, module_dirs};
use crate::module::HostedModule;
use crossload_api::{
    DelegationError, HostContainer, Module, ModuleEvent, ModuleEventKind, ModuleId, ModuleRef,
    ModuleState, Result,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;

#[derive(Clone)]
struct Installed {
    module: ModuleRef,
    control: Arc<dyn HostedModule>,
}

#[derive(Default)]
pub struct InMemoryHost {
    next_id: AtomicU64,
    modules: RwLock<BTreeMap<ModuleId, Installed>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ModuleEvent>>>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a module built for a freshly assigned id. The module starts
    /// out Installed.
    pub fn install<M, F>(&self, make: F) -> Arc<M>
    where
        M: HostedModule + 'static,
        F: FnOnce(ModuleId) -> Arc<M>,
    {
        match self.try_install(|id| Ok::<_, std::convert::Infallible>(make(id))) {
            Ok(module) => module,
            Err(never) => match never {},
        }
    }

    /// Like [`InMemoryHost::install`] for builders that can fail. A failed
    /// build leaves nothing installed.
    pub fn try_install<M, E, F>(&self, make: F) -> std::result::Result<Arc<M>, E>
    where
        M: HostedModule + 'static,
        F: FnOnce(ModuleId) -> std::result::Result<Arc<M>, E>,
    {
        let id = ModuleId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let module = make(id)?;
        module.set_state(ModuleState::Installed);
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Installed {
                    module: module.clone(),
                    control: module.clone(),
                },
            );
        tracing::debug!("Installed {} as {}", module.symbolic_name(), id);
        Ok(module)
    }

    /// Install and start every module directory under `dir`. Directories
    /// whose manifest cannot be read are logged and skipped.
    pub fn install_directory(&self, dir: &Path) -> crossload_core::Result<Vec<Arc<DirectoryModule>>> {
        let mut installed = Vec::new();
        for root in module_dirs(dir)? {
            match self.try_install(|id| DirectoryModule::open(id, &root)) {
                Ok(module) => {
                    self.start(module.id())?;
                    installed.push(module);
                }
                Err(err) => {
                    tracing::error!("Skipping module at {}: {}", root.display(), err);
                }
            }
        }
        Ok(installed)
    }

    fn installed(&self, id: ModuleId) -> Result<Installed> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| DelegationError::Module {
                module: id.to_string(),
                reason: "not installed".to_string(),
            })
    }

    pub fn module(&self, id: ModuleId) -> Option<ModuleRef> {
        self.installed(id).ok().map(|installed| installed.module)
    }

    fn emit(&self, kind: ModuleEventKind, module: &ModuleRef) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(ModuleEvent::new(kind, module.clone())).is_ok());
    }

    pub fn start(&self, id: ModuleId) -> Result<()> {
        let installed = self.installed(id)?;
        if installed.module.state().is_active() {
            return Ok(());
        }
        installed.control.set_state(ModuleState::Starting);
        installed.control.set_state(ModuleState::Active);
        tracing::info!(
            "Started {} {} ({})",
            installed.module.symbolic_name(),
            installed.module.version(),
            id
        );
        self.emit(ModuleEventKind::Started, &installed.module);
        Ok(())
    }

    pub fn stop(&self, id: ModuleId) -> Result<()> {
        let installed = self.installed(id)?;
        if !installed.module.state().is_active() {
            return Ok(());
        }
        installed.control.set_state(ModuleState::Stopping);
        self.emit(ModuleEventKind::Stopping, &installed.module);
        installed.control.set_state(ModuleState::Installed);
        self.emit(ModuleEventKind::Stopped, &installed.module);
        tracing::info!("Stopped {} ({})", installed.module.symbolic_name(), id);
        Ok(())
    }

    /// Replace module `id` with a new build under the same id, restarting it
    /// if it was active.
    pub fn update<M, F>(&self, id: ModuleId, make: F) -> Result<Arc<M>>
    where
        M: HostedModule + 'static,
        F: FnOnce(ModuleId) -> Arc<M>,
    {
        let previous = self.installed(id)?;
        let was_active = previous.module.state().is_active();
        previous.control.set_state(ModuleState::Installed);
        self.emit(ModuleEventKind::Updated, &previous.module);

        let module = make(id);
        module.set_state(ModuleState::Installed);
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Installed {
                    module: module.clone(),
                    control: module.clone(),
                },
            );
        if was_active {
            self.start(id)?;
        }
        Ok(module)
    }

    pub fn uninstall(&self, id: ModuleId) -> Result<()> {
        self.stop(id)?;
        let installed = self.installed(id)?;
        installed.control.set_state(ModuleState::Uninstalled);
        self.modules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        self.emit(ModuleEventKind::Uninstalled, &installed.module);
        Ok(())
    }
}

impl HostContainer for InMemoryHost {
    fn list_modules(&self) -> Vec<ModuleRef> {
        self.modules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|installed| installed.module.clone())
            .collect()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ModuleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::StaticModule;

    fn kinds(rx: &mut mpsc::UnboundedReceiver<ModuleEvent>) -> Vec<ModuleEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[test]
    fn test_lifecycle_events() {
        let host = InMemoryHost::new();
        let mut rx = host.subscribe();
        let module = host.install(|id| StaticModule::builder(id, "m", "1.0.0").build());
        let id = module.id();

        host.start(id).unwrap();
        assert!(module.state().is_active());
        host.stop(id).unwrap();
        assert_eq!(module.state(), ModuleState::Installed);
        host.uninstall(id).unwrap();
        assert_eq!(module.state(), ModuleState::Uninstalled);

        assert_eq!(
            kinds(&mut rx),
            vec![
                ModuleEventKind::Started,
                ModuleEventKind::Stopping,
                ModuleEventKind::Stopped,
                ModuleEventKind::Uninstalled,
            ]
        );
        assert!(host.list_modules().is_empty());
        assert!(host.start(id).is_err());
    }

    #[test]
    fn test_update_keeps_id_and_restarts() {
        let host = InMemoryHost::new();
        let old = host.install(|id| StaticModule::builder(id, "m", "1.0.0").build());
        host.start(old.id()).unwrap();
        let mut rx = host.subscribe();

        let new = host
            .update(old.id(), |id| StaticModule::builder(id, "m", "2.0.0").build())
            .unwrap();

        assert_eq!(new.id(), old.id());
        assert!(new.state().is_active());
        assert!(!old.state().is_active());
        assert_eq!(
            kinds(&mut rx),
            vec![ModuleEventKind::Updated, ModuleEventKind::Started]
        );
        assert_eq!(host.module(old.id()).unwrap().version(), "2.0.0");
    }

    #[test]
    fn test_ids_are_unique_per_install() {
        let host = InMemoryHost::new();
        let a = host.install(|id| StaticModule::builder(id, "m", "1.0.0").build());
        let b = host.install(|id| StaticModule::builder(id, "m", "2.0.0").build());
        assert_ne!(a.id(), b.id());
        assert_eq!(host.list_modules().len(), 2);
    }
}
