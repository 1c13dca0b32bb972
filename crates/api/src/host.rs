use crate::module::{ModuleId, ModuleRef};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleEventKind {
    Started,
    Stopping,
    Stopped,
    Updated,
    Uninstalled,
}

/// Lifecycle transition delivered by the host container.
#[derive(Debug, Clone)]
pub struct ModuleEvent {
    pub kind: ModuleEventKind,
    pub module: ModuleRef,
}

impl ModuleEvent {
    pub fn new(kind: ModuleEventKind, module: ModuleRef) -> Self {
        Self { kind, module }
    }

    pub fn module_id(&self) -> ModuleId {
        self.module.id()
    }
}

/// Module enumeration and lifecycle notifications of the host container.
pub trait HostContainer: Send + Sync {
    fn list_modules(&self) -> Vec<ModuleRef>;

    /// Open a new subscription. Events are delivered until the receiver is dropped.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ModuleEvent>;
}
