//! Host-side module contract.
//!
//! A module is an isolated unit of code with its own loading boundary. The
//! delegation core never owns modules; it only reads them through [`Module`].

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Host-assigned identity of one installed module.
///
/// Two installs of the same symbolic name (e.g. two versions side by side)
/// have distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Installed,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

impl ModuleState {
    pub fn is_active(self) -> bool {
        matches!(self, ModuleState::Active)
    }
}

/// Capability marker carried by a class.
///
/// A marked class is provided in the unscoped context and in every context
/// listed here. The optional alias is an alternate request name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideMarker {
    #[serde(default)]
    pub contexts: Vec<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

impl ProvideMarker {
    pub fn new(contexts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            contexts: contexts.into_iter().map(Into::into).collect(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// A class as defined by one module's native loader.
///
/// Identity is pointer identity of the surrounding [`ClassRef`]; the defining
/// module never changes once the class is loaded.
#[derive(Debug, PartialEq, Eq)]
pub struct LoadedClass {
    name: String,
    defining_module: ModuleId,
    defining_module_name: String,
    marker: Option<ProvideMarker>,
}

impl LoadedClass {
    pub fn new(
        name: impl Into<String>,
        defining_module: ModuleId,
        defining_module_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            defining_module,
            defining_module_name: defining_module_name.into(),
            marker: None,
        }
    }

    pub fn with_marker(mut self, marker: ProvideMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defining_module(&self) -> ModuleId {
        self.defining_module
    }

    pub fn defining_module_name(&self) -> &str {
        &self.defining_module_name
    }

    pub fn marker(&self) -> Option<&ProvideMarker> {
        self.marker.as_ref()
    }
}

pub type ClassRef = Arc<LoadedClass>;

/// Native operations of one module, implemented by the host container.
///
/// Implementations must return the same [`ClassRef`] for repeated loads of
/// the same name so that class identity is stable across callers.
pub trait Module: Send + Sync {
    fn id(&self) -> ModuleId;

    fn symbolic_name(&self) -> &str;

    fn version(&self) -> &str;

    fn state(&self) -> ModuleState;

    /// Manifest headers of the module.
    fn metadata(&self) -> BTreeMap<String, String>;

    /// Load a class through the module's own loader.
    fn load_own_class(&self, name: &str) -> Result<ClassRef>;

    fn get_own_resource(&self, path: &str) -> Option<Url>;

    /// Enumerate entries under `root` whose file name matches `glob`.
    ///
    /// The path of every returned URL is the entry path relative to the
    /// module root, with a leading `/`.
    fn list_entries(&self, root: &str, glob: &str, recursive: bool) -> Vec<Url>;

    /// Raw bytes of one entry, if the host can read it.
    fn read_entry(&self, _path: &str) -> Option<Vec<u8>> {
        None
    }
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id())
            .field("symbolic_name", &self.symbolic_name())
            .field("version", &self.version())
            .field("state", &self.state())
            .finish()
    }
}

pub type ModuleRef = Arc<dyn Module>;
