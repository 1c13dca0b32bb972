//! In-memory modules for embedding and tests.

use crossload_api::{
    ClassRef, DelegationError, LoadedClass, Module, ModuleId, ModuleState, ProvideMarker, Result,
};
use crossload_core::glob::GlobPattern;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

/// A module whose lifecycle state is driven by the host.
pub trait HostedModule: Module {
    fn set_state(&self, state: ModuleState);
}

/// Scheme of the entry URLs handed out by the in-process modules.
pub const ENTRY_SCHEME: &str = "crossload";

pub(crate) fn entry_url(id: ModuleId, path: &str) -> Option<Url> {
    Url::parse(&format!("{ENTRY_SCHEME}://module-{}/{}", id.0, path.trim_start_matches('/'))).ok()
}

/// Entries under `root` whose file name matches `glob`.
pub(crate) fn filter_entries<'a>(
    entries: impl IntoIterator<Item = &'a str>,
    root: &str,
    glob: &str,
    recursive: bool,
) -> Vec<&'a str> {
    let root = root.trim_matches('/');
    let Ok(pattern) = GlobPattern::new(glob) else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter(|entry| {
            let relative = if root.is_empty() {
                Some(*entry)
            } else {
                entry
                    .strip_prefix(root)
                    .and_then(|rest| rest.strip_prefix('/'))
            };
            relative.is_some_and(|rel| {
                let (dir, file) = rel.rsplit_once('/').unwrap_or(("", rel));
                (recursive || dir.is_empty()) && pattern.is_match(file)
            })
        })
        .collect()
}

pub(crate) fn class_entry(name: &str) -> String {
    format!("{}.class", name.replace('.', "/"))
}

/// Module defined entirely in memory.
pub struct StaticModule {
    id: ModuleId,
    name: String,
    version: String,
    state: RwLock<ModuleState>,
    headers: BTreeMap<String, String>,
    classes: BTreeMap<String, Option<ProvideMarker>>,
    resources: BTreeMap<String, Vec<u8>>,
    loaded: DashMap<String, ClassRef>,
}

pub struct StaticModuleBuilder {
    module: StaticModule,
}

impl StaticModule {
    pub fn builder(id: ModuleId, name: &str, version: &str) -> StaticModuleBuilder {
        StaticModuleBuilder {
            module: StaticModule {
                id,
                name: name.to_string(),
                version: version.to_string(),
                state: RwLock::new(ModuleState::Installed),
                headers: BTreeMap::new(),
                classes: BTreeMap::new(),
                resources: BTreeMap::new(),
                loaded: DashMap::new(),
            },
        }
    }

    fn entries(&self) -> Vec<String> {
        self.classes
            .keys()
            .map(|name| class_entry(name))
            .chain(self.resources.keys().cloned())
            .collect()
    }
}

impl StaticModuleBuilder {
    pub fn class(mut self, name: &str) -> Self {
        self.module.classes.insert(name.to_string(), None);
        self
    }

    /// Class carrying a capability marker.
    pub fn provide(mut self, name: &str, marker: ProvideMarker) -> Self {
        self.module.classes.insert(name.to_string(), Some(marker));
        self
    }

    pub fn resource(mut self, path: &str, content: impl Into<Vec<u8>>) -> Self {
        self.module
            .resources
            .insert(path.trim_start_matches('/').to_string(), content.into());
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.module.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Arc<StaticModule> {
        Arc::new(self.module)
    }
}

impl Module for StaticModule {
    fn id(&self) -> ModuleId {
        self.id
    }

    fn symbolic_name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn state(&self) -> ModuleState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.headers.clone()
    }

    fn load_own_class(&self, name: &str) -> Result<ClassRef> {
        if let Some(class) = self.loaded.get(name) {
            return Ok(class.clone());
        }
        let marker = self
            .classes
            .get(name)
            .ok_or_else(|| DelegationError::class_not_found(name))?;
        let mut class = LoadedClass::new(name, self.id, &self.name);
        if let Some(marker) = marker {
            class = class.with_marker(marker.clone());
        }
        Ok(self
            .loaded
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(class))
            .clone())
    }

    fn get_own_resource(&self, path: &str) -> Option<Url> {
        let path = path.trim_start_matches('/');
        let known = self.resources.contains_key(path)
            || path
                .strip_suffix(".class")
                .is_some_and(|stem| self.classes.contains_key(&stem.replace('/', ".")));
        if known { entry_url(self.id, path) } else { None }
    }

    fn list_entries(&self, root: &str, glob: &str, recursive: bool) -> Vec<Url> {
        let entries = self.entries();
        filter_entries(entries.iter().map(String::as_str), root, glob, recursive)
            .into_iter()
            .filter_map(|entry| entry_url(self.id, entry))
            .collect()
    }

    fn read_entry(&self, path: &str) -> Option<Vec<u8>> {
        self.resources.get(path.trim_start_matches('/')).cloned()
    }
}

impl HostedModule for StaticModule {
    fn set_state(&self, state: ModuleState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}
