//! In-crate module double for unit tests.

use crate::glob::GlobPattern;
use crossload_api::{
    ClassRef, DelegationError, LoadedClass, Module, ModuleId, ModuleState, ProvideMarker, Result,
};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use url::Url;

pub struct FakeModule {
    id: ModuleId,
    name: String,
    version: String,
    state: RwLock<ModuleState>,
    headers: BTreeMap<String, String>,
    classes: BTreeMap<String, Option<ProvideMarker>>,
    broken: BTreeSet<String>,
    resources: BTreeMap<String, Vec<u8>>,
    loaded: DashMap<String, ClassRef>,
    native_loads: AtomicUsize,
}

pub struct FakeModuleBuilder {
    module: FakeModule,
}

impl FakeModule {
    pub fn builder(id: u64, name: &str, version: &str) -> FakeModuleBuilder {
        FakeModuleBuilder {
            module: FakeModule {
                id: ModuleId(id),
                name: name.to_string(),
                version: version.to_string(),
                state: RwLock::new(ModuleState::Active),
                headers: BTreeMap::new(),
                classes: BTreeMap::new(),
                broken: BTreeSet::new(),
                resources: BTreeMap::new(),
                loaded: DashMap::new(),
                native_loads: AtomicUsize::new(0),
            },
        }
    }

    pub fn set_state(&self, state: ModuleState) {
        *self.state.write().unwrap() = state;
    }

    pub fn native_loads(&self) -> usize {
        self.native_loads.load(Ordering::SeqCst)
    }

    fn url(&self, path: &str) -> Option<Url> {
        Url::parse(&format!("crossload://module-{}/{}", self.id.0, path)).ok()
    }

    fn entries(&self) -> Vec<String> {
        self.classes
            .keys()
            .map(|name| format!("{}.class", name.replace('.', "/")))
            .chain(self.resources.keys().cloned())
            .collect()
    }
}

impl FakeModuleBuilder {
    pub fn class(mut self, name: &str) -> Self {
        self.module.classes.insert(name.to_string(), None);
        self
    }

    pub fn marked_class(mut self, name: &str, marker: ProvideMarker) -> Self {
        self.module.classes.insert(name.to_string(), Some(marker));
        self
    }

    /// Listed as an entry but fails to load.
    pub fn broken_class(mut self, name: &str) -> Self {
        self.module.classes.insert(name.to_string(), None);
        self.module.broken.insert(name.to_string());
        self
    }

    pub fn resource(mut self, path: &str, content: &[u8]) -> Self {
        self.module.resources.insert(path.to_string(), content.to_vec());
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.module.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Arc<FakeModule> {
        Arc::new(self.module)
    }
}

impl Module for FakeModule {
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
        *self.state.read().unwrap()
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
        if self.broken.contains(name) {
            return Err(DelegationError::class_not_found_with(name, "broken class file"));
        }
        self.native_loads.fetch_add(1, Ordering::SeqCst);
        let mut class = LoadedClass::new(name, self.id, &self.name);
        if let Some(marker) = marker {
            class = class.with_marker(marker.clone());
        }
        let class = self
            .loaded
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(class))
            .clone();
        Ok(class)
    }

    fn get_own_resource(&self, path: &str) -> Option<Url> {
        let path = path.trim_start_matches('/');
        if self.resources.contains_key(path) || self.entries().iter().any(|e| e == path) {
            self.url(path)
        } else {
            None
        }
    }

    fn list_entries(&self, root: &str, glob: &str, recursive: bool) -> Vec<Url> {
        let root = root.trim_matches('/');
        let Ok(pattern) = GlobPattern::new(glob) else {
            return Vec::new();
        };
        self.entries()
            .into_iter()
            .filter(|entry| {
                let relative = if root.is_empty() {
                    Some(entry.as_str())
                } else {
                    entry
                        .strip_prefix(root)
                        .and_then(|rest| rest.strip_prefix('/'))
                };
                match relative {
                    Some(rel) => {
                        let (dir, file) = rel.rsplit_once('/').unwrap_or(("", rel));
                        (recursive || dir.is_empty()) && pattern.is_match(file)
                    }
                    None => false,
                }
            })
            .filter_map(|entry| self.url(&entry))
            .collect()
    }

    fn read_entry(&self, path: &str) -> Option<Vec<u8>> {
        self.resources.get(path.trim_start_matches('/')).cloned()
    }
}
