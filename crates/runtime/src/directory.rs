//! Modules backed by a directory on disk.
//!
//! Layout of a module directory:
//!
//! ```text
//! my-module/
//!   module.json          {"name": "...", "version": "...", "headers": {...}}
//!   com/acme/Bean.class  class entry; non-empty content is a JSON marker
//!   META-INF/beans.xml   any other file is a resource
//! ```

use crate::module::{HostedModule, entry_url, filter_entries};
use crossload_api::{
    ClassRef, DelegationError, LoadedClass, Module, ModuleId, ModuleState, ProvideMarker, Result,
};
use crossload_core::CrossloadError;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;
use walkdir::WalkDir;

pub const MANIFEST: &str = "module.json";

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

pub struct DirectoryModule {
    id: ModuleId,
    root: PathBuf,
    manifest: ModuleManifest,
    state: RwLock<ModuleState>,
    loaded: DashMap<String, ClassRef>,
}

impl std::fmt::Debug for DirectoryModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryModule")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("name", &self.manifest.name)
            .finish()
    }
}

impl DirectoryModule {
    /// Open the module rooted at `root`, reading its manifest.
    pub fn open(id: ModuleId, root: impl Into<PathBuf>) -> crossload_core::Result<Arc<Self>> {
        let root = root.into();
        let content = std::fs::read_to_string(root.join(MANIFEST))?;
        let manifest: ModuleManifest = serde_json::from_str(&content)?;
        if manifest.name.trim().is_empty() {
            return Err(CrossloadError::Config(format!(
                "{} in {} has an empty name",
                MANIFEST,
                root.display()
            )));
        }
        Ok(Arc::new(Self {
            id,
            root,
            manifest,
            state: RwLock::new(ModuleState::Installed),
            loaded: DashMap::new(),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &ModuleManifest {
        &self.manifest
    }

    /// Relative `/`-separated paths of every file except the manifest.
    fn entries(&self) -> Vec<String> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(parts.join("/"))
            })
            .filter(|path| path != MANIFEST)
            .collect()
    }

    fn native_error(&self, reason: impl Into<String>) -> DelegationError {
        DelegationError::Module {
            module: self.manifest.name.clone(),
            reason: reason.into(),
        }
    }

    fn define(&self, name: &str) -> Result<LoadedClass> {
        let path = self.root.join(crate::module::class_entry(name));
        let bytes = std::fs::read(&path).map_err(|_| DelegationError::class_not_found(name))?;
        let mut class = LoadedClass::new(name, self.id, &self.manifest.name);
        if !bytes.iter().all(u8::is_ascii_whitespace) {
            let marker: ProvideMarker = serde_json::from_slice(&bytes)
                .map_err(|err| self.native_error(format!("malformed class {name}: {err}")))?;
            class = class.with_marker(marker);
        }
        Ok(class)
    }
}

impl Module for DirectoryModule {
    fn id(&self) -> ModuleId {
        self.id
    }

    fn symbolic_name(&self) -> &str {
        &self.manifest.name
    }

    fn version(&self) -> &str {
        &self.manifest.version
    }

    fn state(&self) -> ModuleState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.manifest.headers.clone()
    }

    fn load_own_class(&self, name: &str) -> Result<ClassRef> {
        if let Some(class) = self.loaded.get(name) {
            return Ok(class.clone());
        }
        let class = self.define(name)?;
        Ok(self
            .loaded
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(class))
            .clone())
    }

    fn get_own_resource(&self, path: &str) -> Option<Url> {
        let path = path.trim_start_matches('/');
        if path.is_empty() || path == MANIFEST || path.split('/').any(|part| part == "..") {
            return None;
        }
        let file = self.root.join(path);
        if file.is_file() {
            Url::from_file_path(file).ok()
        } else {
            None
        }
    }

    fn list_entries(&self, root: &str, glob: &str, recursive: bool) -> Vec<Url> {
        let entries = self.entries();
        filter_entries(entries.iter().map(String::as_str), root, glob, recursive)
            .into_iter()
            .filter_map(|entry| entry_url(self.id, entry))
            .collect()
    }

    fn read_entry(&self, path: &str) -> Option<Vec<u8>> {
        let path = path.trim_start_matches('/');
        if path.split('/').any(|part| part == "..") {
            return None;
        }
        std::fs::read(self.root.join(path)).ok()
    }
}

impl HostedModule for DirectoryModule {
    fn set_state(&self, state: ModuleState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Immediate subdirectories of `dir` that carry a module manifest, sorted by name.
pub fn module_dirs(dir: &Path) -> crossload_core::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(CrossloadError::Config(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir() && entry.path().join(MANIFEST).is_file())
        .map(|entry| entry.into_path())
        .collect())
}
