//! Per-record lookup objects that load through the providing module.

use crate::record::{Membership, ProviderRecord};
use crossload_api::{ClassRef, DelegationError, Result};
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use url::Url;

/// Loads classes named by one provider record.
#[derive(Debug)]
pub struct ClassProvider {
    record: Arc<ProviderRecord>,
    membership: Membership,
    classes: OnceLock<Vec<ClassRef>>,
}

impl ClassProvider {
    pub fn new(record: Arc<ProviderRecord>, membership: Membership) -> Self {
        Self {
            record,
            membership,
            classes: OnceLock::new(),
        }
    }

    pub fn record(&self) -> &Arc<ProviderRecord> {
        &self.record
    }

    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.record.aliases().resolve(name)
    }

    pub fn provides(&self, name: &str) -> bool {
        self.record.provides_class(name, self.membership)
    }

    /// Load `name`, or the class it aliases, through the owning module.
    pub fn load_class(&self, name: &str) -> Result<ClassRef> {
        if !self.record.is_reachable() {
            return Err(DelegationError::class_not_found_with(
                name,
                format!("provider {} withdrawn", self.record.module_id()),
            ));
        }
        if !self.provides(name) {
            return Err(DelegationError::class_not_found(name));
        }
        let canonical = self.resolve_alias(name);
        tracing::debug!(
            "Loading {} (as {}) from module {}",
            name,
            canonical,
            self.record.module_id()
        );
        self.record
            .module()
            .load_own_class(canonical)
            .map_err(|err| DelegationError::class_not_found_with(name, err.to_string()))
    }

    /// Every provided class, resolved once and cached.
    pub fn list_classes(&self) -> Vec<ClassRef> {
        if !self.record.is_reachable() {
            return Vec::new();
        }
        self.classes
            .get_or_init(|| {
                let module = self.record.module();
                let mut seen = BTreeSet::new();
                let mut classes = Vec::new();
                for name in self.record.classes() {
                    match module.load_own_class(name) {
                        Ok(class) => {
                            if seen.insert(class.name().to_string()) {
                                classes.push(class);
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                "Skipping {} in module {}: {}",
                                name,
                                module.symbolic_name(),
                                err
                            );
                        }
                    }
                }
                classes
            })
            .clone()
    }
}

/// Resolves resources named by one provider record.
#[derive(Debug)]
pub struct ResourceProvider {
    record: Arc<ProviderRecord>,
    resources: OnceLock<Vec<Url>>,
}

impl ResourceProvider {
    pub fn new(record: Arc<ProviderRecord>) -> Self {
        Self {
            record,
            resources: OnceLock::new(),
        }
    }

    pub fn record(&self) -> &Arc<ProviderRecord> {
        &self.record
    }

    pub fn load_resource(&self, path: &str) -> Option<Url> {
        if !self.record.is_reachable() || !self.record.provides_resource(path) {
            return None;
        }
        self.record
            .module()
            .get_own_resource(path.trim_start_matches('/'))
    }

    pub fn list_resources(&self) -> Vec<Url> {
        if !self.record.is_reachable() {
            return Vec::new();
        }
        self.resources
            .get_or_init(|| {
                let module = self.record.module();
                self.record
                    .resources()
                    .iter()
                    .filter_map(|path| {
                        let url = module.get_own_resource(path);
                        if url.is_none() {
                            tracing::warn!(
                                "Resource {} vanished from module {}",
                                path,
                                module.symbolic_name()
                            );
                        }
                        url
                    })
                    .collect()
            })
            .clone()
    }
}
