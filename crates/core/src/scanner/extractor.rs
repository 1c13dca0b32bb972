//! Marker extraction for marker-based capability discovery.

use crossload_api::{Module, ProvideMarker};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Entry read by [`SidecarExtractor`].
pub const SIDECAR_DESCRIPTOR: &str = "META-INF/crossload.json";

/// Finds capability markers on the classes of a module.
pub trait CapabilityExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// `(class, marker)` for every marked class among `classes`.
    fn extract(&self, module: &dyn Module, classes: &BTreeSet<String>) -> Vec<(String, ProvideMarker)>;
}

/// Loads each class through the module and reads its marker.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerExtractor;

impl CapabilityExtractor for MarkerExtractor {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn extract(&self, module: &dyn Module, classes: &BTreeSet<String>) -> Vec<(String, ProvideMarker)> {
        let mut found = Vec::new();
        for name in classes {
            match module.load_own_class(name) {
                Ok(class) => {
                    if let Some(marker) = class.marker() {
                        found.push((name.clone(), marker.clone()));
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "Could not inspect {} in module {}: {}",
                        name,
                        module.symbolic_name(),
                        err
                    );
                }
            }
        }
        found
    }
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    provides: Vec<DescriptorEntry>,
}

#[derive(Debug, Deserialize)]
struct DescriptorEntry {
    class: String,
    #[serde(default)]
    contexts: Vec<String>,
    #[serde(default)]
    alias: Option<String>,
}

/// Reads markers from a JSON descriptor shipped inside the module.
#[derive(Debug, Default, Clone, Copy)]
pub struct SidecarExtractor;

impl CapabilityExtractor for SidecarExtractor {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    fn extract(&self, module: &dyn Module, classes: &BTreeSet<String>) -> Vec<(String, ProvideMarker)> {
        let Some(bytes) = module.read_entry(SIDECAR_DESCRIPTOR) else {
            return Vec::new();
        };
        let descriptor: Descriptor = match serde_json::from_slice(&bytes) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                tracing::warn!(
                    "Ignoring malformed {} in module {}: {}",
                    SIDECAR_DESCRIPTOR,
                    module.symbolic_name(),
                    err
                );
                return Vec::new();
            }
        };

        descriptor
            .provides
            .into_iter()
            .filter(|entry| {
                let known = classes.contains(&entry.class);
                if !known {
                    tracing::warn!(
                        "{} in module {} names unknown class {}",
                        SIDECAR_DESCRIPTOR,
                        module.symbolic_name(),
                        entry.class
                    );
                }
                known
            })
            .map(|entry| {
                let mut marker = ProvideMarker::new(entry.contexts);
                marker.alias = entry.alias;
                (entry.class, marker)
            })
            .collect()
    }
}

/// Runs several extractors and concatenates their findings.
#[derive(Clone, Default)]
pub struct ChainExtractor {
    extractors: Vec<Arc<dyn CapabilityExtractor>>,
}

impl ChainExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, extractor: Arc<dyn CapabilityExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }
}

impl CapabilityExtractor for ChainExtractor {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn extract(&self, module: &dyn Module, classes: &BTreeSet<String>) -> Vec<(String, ProvideMarker)> {
        self.extractors
            .iter()
            .flat_map(|extractor| {
                let found = extractor.extract(module, classes);
                tracing::debug!(
                    "Extractor {} found {} markers in {}",
                    extractor.name(),
                    found.len(),
                    module.symbolic_name()
                );
                found
            })
            .collect()
    }
}
