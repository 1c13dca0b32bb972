//! Capability discovery.
//!
//! A module advertises capabilities through metadata headers:
//!
//! - `Provided-Classes` / `Provided-Classes-<context>`: comma-separated class
//!   globs matched against every class entry of the module.
//! - `Provided-Resources` / `Provided-Resources-<context>`: comma-separated
//!   `dir/file-glob` resource patterns.
//! - `Provided-Aliases` / `Provided-Aliases-<context>`: `alias=canonical` pairs.
//! - `Delegation-Annotations`: enables marker discovery over every class.
//!
//! [`CapabilityScanner::scan`] turns those headers into one provider record
//! per context.

pub mod extractor;
pub mod headers;

use crate::config::DelegationConfig;
use crate::glob::GlobPattern;
use crate::record::{ContextCapabilities, DEFAULT_CONTEXT, ProviderRecord};
pub use extractor::{
    CapabilityExtractor, ChainExtractor, MarkerExtractor, SIDECAR_DESCRIPTOR, SidecarExtractor,
};
use crossload_api::{Module, ModuleRef};
use headers::{Declarations, parse_aliases};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use url::Url;

const CLASS_SUFFIX: &str = ".class";

#[derive(Clone)]
pub struct CapabilityScanner {
    extractor: Arc<dyn CapabilityExtractor>,
}

impl Default for CapabilityScanner {
    fn default() -> Self {
        Self::new(Arc::new(MarkerExtractor))
    }
}

impl CapabilityScanner {
    pub fn new(extractor: Arc<dyn CapabilityExtractor>) -> Self {
        Self { extractor }
    }

    pub fn from_config(config: &DelegationConfig) -> Self {
        if config.sidecar_descriptors {
            Self::new(Arc::new(
                ChainExtractor::new()
                    .with(Arc::new(MarkerExtractor))
                    .with(Arc::new(SidecarExtractor)),
            ))
        } else {
            Self::default()
        }
    }

    /// Fully-qualified names of every class entry in `module`.
    pub fn discover_classes(&self, module: &dyn Module) -> BTreeSet<String> {
        module
            .list_entries("/", &format!("*{CLASS_SUFFIX}"), true)
            .iter()
            .filter_map(|url| {
                let path = entry_path(url);
                path.strip_suffix(CLASS_SUFFIX)
                    .filter(|stem| !stem.is_empty())
                    .map(|stem| stem.replace('/', "."))
            })
            .collect()
    }

    /// Names in `discovered` matched by at least one of `patterns`.
    pub fn match_patterns(discovered: &BTreeSet<String>, patterns: &[GlobPattern]) -> BTreeSet<String> {
        if patterns.iter().any(GlobPattern::matches_everything) {
            return discovered.clone();
        }
        discovered
            .iter()
            .filter(|name| patterns.iter().any(|p| p.is_match(name)))
            .cloned()
            .collect()
    }

    /// Compile header globs, ignoring blank entries.
    pub fn compile_patterns(raw: &[String]) -> Result<Vec<GlobPattern>, regex::Error> {
        raw.iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(GlobPattern::new)
            .collect()
    }

    /// Resource paths matching `patterns`, each split into directory and file glob.
    pub fn discover_resources(&self, module: &dyn Module, patterns: &[String]) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        for pattern in patterns {
            let pattern = pattern.trim().trim_start_matches('/');
            if pattern.is_empty() {
                continue;
            }
            let (root, glob) = pattern.rsplit_once('/').unwrap_or(("", pattern));
            let before = found.len();
            found.extend(
                module
                    .list_entries(&format!("/{root}"), glob, true)
                    .iter()
                    .map(|url| entry_path(url).to_string()),
            );
            if found.len() == before {
                tracing::debug!(
                    "Resource pattern {} matched nothing in {}",
                    pattern,
                    module.symbolic_name()
                );
            }
        }
        found
    }

    /// Capabilities found through markers, keyed by context. Empty unless
    /// the module opts in with `Delegation-Annotations`.
    pub fn discover_by_marker(&self, module: &dyn Module) -> BTreeMap<String, ContextCapabilities> {
        if !Declarations::from_metadata(&module.metadata()).marker_discovery {
            return BTreeMap::new();
        }
        let discovered = self.discover_classes(module);
        self.markers(module, &discovered)
    }

    fn markers(
        &self,
        module: &dyn Module,
        discovered: &BTreeSet<String>,
    ) -> BTreeMap<String, ContextCapabilities> {
        let mut contexts: BTreeMap<String, ContextCapabilities> = BTreeMap::new();
        for (class, marker) in self.extractor.extract(module, discovered) {
            let scopes = std::iter::once(DEFAULT_CONTEXT.to_string()).chain(marker.contexts);
            for context in scopes {
                let caps = contexts.entry(context).or_default();
                caps.classes.insert(class.clone());
                if let Some(alias) = &marker.alias {
                    caps.aliases.insert(alias.clone(), class.clone());
                }
            }
        }
        contexts
    }

    /// Provider records for every context `module` declares.
    pub fn scan(&self, module: &ModuleRef) -> Vec<ProviderRecord> {
        let declarations = Declarations::from_metadata(&module.metadata());
        let mut contexts: BTreeMap<String, ContextCapabilities> = BTreeMap::new();

        let discovered = if !declarations.classes.is_empty() || declarations.marker_discovery {
            self.discover_classes(module.as_ref())
        } else {
            BTreeSet::new()
        };

        for (context, raw) in &declarations.classes {
            match Self::compile_patterns(raw) {
                Ok(patterns) => {
                    let caps = ContextCapabilities {
                        classes: Self::match_patterns(&discovered, &patterns),
                        class_patterns: patterns,
                        ..ContextCapabilities::default()
                    };
                    contexts.entry(context.clone()).or_default().merge(caps);
                }
                Err(err) => {
                    tracing::warn!(
                        "Skipping class header for context '{}' in {}: {}",
                        context,
                        module.symbolic_name(),
                        err
                    );
                }
            }
        }

        if declarations.marker_discovery {
            for (context, caps) in self.markers(module.as_ref(), &discovered) {
                contexts.entry(context).or_default().merge(caps);
            }
        }

        for (context, raw) in &declarations.resources {
            let resources = self.discover_resources(module.as_ref(), raw);
            contexts
                .entry(context.clone())
                .or_default()
                .resources
                .extend(resources);
        }

        for (context, value) in &declarations.aliases {
            let pairs = match parse_aliases(value) {
                Ok(pairs) => pairs,
                Err(err) => {
                    tracing::warn!(
                        "Skipping alias header for context '{}' in {}: {}",
                        context,
                        module.symbolic_name(),
                        err
                    );
                    continue;
                }
            };
            match contexts.get_mut(context) {
                Some(caps) => {
                    for (alias, canonical) in pairs {
                        caps.aliases.insert(alias, canonical);
                    }
                }
                None => tracing::warn!(
                    "Aliases for context '{}' in {} have no provided classes",
                    context,
                    module.symbolic_name()
                ),
            }
        }

        contexts
            .into_iter()
            .filter(|(_, caps)| {
                !caps.classes.is_empty() || !caps.resources.is_empty() || !caps.class_patterns.is_empty()
            })
            .map(|(context, caps)| ProviderRecord::new(module.clone(), context, caps))
            .collect()
    }
}

/// Entry path relative to the module root, without the leading `/`.
fn entry_path(url: &Url) -> &str {
    url.path().trim_start_matches('/')
}
