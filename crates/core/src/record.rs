//! Provider records: the published unit binding a module, a context, a
//! version and its capability sets.

use crate::filter::{Capability, Filter};
use crate::glob::GlobPattern;
use crossload_api::{ModuleId, ModuleRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Unscoped context.
pub const DEFAULT_CONTEXT: &str = "";

pub type ProvidedSet = BTreeSet<String>;

/// How a filter without a context predicate treats scoped records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// Only unscoped records answer a filter without context.
    #[default]
    Exact,
    /// Records of every context answer a filter without context.
    Any,
}

impl FromStr for ContextPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(ContextPolicy::Exact),
            "any" => Ok(ContextPolicy::Any),
            other => Err(format!("unknown context policy `{other}`; expected exact|any")),
        }
    }
}

/// How a requested class name is matched against a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    /// Patterns are resolved at scan time; lookups test set membership only.
    #[default]
    Exact,
    /// Lookups additionally re-evaluate the record's declared class patterns.
    LateBound,
}

impl FromStr for Membership {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "exact" => Ok(Membership::Exact),
            "late_bound" => Ok(Membership::LateBound),
            other => Err(format!("unknown membership `{other}`; expected exact|late_bound")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchRules {
    pub context: ContextPolicy,
    pub membership: Membership,
}

/// Alias name to canonical class name, scoped to one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMap {
    aliases: BTreeMap<String, String>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases.insert(alias.into(), canonical.into());
    }

    pub fn extend(&mut self, other: AliasMap) {
        self.aliases.extend(other.aliases);
    }

    /// Canonical name for `name`, or `name` itself when it is not an alias.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(a, c)| (a.as_str(), c.as_str()))
    }
}

/// Everything one module provides for one context.
#[derive(Debug, Clone, Default)]
pub struct ContextCapabilities {
    pub classes: ProvidedSet,
    pub resources: ProvidedSet,
    pub aliases: AliasMap,
    pub class_patterns: Vec<GlobPattern>,
}

impl ContextCapabilities {
    pub fn merge(&mut self, other: ContextCapabilities) {
        self.classes.extend(other.classes);
        self.resources.extend(other.resources);
        self.aliases.extend(other.aliases);
        for pattern in other.class_patterns {
            if !self.class_patterns.contains(&pattern) {
                self.class_patterns.push(pattern);
            }
        }
    }
}

/// Published provider record. Immutable once built, except for the
/// withdrawal flag set when the registry drops it.
#[derive(Debug)]
pub struct ProviderRecord {
    module: ModuleRef,
    context: String,
    version: String,
    classes: ProvidedSet,
    resources: ProvidedSet,
    aliases: AliasMap,
    class_patterns: Vec<GlobPattern>,
    withdrawn: AtomicBool,
}

impl ProviderRecord {
    /// Build a record for `module` in `context`; the version is the module's.
    pub fn new(module: ModuleRef, context: impl Into<String>, capabilities: ContextCapabilities) -> Self {
        let version = module.version().to_string();
        Self {
            module,
            context: context.into(),
            version,
            classes: capabilities.classes,
            resources: capabilities.resources,
            aliases: capabilities.aliases,
            class_patterns: capabilities.class_patterns,
            withdrawn: AtomicBool::new(false),
        }
    }

    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    pub fn module_id(&self) -> ModuleId {
        self.module.id()
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn classes(&self) -> &ProvidedSet {
        &self.classes
    }

    pub fn resources(&self) -> &ProvidedSet {
        &self.resources
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    pub fn class_patterns(&self) -> &[GlobPattern] {
        &self.class_patterns
    }

    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn.load(Ordering::Acquire)
    }

    pub(crate) fn withdraw(&self) {
        self.withdrawn.store(true, Ordering::Release);
    }

    /// Published and owned by a module that is still Active.
    ///
    /// A record stops being reachable the moment its module leaves the
    /// Active state, before the coordinator withdraws it.
    pub fn is_reachable(&self) -> bool {
        !self.is_withdrawn() && self.module.state().is_active()
    }

    /// Whether the record provides class `name`, after alias resolution.
    pub fn provides_class(&self, name: &str, membership: Membership) -> bool {
        let canonical = self.aliases.resolve(name);
        if self.classes.contains(canonical) {
            return true;
        }
        membership == Membership::LateBound
            && self.class_patterns.iter().any(|p| p.is_match(canonical))
    }

    pub fn provides_resource(&self, path: &str) -> bool {
        self.resources.contains(path.trim_start_matches('/'))
    }

    pub fn satisfies(&self, filter: &Filter, rules: MatchRules) -> bool {
        if !self.is_reachable() {
            return false;
        }
        let provided = match filter.capability() {
            Capability::Class(name) => self.provides_class(name, rules.membership),
            Capability::Resource(path) => self.provides_resource(path),
        };
        if !provided {
            return false;
        }
        let context_ok = match filter.context() {
            Some(context) => self.context == context,
            None => rules.context == ContextPolicy::Any || self.context == DEFAULT_CONTEXT,
        };
        context_ok && filter.version().is_none_or(|v| self.version == v)
    }
}
