//! Capability headers in module metadata.

use std::collections::BTreeMap;

pub const PROVIDED_CLASSES: &str = "Provided-Classes";
pub const PROVIDED_RESOURCES: &str = "Provided-Resources";
pub const PROVIDED_ALIASES: &str = "Provided-Aliases";
pub const DELEGATION_ANNOTATIONS: &str = "Delegation-Annotations";

/// Capability declarations of one module, keyed by context ("" = unscoped).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Declarations {
    pub classes: BTreeMap<String, Vec<String>>,
    pub resources: BTreeMap<String, Vec<String>>,
    pub aliases: BTreeMap<String, String>,
    pub marker_discovery: bool,
}

impl Declarations {
    pub fn from_metadata(metadata: &BTreeMap<String, String>) -> Self {
        let mut declarations = Declarations::default();
        for (key, value) in metadata {
            if let Some(context) = header_context(key, PROVIDED_CLASSES) {
                let patterns = split_list(value);
                if !patterns.is_empty() {
                    declarations.classes.insert(context, patterns);
                }
            } else if let Some(context) = header_context(key, PROVIDED_RESOURCES) {
                let patterns = split_list(value);
                if !patterns.is_empty() {
                    declarations.resources.insert(context, patterns);
                }
            } else if let Some(context) = header_context(key, PROVIDED_ALIASES) {
                declarations.aliases.insert(context, value.clone());
            } else if key == DELEGATION_ANNOTATIONS {
                declarations.marker_discovery = !value.trim().eq_ignore_ascii_case("false");
            }
        }
        declarations
    }
}

/// `Some("")` for the plain header, `Some(ctx)` for `<header>-<ctx>`.
fn header_context(key: &str, header: &str) -> Option<String> {
    let rest = key.strip_prefix(header)?;
    if rest.is_empty() {
        return Some(String::new());
    }
    let context = rest.strip_prefix('-')?;
    (!context.is_empty()).then(|| context.to_string())
}

/// Comma-separated values, trimmed, blanks dropped.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// `alias=canonical` pairs of an aliases header.
pub fn parse_aliases(value: &str) -> Result<Vec<(String, String)>, String> {
    split_list(value)
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((alias, canonical)) if !alias.trim().is_empty() && !canonical.trim().is_empty() => {
                Ok((alias.trim().to_string(), canonical.trim().to_string()))
            }
            _ => Err(format!("malformed alias entry `{pair}`; expected alias=canonical")),
        })
        .collect()
}
