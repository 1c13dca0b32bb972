//! Attribute filters over published provider records.
//!
//! A filter is a conjunction of `attribute=value` predicates. It renders to
//! the registry query grammar, e.g.
//! `(&(providedName=com.acme.TestBean)(context=foo)(version=1.0.0))`,
//! and can be parsed back from it.

use crossload_api::{DelegationError, Result};
use std::fmt;

pub const PROVIDED_NAME: &str = "providedName";
pub const PROVIDED_RESOURCE: &str = "providedResource";
pub const CONTEXT: &str = "context";
pub const VERSION: &str = "version";

/// Characters with structural meaning in the query grammar.
const STRUCTURAL_CHARS: &[char] = &['(', ')', '*', '\\', '&', '|', '!', '=', '\0'];

/// What a filter asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    Class(String),
    Resource(String),
}

impl Capability {
    pub fn name(&self) -> &str {
        match self {
            Capability::Class(name) | Capability::Resource(name) => name,
        }
    }

    fn attribute(&self) -> &'static str {
        match self {
            Capability::Class(_) => PROVIDED_NAME,
            Capability::Resource(_) => PROVIDED_RESOURCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    capability: Capability,
    context: Option<String>,
    version: Option<String>,
}

impl Filter {
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn name(&self) -> &str {
        self.capability.name()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The terminal error for a lookup of this filter that found nothing.
    pub fn not_found(&self, cause: Option<String>) -> DelegationError {
        match &self.capability {
            Capability::Class(name) => DelegationError::ClassNotFound {
                name: name.clone(),
                cause,
            },
            Capability::Resource(path) => DelegationError::ResourceNotFound { path: path.clone() },
        }
    }

    /// Parse a filter expression in the registry query grammar.
    pub fn parse(expression: &str) -> Result<Filter> {
        let expression = expression.trim();
        let body = match expression.strip_prefix("(&") {
            Some(rest) => rest
                .strip_suffix(')')
                .ok_or_else(|| invalid(format!("unbalanced conjunction in `{expression}`")))?,
            None => expression,
        };

        let mut builder = FilterBuilder::default();
        let mut rest = body;
        while !rest.is_empty() {
            let inner = rest
                .strip_prefix('(')
                .ok_or_else(|| invalid(format!("expected `(` in `{expression}`")))?;
            let end = inner
                .find(')')
                .ok_or_else(|| invalid(format!("unterminated predicate in `{expression}`")))?;
            let (attribute, value) = inner[..end]
                .split_once('=')
                .ok_or_else(|| invalid(format!("predicate without `=` in `{expression}`")))?;
            builder = builder.set(attribute.trim(), value)?;
            rest = &inner[end + 1..];
        }
        builder.build()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut predicates = vec![format!(
            "({}={})",
            self.capability.attribute(),
            self.capability.name()
        )];
        if let Some(context) = &self.context {
            predicates.push(format!("({CONTEXT}={context})"));
        }
        if let Some(version) = &self.version {
            predicates.push(format!("({VERSION}={version})"));
        }
        if predicates.len() == 1 {
            write!(f, "{}", predicates[0])
        } else {
            write!(f, "(&{})", predicates.concat())
        }
    }
}

/// Builds a [`Filter`] from a name and optional context and version.
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    capability: Option<Capability>,
    context: Option<String>,
    version: Option<String>,
}

impl FilterBuilder {
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            capability: Some(Capability::Class(name.into())),
            ..Self::default()
        }
    }

    pub fn resource(path: impl Into<String>) -> Self {
        Self {
            capability: Some(Capability::Resource(path.into())),
            ..Self::default()
        }
    }

    /// `None` omits the predicate. `Some("")` asks for the unscoped context.
    pub fn context(mut self, context: Option<&str>) -> Self {
        self.context = context.map(str::to_string);
        self
    }

    pub fn version(mut self, version: Option<&str>) -> Self {
        self.version = version.map(str::to_string);
        self
    }

    pub fn build(self) -> Result<Filter> {
        let capability = self
            .capability
            .ok_or_else(|| invalid("filter needs a provided name or resource"))?;
        if capability.name().trim().is_empty() {
            return Err(invalid(format!("{} must not be empty", capability.attribute())));
        }
        check_value(capability.attribute(), capability.name())?;
        if let Some(context) = &self.context {
            check_value(CONTEXT, context)?;
        }
        if let Some(version) = &self.version {
            if version.trim().is_empty() {
                return Err(invalid("version must not be empty when present"));
            }
            check_value(VERSION, version)?;
        }
        Ok(Filter {
            capability,
            context: self.context,
            version: self.version,
        })
    }

    /// Class filter for `name`, optionally narrowed by context and version.
    pub fn build_class(name: &str, context: Option<&str>, version: Option<&str>) -> Result<Filter> {
        Self::class(name).context(context).version(version).build()
    }

    pub fn build_resource(
        path: &str,
        context: Option<&str>,
        version: Option<&str>,
    ) -> Result<Filter> {
        Self::resource(path).context(context).version(version).build()
    }

    fn set(mut self, attribute: &str, value: &str) -> Result<Self> {
        let duplicate = match attribute {
            PROVIDED_NAME | PROVIDED_RESOURCE => self.capability.is_some(),
            CONTEXT => self.context.is_some(),
            VERSION => self.version.is_some(),
            other => return Err(invalid(format!("unknown attribute `{other}`"))),
        };
        if duplicate {
            return Err(invalid(format!("attribute `{attribute}` given twice")));
        }
        match attribute {
            PROVIDED_NAME => self.capability = Some(Capability::Class(value.to_string())),
            PROVIDED_RESOURCE => self.capability = Some(Capability::Resource(value.to_string())),
            CONTEXT => self.context = Some(value.to_string()),
            _ => self.version = Some(value.to_string()),
        }
        Ok(self)
    }
}

fn check_value(attribute: &str, value: &str) -> Result<()> {
    if let Some(bad) = value
        .chars()
        .find(|c| STRUCTURAL_CHARS.contains(c) || c.is_control())
    {
        return Err(invalid(format!(
            "{attribute} value `{}` contains unsupported character {bad:?}",
            value.escape_debug()
        )));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> DelegationError {
    DelegationError::InvalidFilter(message.into())
}
